//! Encoder rate-control translation.
//!
//! Maps a (codec, mode) request onto the exact numeric arm the encoder
//! expects. Pairs outside the table below are rejected before any
//! hardware call:
//!
//! | Codec      | CBR | VBR | QP | ABR | AVBR |
//! |------------|-----|-----|----|-----|------|
//! | H.264      |  ✓  |  ✓  | ✓  |  ✓  |  ✓   |
//! | H.265      |  ✓  |  ✓  | ✓  |     |  ✓   |
//! | MJPEG/JPEG |  ✓  |     | ✓  |     |      |
//!
//! Bitrates are configured in kbit/s and handed to the hardware in
//! bit/s (`kbps << 10`).

use crate::config::{EncoderConfig, RateMode};
use crate::error::{MediaError, Result};
use crate::media::Codec;

/// Frame-rate ratio `num / den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn per_second(num: u32) -> Self {
        Self { num, den: 1 }
    }
}

/// Which H.26x codec an arm belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H26x {
    H264,
    H265,
}

/// Rate-control arm handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    MjpegCbr {
        frame_rate: FrameRate,
        bitrate: u32,
    },
    MjpegQp {
        frame_rate: FrameRate,
        quality: u8,
    },
    Cbr {
        codec: H26x,
        gop: u32,
        frame_rate: FrameRate,
        bitrate: u32,
    },
    Vbr {
        codec: H26x,
        gop: u32,
        frame_rate: FrameRate,
        max_bitrate: u32,
        min_qual: u8,
        max_qual: u8,
    },
    Qp {
        codec: H26x,
        gop: u32,
        frame_rate: FrameRate,
        inter_qual: u8,
        pred_qual: u8,
    },
    /// H.264 only.
    Abr {
        gop: u32,
        frame_rate: FrameRate,
        avg_bitrate: u32,
        max_bitrate: u32,
    },
    Avbr {
        codec: H26x,
        gop: u32,
        frame_rate: FrameRate,
        max_bitrate: u32,
        min_qual: u8,
        max_qual: u8,
    },
}

fn kbps(rate: u32) -> u32 {
    rate.saturating_mul(1 << 10)
}

impl RateControl {
    pub fn from_config(cfg: &EncoderConfig) -> Result<Self> {
        let h26x = match cfg.codec {
            Codec::H264 => H26x::H264,
            Codec::H265 => H26x::H265,
            Codec::Mjpeg | Codec::Jpeg => return Self::jpeg(cfg),
        };
        let frame_rate = FrameRate::per_second(cfg.framerate);
        let gop = cfg.gop;
        let peak = kbps(cfg.bitrate.max(cfg.max_bitrate));

        Ok(match cfg.mode {
            RateMode::Cbr => Self::Cbr {
                codec: h26x,
                gop,
                frame_rate,
                bitrate: kbps(cfg.bitrate),
            },
            RateMode::Vbr => Self::Vbr {
                codec: h26x,
                gop,
                frame_rate,
                max_bitrate: peak,
                min_qual: cfg.min_qual,
                max_qual: cfg.max_qual,
            },
            RateMode::Qp => Self::Qp {
                codec: h26x,
                gop,
                frame_rate,
                inter_qual: cfg.max_qual,
                pred_qual: cfg.min_qual,
            },
            RateMode::Abr if h26x == H26x::H264 => Self::Abr {
                gop,
                frame_rate,
                avg_bitrate: kbps(cfg.bitrate),
                max_bitrate: kbps(cfg.max_bitrate),
            },
            RateMode::Abr => {
                return Err(MediaError::config("H.265 does not support ABR rate control"));
            }
            RateMode::Avbr => Self::Avbr {
                codec: h26x,
                gop,
                frame_rate,
                max_bitrate: peak,
                min_qual: cfg.min_qual,
                max_qual: cfg.max_qual,
            },
        })
    }

    fn jpeg(cfg: &EncoderConfig) -> Result<Self> {
        // Single-shot JPEG runs at one frame per request.
        let frame_rate = match cfg.codec {
            Codec::Jpeg => FrameRate::per_second(1),
            _ => FrameRate::per_second(cfg.framerate),
        };
        match cfg.mode {
            RateMode::Cbr => Ok(Self::MjpegCbr {
                frame_rate,
                bitrate: kbps(cfg.bitrate),
            }),
            RateMode::Qp => Ok(Self::MjpegQp {
                frame_rate,
                quality: cfg.min_qual.max(cfg.max_qual),
            }),
            mode => Err(MediaError::config(format!(
                "{:?} supports only CBR or QP rate control, not {mode:?}",
                cfg.codec
            ))),
        }
    }

    pub fn mode(&self) -> RateMode {
        match self {
            Self::MjpegCbr { .. } | Self::Cbr { .. } => RateMode::Cbr,
            Self::MjpegQp { .. } | Self::Qp { .. } => RateMode::Qp,
            Self::Vbr { .. } => RateMode::Vbr,
            Self::Abr { .. } => RateMode::Abr,
            Self::Avbr { .. } => RateMode::Avbr,
        }
    }

    pub fn frame_rate(&self) -> FrameRate {
        match *self {
            Self::MjpegCbr { frame_rate, .. }
            | Self::MjpegQp { frame_rate, .. }
            | Self::Cbr { frame_rate, .. }
            | Self::Vbr { frame_rate, .. }
            | Self::Qp { frame_rate, .. }
            | Self::Abr { frame_rate, .. }
            | Self::Avbr { frame_rate, .. } => frame_rate,
        }
    }
}
