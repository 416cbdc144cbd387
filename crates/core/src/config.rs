//! Plain configuration structs.
//!
//! Loading them from files is left to the caller; every struct has a
//! `Default` matching the stock camera setup and a `validate()` that
//! rejects bad values before any hardware is touched.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use crate::error::{MediaError, Result};
use crate::media::{Codec, DEFAULT_PACKET_SIZE};
use crate::media::rtp::RTP_HEADER_LEN;

/// Fixed module ids for one capture pipeline on a single-sensor chip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphLayout {
    pub capture_group: u8,
    pub capture_device: u8,
    pub isp_device: u8,
    pub isp_channel: u8,
    pub isp_port: u8,
    pub scaler_device: u8,
    pub scaler_channel: u8,
}

/// Sensor-to-scaler pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sensor: u8,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub hdr: bool,
    pub mirror: bool,
    pub flip: bool,
    /// Number of scaler output ports to reserve; one encoder channel each.
    pub scaler_ports: u8,
    pub snapshot_timeout: Duration,
    pub layout: GraphLayout,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sensor: 0,
            width: 1920,
            height: 1080,
            framerate: 30,
            hdr: false,
            mirror: false,
            flip: false,
            scaler_ports: 4,
            snapshot_timeout: Duration::from_secs(2),
            layout: GraphLayout::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MediaError::config("sensor resolution must be non-zero"));
        }
        if self.framerate == 0 {
            return Err(MediaError::config("sensor framerate must be non-zero"));
        }
        if self.scaler_ports == 0 || self.scaler_ports > 32 {
            return Err(MediaError::config(format!(
                "scaler_ports must be in 1..=32, got {}",
                self.scaler_ports
            )));
        }
        Ok(())
    }

    /// Output port binding mask handed to the scaler device.
    pub fn scaler_port_mask(&self) -> u32 {
        if self.scaler_ports >= 32 {
            u32::MAX
        } else {
            (1u32 << self.scaler_ports) - 1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMode {
    Cbr,
    Vbr,
    Qp,
    Abr,
    Avbr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncoderProfile {
    Baseline,
    #[default]
    Main,
    High,
}

/// One encoder channel request.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub codec: Codec,
    pub mode: RateMode,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Target bitrate in kbit/s.
    pub bitrate: u32,
    /// Peak bitrate in kbit/s (VBR, ABR, AVBR).
    pub max_bitrate: u32,
    pub gop: u32,
    pub min_qual: u8,
    pub max_qual: u8,
    pub profile: EncoderProfile,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: Codec::H264,
            mode: RateMode::Cbr,
            width: 1920,
            height: 1080,
            framerate: 30,
            bitrate: 4096,
            max_bitrate: 4096,
            gop: 60,
            min_qual: 20,
            max_qual: 45,
            profile: EncoderProfile::Main,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width < 16 || self.height < 16 {
            return Err(MediaError::config(format!(
                "encoder resolution {}x{} is below 16x16",
                self.width, self.height
            )));
        }
        if self.framerate == 0 {
            return Err(MediaError::config("encoder framerate must be non-zero"));
        }
        if !self.codec.is_jpeg() && self.gop == 0 {
            return Err(MediaError::config("gop must be non-zero"));
        }
        Ok(())
    }
}

/// Live RTP output settings.
#[derive(Debug, Clone)]
pub struct RtpConfig {
    pub destination: SocketAddr,
    /// Total RTP packet size (header included).
    pub packet_size: usize,
    pub payload_type: u8,
    pub ssrc: u32,
    /// Pick a random SSRC at start instead of `ssrc`.
    pub random_ssrc: bool,
    /// How long the sender waits for a new frame before re-checking
    /// the running flag.
    pub poll_interval: Duration,
    /// Largest access unit the handoff buffer accepts.
    pub frame_capacity: usize,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            destination: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5600)),
            packet_size: DEFAULT_PACKET_SIZE,
            payload_type: 96,
            ssrc: 0x1234_5678,
            random_ssrc: false,
            poll_interval: Duration::from_millis(5),
            frame_capacity: 1024 * 1024,
        }
    }
}

impl RtpConfig {
    pub fn validate(&self) -> Result<()> {
        // Room for the fixed header plus a 3-byte H.265 FU header and data.
        if self.packet_size <= RTP_HEADER_LEN + 3 {
            return Err(MediaError::config(format!(
                "packet size {} leaves no room for payload",
                self.packet_size
            )));
        }
        if self.payload_type > 127 {
            return Err(MediaError::config(format!(
                "payload type {} does not fit in 7 bits",
                self.payload_type
            )));
        }
        if self.destination.port() == 0 {
            return Err(MediaError::config("destination port must be non-zero"));
        }
        if self.frame_capacity == 0 {
            return Err(MediaError::config("frame capacity must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on one readiness wait.
    pub wait_timeout: Duration,
    /// Sleep when no channel is receiving.
    pub idle_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(100),
            idle_interval: Duration::from_millis(20),
        }
    }
}
