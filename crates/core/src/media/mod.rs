//! Codec vocabulary, access units, and RTP packetization.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded NAL unit becomes one or more RTP packets. Every packet
//! carries a 12-byte fixed header ([`rtp::RtpHeader`]) with:
//!
//! - **Sequence number** (16-bit, wrapping): one counter per sender.
//! - **Timestamp** (32-bit): 90 kHz media clock sampled per packet.
//! - **SSRC** (32-bit): fixed for the sender's lifetime.
//! - **Marker bit**: set on picture data and on the last fragment.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) |
//!
//! MJPEG/JPEG channels are encoded and dispatched but not packetized here.

pub mod annexb;
pub mod h264;
pub mod h265;
pub mod packetizer;
pub mod params;
pub mod rtp;

use std::ops::Range;

pub use packetizer::{DEFAULT_PACKET_SIZE, NalSyntax, RtpPacketizer};
pub use params::ParameterSets;
pub use rtp::{RtpClock, RtpHeader, WallClock};

/// Encoder output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
    /// Motion JPEG stream.
    Mjpeg,
    /// Single-shot JPEG (snapshots).
    Jpeg,
}

impl Codec {
    /// MJPEG and JPEG share the JPEG encoder device.
    pub fn is_jpeg(self) -> bool {
        matches!(self, Self::Mjpeg | Self::Jpeg)
    }
}

/// One raw packet fetched from an encoder channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    pub data: Vec<u8>,
    /// Capture timestamp in microseconds, as reported by the encoder.
    pub timestamp_us: u64,
}

/// One encoder output: a complete frame made of codec sub-units.
///
/// Built once per completed encode by the stream dispatcher and handed by
/// value to whichever consumer is routed for its channel.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// Encoder channel that produced this unit.
    pub channel: u8,
    pub codec: Codec,
    /// Stream sequence number reported by the encoder.
    pub sequence: u32,
    /// Capture timestamp of the first packet, in microseconds.
    pub timestamp_us: u64,
    pub key_frame: bool,
    data: Vec<u8>,
    units: Vec<Range<usize>>,
    packets: Vec<PacketSpan>,
}

/// Where one fetched packet sits inside the unit's data.
#[derive(Debug, Clone)]
struct PacketSpan {
    range: Range<usize>,
    timestamp_us: u64,
}

/// One packet of an [`AccessUnit`], borrowed in fetch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRef<'a> {
    pub data: &'a [u8],
    pub timestamp_us: u64,
}

impl AccessUnit {
    /// Assemble an access unit from the ordered packets of one frame.
    ///
    /// H.26x data is split on Annex B start codes; a JPEG frame is one
    /// sub-unit and always a key frame.
    pub fn from_packets(channel: u8, codec: Codec, sequence: u32, packets: &[StreamPacket]) -> Self {
        let timestamp_us = packets.first().map(|p| p.timestamp_us).unwrap_or(0);
        let mut data = Vec::with_capacity(packets.iter().map(|p| p.data.len()).sum());
        let mut spans = Vec::with_capacity(packets.len());
        for packet in packets {
            let start = data.len();
            data.extend_from_slice(&packet.data);
            spans.push(PacketSpan {
                range: start..data.len(),
                timestamp_us: packet.timestamp_us,
            });
        }

        let units = if codec.is_jpeg() {
            if data.is_empty() { Vec::new() } else { vec![0..data.len()] }
        } else {
            annexb::nal_ranges(&data)
        };

        let key_frame = match codec {
            Codec::H264 => h264::contains_idr(units.iter().map(|r| &data[r.clone()])),
            Codec::H265 => h265::contains_irap(units.iter().map(|r| &data[r.clone()])),
            Codec::Mjpeg | Codec::Jpeg => true,
        };

        Self {
            channel,
            codec,
            sequence,
            timestamp_us,
            key_frame,
            data,
            units,
            packets: spans,
        }
    }

    /// Raw frame bytes (Annex B for H.26x).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Sub-units in stream order, start codes excluded.
    pub fn units(&self) -> impl Iterator<Item = &[u8]> {
        self.units.iter().map(|r| &self.data[r.clone()])
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// The packets the encoder returned, in fetch order, with their own
    /// capture timestamps.
    pub fn packets(&self) -> impl Iterator<Item = PacketRef<'_>> {
        self.packets.iter().map(|p| PacketRef {
            data: &self.data[p.range.clone()],
            timestamp_us: p.timestamp_us,
        })
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
