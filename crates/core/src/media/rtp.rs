use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngExt;

/// Size of the RTP fixed header with no CSRC entries.
pub const RTP_HEADER_LEN: usize = 12;

/// Video media clock rate (RFC 3551 §5).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Generic RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Owns the two pieces of per-sender state:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet
///   regardless of codec or channel.
/// - **SSRC**: fixed for the lifetime of the header. No collision
///   negotiation is performed.
///
/// The timestamp is supplied per packet by the caller (see [`RtpClock`]).
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
}

impl RtpHeader {
    /// Create a new RTP header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence: 0,
        }
    }

    /// Create with a random SSRC, picked once.
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    /// Sequence number the next [`write`](Self::write) call will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    pub fn write(&mut self, marker: bool, timestamp: u32) -> [u8; RTP_HEADER_LEN] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((marker as u8) << 7) | self.pt;

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }
}

/// Source of RTP timestamps, sampled once per emitted packet.
pub trait RtpClock: Send {
    /// Current media time on the 90 kHz clock, truncated to 32 bits.
    fn rtp_timestamp(&self) -> u32;
}

/// Wall-clock milliseconds scaled to 90 kHz.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl RtpClock for WallClock {
    fn rtp_timestamp(&self) -> u32 {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        millis_to_rtp(millis)
    }
}

/// Scale milliseconds to the 90 kHz video clock, keeping the low 32 bits.
pub fn millis_to_rtp(millis: u64) -> u32 {
    millis.wrapping_mul((VIDEO_CLOCK_RATE / 1000) as u64) as u32
}
