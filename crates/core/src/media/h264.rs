//! H.264 NAL syntax for RTP (RFC 6184).
//!
//! ## Single NAL Unit packets (§5.6)
//!
//! NALs that fit in one RTP payload are sent verbatim. The 1-byte NAL
//! header is `[F|NRI|Type]`.
//!
//! ## FU-A fragmentation (§5.8)
//!
//! Larger NALs drop their 1-byte header and are split across packets,
//! each prefixed with two bytes:
//!
//! ```text
//! FU indicator:  [F|NRI|Type=28]     (1 byte)
//! FU header:     [S|E|R|NAL_Type]    (1 byte)
//! Fragment data: [...]
//! ```

use super::packetizer::NalSyntax;

/// FU-A packet type (RFC 6184 §5.8).
pub const FU_A: u8 = 28;

/// H.264 NAL unit types (ITU-T H.264 Table 7-1) the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalType {
    /// Coded slice of a non-IDR picture.
    Slice,
    /// Coded slice of an IDR picture (keyframe).
    Idr,
    /// Supplemental enhancement information.
    Sei,
    /// Sequence parameter set.
    Sps,
    /// Picture parameter set.
    Pps,
    /// Any other type.
    Other(u8),
}

impl From<u8> for NalType {
    fn from(header: u8) -> Self {
        match header & 0x1f {
            1 => Self::Slice,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            n => Self::Other(n),
        }
    }
}

impl NalType {
    /// Parameter sets and SEI never carry the RTP marker bit.
    pub fn is_unmarked(self) -> bool {
        matches!(self, Self::Sps | Self::Pps | Self::Sei)
    }
}

/// Marker type selecting H.264 rules in [`RtpPacketizer`](super::RtpPacketizer).
#[derive(Debug, Clone, Copy)]
pub struct H264;

impl NalSyntax for H264 {
    const HEADER_LEN: usize = 1;
    const FU_HEADER_LEN: usize = 2;

    fn nal_type(nal: &[u8]) -> u8 {
        nal[0] & 0x1f
    }

    fn is_marked(nal: &[u8]) -> bool {
        !NalType::from(nal[0]).is_unmarked()
    }

    fn write_fu_header(nal: &[u8], start: bool, end: bool, out: &mut Vec<u8>) {
        let nri = nal[0] & 0x60;
        out.push(nri | FU_A);
        out.push(((start as u8) << 7) | ((end as u8) << 6) | Self::nal_type(nal));
    }
}

/// Whether any NAL in the access unit is an IDR slice.
pub fn contains_idr<'a>(mut nals: impl Iterator<Item = &'a [u8]>) -> bool {
    nals.any(|nal| !nal.is_empty() && NalType::from(nal[0]) == NalType::Idr)
}
