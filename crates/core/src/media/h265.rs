//! H.265 (HEVC) NAL syntax for RTP (RFC 7798).
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** `[F|Type(6)|LayerId(6)|TID(3)]`; the type
//!   sits in bits 1..6 of the first byte.
//! - **Fragmentation units** (§4.4.3) carry a 2-byte PayloadHdr with
//!   type 49 followed by a 1-byte FU header `[S|E|FuType(6)]`, so each
//!   fragment spends three bytes on headers.

use super::packetizer::NalSyntax;

/// Fragmentation unit PayloadHdr type (RFC 7798 §4.4.3).
pub const FU: u8 = 49;

/// First parameter-set class type (VPS). Everything from here up is
/// never marked.
pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;

/// IRAP picture range (BLA_W_LP ..= CRA_NUT).
const IRAP_FIRST: u8 = 16;
const IRAP_LAST: u8 = 21;

/// Marker type selecting H.265 rules in [`RtpPacketizer`](super::RtpPacketizer).
#[derive(Debug, Clone, Copy)]
pub struct H265;

impl NalSyntax for H265 {
    const HEADER_LEN: usize = 2;
    const FU_HEADER_LEN: usize = 3;

    fn nal_type(nal: &[u8]) -> u8 {
        (nal[0] >> 1) & 0x3f
    }

    fn is_marked(nal: &[u8]) -> bool {
        Self::nal_type(nal) < NAL_VPS
    }

    fn write_fu_header(nal: &[u8], start: bool, end: bool, out: &mut Vec<u8>) {
        out.push((FU << 1) | (nal[0] & 0x81));
        out.push(nal.get(1).copied().unwrap_or(1));
        out.push(((start as u8) << 7) | ((end as u8) << 6) | Self::nal_type(nal));
    }
}

/// Whether any NAL in the access unit is an IRAP picture.
pub fn contains_irap<'a>(mut nals: impl Iterator<Item = &'a [u8]>) -> bool {
    nals.any(|nal| {
        !nal.is_empty() && (IRAP_FIRST..=IRAP_LAST).contains(&H265::nal_type(nal))
    })
}
