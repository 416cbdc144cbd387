use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::Codec;
use super::h264::NalType;
use super::h265::{self, H265};
use super::packetizer::NalSyntax;

/// Latest parameter sets observed in the outgoing bitstream.
///
/// The RTSP and MP4 collaborators need VPS/SPS/PPS out of band (SDP
/// `fmtp`, `avcC`/`hvcC` boxes). The packetizer records them as they
/// stream past so neither collaborator has to parse the bitstream again.
#[derive(Debug, Default, Clone)]
pub struct ParameterSets {
    pub vps: Option<Vec<u8>>,
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl ParameterSets {
    /// Record `nal` if it is a parameter set for `codec`.
    pub fn observe(&mut self, codec: Codec, nal: &[u8]) {
        if nal.is_empty() {
            return;
        }
        let slot = match codec {
            Codec::H264 => match NalType::from(nal[0]) {
                NalType::Sps => &mut self.sps,
                NalType::Pps => &mut self.pps,
                _ => return,
            },
            Codec::H265 => match H265::nal_type(nal) {
                h265::NAL_VPS => &mut self.vps,
                h265::NAL_SPS => &mut self.sps,
                h265::NAL_PPS => &mut self.pps,
                _ => return,
            },
            Codec::Mjpeg | Codec::Jpeg => return,
        };
        if slot.as_deref() != Some(nal) {
            tracing::debug!(?codec, bytes = nal.len(), "parameter set captured");
            *slot = Some(nal.to_vec());
        }
    }

    /// `profile-level-id` from the H.264 SPS (RFC 6184 §8.1): bytes 1–3 are
    /// profile_idc, constraint flags, level_idc.
    pub fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    /// Codec-specific `a=fmtp` parameters, without the `a=fmtp:<pt> ` prefix.
    ///
    /// - H.264: `packetization-mode=1[;profile-level-id=..][;sprop-parameter-sets=..]`
    /// - H.265: `sprop-vps=..;sprop-sps=..;sprop-pps=..` once all three are known
    pub fn fmtp(&self, codec: Codec) -> Option<String> {
        match codec {
            Codec::H264 => {
                let mut fmtp = String::from("packetization-mode=1");
                if let Some(pl) = self.profile_level_id() {
                    fmtp.push_str(&format!(";profile-level-id={pl}"));
                }
                if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                    fmtp.push_str(&format!(
                        ";sprop-parameter-sets={},{}",
                        BASE64_STANDARD.encode(sps),
                        BASE64_STANDARD.encode(pps)
                    ));
                }
                Some(fmtp)
            }
            Codec::H265 => {
                let (vps, sps, pps) = (self.vps.as_ref()?, self.sps.as_ref()?, self.pps.as_ref()?);
                Some(format!(
                    "sprop-vps={};sprop-sps={};sprop-pps={}",
                    BASE64_STANDARD.encode(vps),
                    BASE64_STANDARD.encode(sps),
                    BASE64_STANDARD.encode(pps)
                ))
            }
            Codec::Mjpeg | Codec::Jpeg => None,
        }
    }
}
