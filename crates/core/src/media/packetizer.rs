use super::Codec;
use super::annexb;
use super::h264::H264;
use super::h265::H265;
use super::params::ParameterSets;
use super::rtp::{RTP_HEADER_LEN, RtpClock, RtpHeader, WallClock};
use crate::error::{MediaError, Result};

/// Default RTP packet size: the largest UDP payload on a 1500-byte
/// Ethernet MTU (1500 − 20 IPv4 − 8 UDP).
pub const DEFAULT_PACKET_SIZE: usize = 1472;

/// Per-codec NAL header rules used by [`RtpPacketizer`].
///
/// H.264 and H.265 share one fragmentation algorithm and differ only in
/// header sizes, the type field, and which types carry the marker bit.
pub trait NalSyntax {
    /// Bytes of the original NAL header dropped when fragmenting.
    const HEADER_LEN: usize;
    /// Bytes of fragmentation header at the front of every fragment.
    const FU_HEADER_LEN: usize;

    /// NAL unit type field. `nal` is non-empty.
    fn nal_type(nal: &[u8]) -> u8;

    /// Whether a single-packet NAL gets the RTP marker bit.
    fn is_marked(nal: &[u8]) -> bool;

    /// Append the fragmentation header for one fragment of `nal`.
    fn write_fu_header(nal: &[u8], start: bool, end: bool, out: &mut Vec<u8>);
}

/// H.264/H.265 RTP packetizer (RFC 6184, RFC 7798).
///
/// Turns one NAL unit into one or more RTP packets:
///
/// - **Single NAL Unit**: a NAL no larger than
///   [`max_payload`](Self::max_payload) is sent verbatim. Marker = 1
///   unless the NAL is a parameter set or SEI.
/// - **Fragmentation**: larger NALs lose their header and are split into
///   fragments of `max_payload` bytes (fragmentation header included); the
///   last fragment carries the remainder, the end bit, and marker = 1.
///
/// One packetizer owns one [`RtpHeader`], so sequence numbers run
/// continuously across codecs, channels and fragment boundaries. The RTP
/// timestamp is sampled from the [`RtpClock`] for every emitted packet.
pub struct RtpPacketizer {
    header: RtpHeader,
    max_payload: usize,
    clock: Box<dyn RtpClock>,
    params: ParameterSets,
}

impl RtpPacketizer {
    /// Create with explicit payload type, SSRC and RTP packet size
    /// (header included).
    pub fn new(pt: u8, ssrc: u32, packet_size: usize) -> Result<Self> {
        Self::with_header(RtpHeader::new(pt, ssrc), packet_size)
    }

    /// Create with a random SSRC picked once for the packetizer's lifetime.
    pub fn with_random_ssrc(pt: u8, packet_size: usize) -> Result<Self> {
        Self::with_header(RtpHeader::with_random_ssrc(pt), packet_size)
    }

    fn with_header(header: RtpHeader, packet_size: usize) -> Result<Self> {
        let max_payload = packet_size.saturating_sub(RTP_HEADER_LEN);
        if max_payload <= H265::FU_HEADER_LEN {
            return Err(MediaError::config(format!(
                "RTP packet size {packet_size} leaves no room for fragment data"
            )));
        }
        Ok(Self {
            header,
            max_payload,
            clock: Box::new(WallClock),
            params: ParameterSets::default(),
        })
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: impl RtpClock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Largest RTP payload: packet size minus the fixed RTP header.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Sequence number of the next emitted packet.
    pub fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.header.pt
    }

    /// Parameter sets seen so far in the packetized stream.
    pub fn parameter_sets(&self) -> &ParameterSets {
        &self.params
    }

    /// Packetize one NAL unit of `codec`.
    ///
    /// An empty NAL produces no packets. Only H.264 and H.265 are
    /// packetized; JPEG codecs are a configuration error.
    pub fn packetize(&mut self, codec: Codec, nal: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.params.observe(codec, nal);
        match codec {
            Codec::H264 => Ok(self.packetize_nal::<H264>(nal)),
            Codec::H265 => Ok(self.packetize_nal::<H265>(nal)),
            Codec::Mjpeg | Codec::Jpeg => Err(MediaError::config(format!(
                "{codec:?} has no RTP packetization on this path"
            ))),
        }
    }

    /// Split an Annex B access unit and packetize every NAL in order.
    pub fn packetize_access_unit(&mut self, codec: Codec, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();
        for nal in annexb::nal_units(data) {
            packets.append(&mut self.packetize(codec, nal)?);
        }
        Ok(packets)
    }

    fn packetize_nal<S: NalSyntax>(&mut self, nal: &[u8]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();

        if nal.is_empty() {
            return packets;
        }

        if nal.len() <= self.max_payload {
            let hdr = self.header.write(S::is_marked(nal), self.clock.rtp_timestamp());
            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + nal.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(nal);
            packets.push(packet);
            return packets;
        }

        let payload = &nal[S::HEADER_LEN..];
        let max_fragment = self.max_payload - S::FU_HEADER_LEN;
        let mut offset = 0usize;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last = remaining <= max_fragment;
            let chunk_size = remaining.min(max_fragment);
            let chunk = &payload[offset..offset + chunk_size];

            let hdr = self.header.write(last, self.clock.rtp_timestamp());
            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + S::FU_HEADER_LEN + chunk.len());
            packet.extend_from_slice(&hdr);
            S::write_fu_header(nal, offset == 0, last, &mut packet);
            packet.extend_from_slice(chunk);
            packets.push(packet);

            offset += chunk_size;
        }

        tracing::trace!(
            nal_type = S::nal_type(nal),
            nal_size = nal.len(),
            fragments = packets.len(),
            "fragmented NAL unit"
        );

        packets
    }
}
