//! Network transport for RTP media delivery.
//!
//! RTP leaves the camera over a single unconnected UDP socket aimed at
//! one destination supplied at stream start. Loss is tolerated: a failed
//! send is reported to the caller and never retried here.

pub mod udp;

pub use udp::UdpTransport;
