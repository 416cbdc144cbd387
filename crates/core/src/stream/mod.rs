//! Runtime data path: encoder → dispatcher → handoff → RTP sender.
//!
//! ```text
//!  encoder channels ──► StreamDispatcher ──► consumer (per channel)
//!                                              │
//!                                              ▼
//!                                         FrameHandoff ──► RtpSender ──► UDP
//! ```
//!
//! The dispatcher and the sender each run on their own OS thread and stop
//! at their next loop boundary once the shared running flag clears.

pub mod dispatch;
pub mod handoff;
pub mod sender;
pub mod stats;

pub use dispatch::{RouteTable, StreamConsumer, StreamDispatcher};
pub use handoff::{Frame, FrameHandoff};
pub use sender::RtpSender;
pub use stats::{DispatchSnapshot, DispatchStats, StreamerSnapshot, StreamerStats};
