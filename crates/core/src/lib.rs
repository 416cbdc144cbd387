//! Capture pipeline orchestration and RTP streaming for IP cameras.
//!
//! - [`graph`]: typed module endpoints and bindings.
//! - [`pipeline`]: sensor → ISP → scaler bring-up/teardown and encoder
//!   channels with rate-control translation.
//! - [`stream`]: the dispatcher, the frame handoff and the RTP sender.
//! - [`media`]: codec vocabulary, Annex B parsing and RTP packetization.
//! - [`hal`]: the chip-family capability interface.

pub mod config;
pub mod error;
pub mod graph;
pub mod hal;
pub mod media;
pub mod pipeline;
pub mod stream;
pub mod transport;

pub use config::{DispatcherConfig, EncoderConfig, EncoderProfile, PipelineConfig, RateMode, RtpConfig};
pub use error::{ErrorKind, MediaError, Result};
pub use graph::{Binding, LinkMode, ModuleEndpoint, ModuleGraph, ModuleKind};
pub use hal::Hal;
pub use media::{AccessUnit, Codec, RtpPacketizer};
pub use pipeline::{ChannelState, ChannelTable, Pipeline, RateControl};
pub use stream::{FrameHandoff, RtpSender, StreamConsumer, StreamDispatcher};
