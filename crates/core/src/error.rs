//! Error types for the capture pipeline and RTP streaming engine.

use std::fmt;
use std::time::Duration;

use crate::graph::ModuleEndpoint;
use crate::hal::HalCode;

/// Errors that can occur across the media stack.
///
/// Variants map to specific failure modes:
///
/// - **Configuration**: [`Configuration`](Self::Configuration), rejected
///   before any hardware call is made.
/// - **Hardware**: [`HardwareRejected`](Self::HardwareRejected), the chip
///   layer returned a failure code for a well-formed request.
/// - **Resources**: [`NoMatchingProfile`](Self::NoMatchingProfile),
///   [`EmptyFrame`](Self::EmptyFrame), [`FrameTooLarge`](Self::FrameTooLarge).
/// - **Graph**: [`HardwareBusy`](Self::HardwareBusy),
///   [`InvalidEndpoint`](Self::InvalidEndpoint), [`NotBound`](Self::NotBound).
/// - **Lifecycle**: [`InvalidChannel`](Self::InvalidChannel),
///   [`ChannelBusy`](Self::ChannelBusy),
///   [`ChannelNotActive`](Self::ChannelNotActive),
///   [`PipelineNotBuilt`](Self::PipelineNotBuilt),
///   [`PipelineAlreadyBuilt`](Self::PipelineAlreadyBuilt).
/// - **Timing / I/O**: [`Timeout`](Self::Timeout), [`Io`](Self::Io).
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Unsupported codec/mode combination or out-of-range setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The hardware layer refused an otherwise well-formed request.
    #[error("{op} rejected by hardware with {code}")]
    HardwareRejected { op: &'static str, code: HalCode },

    /// No sensor profile meets the requested resolution and frame rate.
    #[error("no sensor profile supports {width}x{height}@{framerate}")]
    NoMatchingProfile {
        width: u32,
        height: u32,
        framerate: u32,
    },

    /// The encoder signalled readiness but had no packets to hand out.
    #[error("encoder channel {0} produced an empty frame")]
    EmptyFrame(u8),

    /// The frame does not fit the handoff buffer.
    #[error("frame of {size} bytes exceeds handoff capacity of {capacity} bytes")]
    FrameTooLarge { size: usize, capacity: usize },

    /// A bounded wait expired.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// The endpoint already carries a binding on that port.
    #[error("endpoint {0} is already bound")]
    HardwareBusy(ModuleEndpoint),

    /// The endpoint is not currently enabled.
    #[error("endpoint {0} is not enabled")]
    InvalidEndpoint(ModuleEndpoint),

    /// No binding exists between the two endpoints.
    #[error("no binding from {from} to {to}")]
    NotBound {
        from: ModuleEndpoint,
        to: ModuleEndpoint,
    },

    /// Channel index is outside the channel table.
    #[error("encoder channel {0} is out of range")]
    InvalidChannel(u8),

    /// Channel slot is already in use.
    #[error("encoder channel {0} is already in use")]
    ChannelBusy(u8),

    /// Channel slot is idle.
    #[error("encoder channel {0} is not active")]
    ChannelNotActive(u8),

    /// [`Pipeline::build`](crate::Pipeline::build) has not been called or
    /// the pipeline was already destroyed.
    #[error("pipeline not built")]
    PipelineNotBuilt,

    /// [`Pipeline::build`](crate::Pipeline::build) was called twice.
    #[error("pipeline already built")]
    PipelineAlreadyBuilt,

    /// Underlying socket or thread error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Symbolic kind of a [`MediaError`], used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigurationError,
    HardwareRejected,
    ResourceUnavailable,
    Timeout,
    TransientIoFailure,
    HardwareBusy,
    InvalidEndpoint,
    NotBound,
    InvalidState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConfigurationError => "ConfigurationError",
            Self::HardwareRejected => "HardwareRejected",
            Self::ResourceUnavailable => "ResourceUnavailable",
            Self::Timeout => "Timeout",
            Self::TransientIoFailure => "TransientIOFailure",
            Self::HardwareBusy => "HardwareBusy",
            Self::InvalidEndpoint => "InvalidEndpoint",
            Self::NotBound => "NotBound",
            Self::InvalidState => "InvalidState",
        };
        f.write_str(name)
    }
}

impl MediaError {
    /// Symbolic kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::InvalidChannel(_) => ErrorKind::ConfigurationError,
            Self::HardwareRejected { .. } => ErrorKind::HardwareRejected,
            Self::NoMatchingProfile { .. } | Self::EmptyFrame(_) | Self::FrameTooLarge { .. } => {
                ErrorKind::ResourceUnavailable
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::TransientIoFailure,
            Self::HardwareBusy(_) => ErrorKind::HardwareBusy,
            Self::InvalidEndpoint(_) => ErrorKind::InvalidEndpoint,
            Self::NotBound { .. } | Self::ChannelNotActive(_) | Self::PipelineNotBuilt => {
                ErrorKind::NotBound
            }
            Self::ChannelBusy(_) | Self::PipelineAlreadyBuilt => ErrorKind::InvalidState,
        }
    }

    /// Raw numeric code reported by the hardware layer, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::HardwareRejected { code, .. } => Some(code.0),
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Convenience alias for `Result<T, MediaError>`.
pub type Result<T> = std::result::Result<T, MediaError>;
