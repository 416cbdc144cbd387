//! Hardware module graph capability interface.
//!
//! Each chip family implements [`Hal`] once; the pipeline, graph and
//! dispatcher only ever see an `Arc<dyn Hal>` chosen at startup. The
//! interface is split per hardware block so a reader can see at a glance
//! which calls touch the sensor, the capture front end, the ISP, the
//! scaler, the system binder or the encoder.
//!
//! Every call returns the raw numeric status the chip layer reported
//! ([`HalCode`]). Callers attach the operation name with
//! [`HalResultExt::or_rejected`] when they turn it into a
//! [`MediaError::HardwareRejected`].
//!
//! [`sim::SimulatedHal`] is an in-memory implementation used by tests and
//! the demo binary.

pub mod sim;

use std::fmt;
use std::time::Duration;

use crate::config::EncoderProfile;
use crate::error::MediaError;
use crate::graph::{Binding, ModuleEndpoint};
use crate::media::{Codec, StreamPacket};
use crate::pipeline::rate::RateControl;

/// Raw failure code returned by the chip layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HalCode(pub i32);

impl fmt::Display for HalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

pub type HalResult<T> = std::result::Result<T, HalCode>;

/// Attach an operation name to a raw [`HalResult`].
pub trait HalResultExt<T> {
    fn or_rejected(self, op: &'static str) -> crate::Result<T>;
}

impl<T> HalResultExt<T> for HalResult<T> {
    fn or_rejected(self, op: &'static str) -> crate::Result<T> {
        self.map_err(|code| MediaError::HardwareRejected { op, code })
    }
}

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

/// One resolution/frame-rate mode the sensor driver offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorProfile {
    pub index: u8,
    pub crop_width: u32,
    pub crop_height: u32,
    pub max_fps: u32,
}

impl SensorProfile {
    pub fn satisfies(&self, width: u32, height: u32, framerate: u32) -> bool {
        self.crop_width >= width && self.crop_height >= height && self.max_fps >= framerate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorInterface {
    Mipi,
    Bt656,
    Parallel,
    Lvds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEdge {
    Single,
    Double,
}

/// Electrical side of the sensor: interface, clocking, HDR capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorPad {
    pub interface: SensorInterface,
    pub edge: ClockEdge,
    pub hdr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerPhase {
    Rg,
    Gr,
    Gb,
    Bg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, YUYV order.
    Yuv422Yuyv,
    /// 4:2:0 semi-planar (NV12).
    Yuv420Sp,
    Bayer { bit_depth: u8, phase: BayerPhase },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Pixel side of the sensor: data layout and active capture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorPlane {
    /// `Some` when the sensor emits raw Bayer data.
    pub bayer: Option<BayerPhase>,
    pub bit_depth: u8,
    /// Format used when the plane is not Bayer.
    pub native_format: PixelFormat,
    pub capture: Rect,
}

impl SensorPlane {
    /// Format the capture device must be programmed with.
    pub fn capture_format(&self) -> PixelFormat {
        match self.bayer {
            Some(phase) => PixelFormat::Bayer {
                bit_depth: self.bit_depth,
                phase,
            },
            None => self.native_format,
        }
    }
}

pub trait SensorOps {
    fn set_sensor_hdr(&self, sensor: u8, hdr: bool) -> HalResult<()>;
    /// Candidate modes, in driver order.
    fn sensor_profiles(&self, sensor: u8) -> HalResult<Vec<SensorProfile>>;
    fn set_sensor_profile(&self, sensor: u8, profile: u8) -> HalResult<()>;
    fn set_sensor_framerate(&self, sensor: u8, fps: u32) -> HalResult<()>;
    fn enable_sensor(&self, sensor: u8) -> HalResult<()>;
    fn disable_sensor(&self, sensor: u8) -> HalResult<()>;
    fn sensor_pad(&self, sensor: u8) -> HalResult<SensorPad>;
    fn sensor_plane(&self, sensor: u8, hdr: bool) -> HalResult<SensorPlane>;
}

// ---------------------------------------------------------------------------
// Capture front end (VIF)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureGroupConfig {
    pub interface: SensorInterface,
    pub edge: ClockEdge,
    pub hdr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDeviceConfig {
    pub pixel_format: PixelFormat,
    pub crop: Rect,
}

pub trait CaptureOps {
    fn create_capture_group(&self, group: u8, config: &CaptureGroupConfig) -> HalResult<()>;
    fn destroy_capture_group(&self, group: u8) -> HalResult<()>;
    fn configure_capture_device(&self, device: u8, config: &CaptureDeviceConfig) -> HalResult<()>;
    fn enable_capture_device(&self, device: u8) -> HalResult<()>;
    fn disable_capture_device(&self, device: u8) -> HalResult<()>;
    fn enable_capture_port(&self, device: u8, port: u8) -> HalResult<()>;
    fn disable_capture_port(&self, device: u8, port: u8) -> HalResult<()>;
}

// ---------------------------------------------------------------------------
// ISP and scaler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Cw90,
    Cw180,
    Cw270,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IspChannelParams {
    pub hdr: bool,
    pub mirror: bool,
    pub flip: bool,
    pub rotation: Rotation,
    /// Convert YUV sensor input to Bayer before the ISP pipeline.
    pub yuv_to_bayer: bool,
}

/// Output port settings shared by the ISP and the scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub compress: bool,
}

pub trait IspOps {
    fn create_isp_device(&self, device: u8) -> HalResult<()>;
    fn destroy_isp_device(&self, device: u8) -> HalResult<()>;
    fn create_isp_channel(&self, device: u8, channel: u8, sensor: u8) -> HalResult<()>;
    fn destroy_isp_channel(&self, device: u8, channel: u8) -> HalResult<()>;
    fn set_isp_channel_params(&self, device: u8, channel: u8, params: &IspChannelParams) -> HalResult<()>;
    fn start_isp_channel(&self, device: u8, channel: u8) -> HalResult<()>;
    fn stop_isp_channel(&self, device: u8, channel: u8) -> HalResult<()>;
    fn set_isp_port(&self, device: u8, channel: u8, port: u8, config: &PortConfig) -> HalResult<()>;
    fn enable_isp_port(&self, device: u8, channel: u8, port: u8) -> HalResult<()>;
    fn disable_isp_port(&self, device: u8, channel: u8, port: u8) -> HalResult<()>;
    /// Colour-to-grayscale conversion on the ISP output.
    fn set_grayscale(&self, device: u8, channel: u8, enable: bool) -> HalResult<()>;
}

pub trait ScalerOps {
    /// `port_mask` reserves physical output ports (bit n = port n).
    fn create_scaler_device(&self, device: u8, port_mask: u32) -> HalResult<()>;
    fn destroy_scaler_device(&self, device: u8) -> HalResult<()>;
    fn create_scaler_channel(&self, device: u8, channel: u8) -> HalResult<()>;
    fn destroy_scaler_channel(&self, device: u8, channel: u8) -> HalResult<()>;
    fn start_scaler_channel(&self, device: u8, channel: u8) -> HalResult<()>;
    fn stop_scaler_channel(&self, device: u8, channel: u8) -> HalResult<()>;
    fn set_scaler_port(&self, device: u8, channel: u8, port: u8, config: &PortConfig) -> HalResult<()>;
    fn enable_scaler_port(&self, device: u8, channel: u8, port: u8) -> HalResult<()>;
    fn disable_scaler_port(&self, device: u8, channel: u8, port: u8) -> HalResult<()>;
}

// ---------------------------------------------------------------------------
// System binder and pools
// ---------------------------------------------------------------------------

/// Ring-buffered frame pool in front of an encoder device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub device: EncoderDevice,
    pub max_width: u32,
    pub max_height: u32,
    pub ring_lines: u32,
}

pub trait SystemOps {
    fn bind(&self, binding: &Binding) -> HalResult<()>;
    fn unbind(&self, source: &ModuleEndpoint, dest: &ModuleEndpoint) -> HalResult<()>;
    fn configure_pool(&self, pool: &PoolConfig) -> HalResult<()>;
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Encoder block family. MJPEG and JPEG share one device, H.264 and
/// H.265 the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderDevice {
    Jpeg,
    H26x,
}

impl EncoderDevice {
    pub fn for_codec(codec: Codec) -> Self {
        if codec.is_jpeg() { Self::Jpeg } else { Self::H26x }
    }

    /// Device id used in module endpoints.
    pub fn id(self) -> u8 {
        match self {
            Self::H26x => 0,
            Self::Jpeg => 8,
        }
    }
}

/// Everything the chip needs to create one encoder channel.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderAttributes {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub buffer_size: u32,
    pub profile: EncoderProfile,
    pub b_frames: u8,
    pub ref_frames: u8,
    pub rate: RateControl,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStatus {
    /// Packets in the oldest completed frame.
    pub pending_packets: u32,
}

/// Packets of one completed frame, as fetched from the encoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedStream {
    pub sequence: u32,
    pub packets: Vec<StreamPacket>,
}

/// Readiness descriptor of one encoder channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadyHandle(pub i32);

pub trait EncoderOps {
    fn create_encoder(&self, device: EncoderDevice, channel: u8, attrs: &EncoderAttributes) -> HalResult<()>;
    fn destroy_encoder(&self, device: EncoderDevice, channel: u8) -> HalResult<()>;
    fn start_receiving(&self, device: EncoderDevice, channel: u8) -> HalResult<()>;
    /// Start reception for exactly `frames` frames.
    fn start_receiving_frames(&self, device: EncoderDevice, channel: u8, frames: u32) -> HalResult<()>;
    fn stop_receiving(&self, device: EncoderDevice, channel: u8) -> HalResult<()>;
    fn set_jpeg_quality(&self, device: EncoderDevice, channel: u8, quality: u8) -> HalResult<()>;
    fn query(&self, device: EncoderDevice, channel: u8) -> HalResult<EncoderStatus>;
    fn fetch_stream(&self, device: EncoderDevice, channel: u8, packets: u32) -> HalResult<EncodedStream>;
    fn release_stream(&self, device: EncoderDevice, channel: u8, stream: &EncodedStream) -> HalResult<()>;
    fn descriptor(&self, device: EncoderDevice, channel: u8) -> HalResult<ReadyHandle>;
    fn release_descriptor(&self, device: EncoderDevice, channel: u8) -> HalResult<()>;
    /// Block until at least one handle is readable or `timeout` expires.
    /// Returns the readable subset; empty on timeout.
    fn wait_ready(&self, handles: &[ReadyHandle], timeout: Duration) -> HalResult<Vec<ReadyHandle>>;
}

/// One chip family.
pub trait Hal: SensorOps + CaptureOps + IspOps + ScalerOps + SystemOps + EncoderOps + Send + Sync {
    fn family(&self) -> &'static str;
}
