//! Capture-to-encode pipeline manager.
//!
//! Brings the sensor → capture → ISP → scaler chain online in a fixed
//! order and tears it down in exactly the reverse order. Encoder channels
//! hang off the scaler's output ports, one port per channel index.
//!
//! Bring-up stops at the first failing step and leaves whatever was
//! already created in place; [`Pipeline::destroy`] releases it. Teardown
//! never stops early: every step is attempted, failures are logged, and
//! the first one is returned at the end.

pub mod channel;
pub mod rate;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{EncoderConfig, PipelineConfig};
use crate::error::{MediaError, Result};
use crate::graph::{LinkMode, ModuleEndpoint, ModuleGraph, ModuleKind};
use crate::hal::{
    CaptureDeviceConfig, CaptureGroupConfig, ClockEdge, EncoderAttributes, EncoderDevice, Hal,
    HalResult, HalResultExt, IspChannelParams, PixelFormat, PoolConfig, PortConfig, Rotation,
    SensorInterface, SensorProfile,
};
use crate::media::Codec;

pub use channel::{ChannelState, ChannelTable, EncoderChannel};
pub use rate::{FrameRate, RateControl};

/// Encoder dimensions must be multiples of this.
pub const DIMENSION_ALIGN: u32 = 16;

fn align_down(value: u32) -> u32 {
    value & !(DIMENSION_ALIGN - 1)
}

/// First profile, in ascending order, that covers the request.
pub fn select_profile(
    profiles: &[SensorProfile],
    width: u32,
    height: u32,
    framerate: u32,
) -> Result<SensorProfile> {
    let mut sorted = profiles.to_vec();
    sorted.sort_by_key(|p| p.index);
    sorted
        .into_iter()
        .find(|p| p.satisfies(width, height, framerate))
        .ok_or(MediaError::NoMatchingProfile {
            width,
            height,
            framerate,
        })
}

/// Bring-up steps, in order. Teardown undoes every step up to and
/// including the last one started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Sensor,
    Capture,
    Isp,
    Scaler,
    Bindings,
}

#[derive(Debug)]
struct Active {
    reached: Stage,
    profile: Option<SensorProfile>,
}

/// Collects teardown failures without stopping.
#[derive(Default)]
struct Teardown {
    first: Option<MediaError>,
}

impl Teardown {
    fn hal(&mut self, op: &'static str, result: HalResult<()>) {
        self.check(result.or_rejected(op));
    }

    fn check(&mut self, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, code = ?e.code(), "teardown step failed");
            self.first.get_or_insert(e);
        }
    }

    fn finish(self) -> Result<()> {
        self.first.map_or(Ok(()), Err)
    }
}

/// One sensor-to-scaler pipeline and the encoder channels attached to it.
pub struct Pipeline {
    hal: Arc<dyn Hal>,
    config: PipelineConfig,
    graph: ModuleGraph,
    channels: Arc<ChannelTable>,
    active: Option<Active>,
}

impl Pipeline {
    pub fn new(hal: Arc<dyn Hal>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let channels = Arc::new(ChannelTable::new(config.scaler_ports));
        Ok(Self {
            graph: ModuleGraph::new(hal.clone()),
            hal,
            config,
            channels,
            active: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Channel table shared with the stream dispatcher.
    pub fn channels(&self) -> Arc<ChannelTable> {
        self.channels.clone()
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn is_built(&self) -> bool {
        self.active.is_some()
    }

    /// Sensor profile chosen by [`build`](Self::build).
    pub fn profile(&self) -> Option<SensorProfile> {
        self.active.as_ref().and_then(|a| a.profile)
    }

    fn sensor_endpoint(&self) -> ModuleEndpoint {
        ModuleEndpoint::new(ModuleKind::Sensor, self.config.sensor, 0, 0)
    }

    fn capture_endpoint(&self) -> ModuleEndpoint {
        ModuleEndpoint::new(ModuleKind::Capture, self.config.layout.capture_device, 0, 0)
    }

    fn isp_endpoint(&self) -> ModuleEndpoint {
        let l = &self.config.layout;
        ModuleEndpoint::new(ModuleKind::Isp, l.isp_device, l.isp_channel, l.isp_port)
    }

    fn scaler_endpoint(&self, port: u8) -> ModuleEndpoint {
        let l = &self.config.layout;
        ModuleEndpoint::new(ModuleKind::Scaler, l.scaler_device, l.scaler_channel, port)
    }

    fn encoder_endpoint(device: EncoderDevice, index: u8) -> ModuleEndpoint {
        ModuleEndpoint::new(ModuleKind::Encoder, device.id(), index, 0)
    }

    fn enter(&mut self, stage: Stage) {
        if let Some(active) = self.active.as_mut() {
            active.reached = stage;
        } else {
            self.active = Some(Active {
                reached: stage,
                profile: None,
            });
        }
    }

    /// Bring the sensor → capture → ISP → scaler chain online.
    pub fn build(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(MediaError::PipelineAlreadyBuilt);
        }
        let cfg = self.config.clone();
        let layout = cfg.layout;
        let hal = self.hal.clone();
        tracing::info!(
            family = hal.family(),
            width = cfg.width,
            height = cfg.height,
            framerate = cfg.framerate,
            "building pipeline"
        );

        // 1. Sensor
        self.enter(Stage::Sensor);
        hal.set_sensor_hdr(cfg.sensor, cfg.hdr).or_rejected("sensor.set_hdr")?;
        let profiles = hal.sensor_profiles(cfg.sensor).or_rejected("sensor.profiles")?;
        let profile = select_profile(&profiles, cfg.width, cfg.height, cfg.framerate)?;
        hal.set_sensor_profile(cfg.sensor, profile.index)
            .or_rejected("sensor.set_profile")?;
        hal.set_sensor_framerate(cfg.sensor, cfg.framerate)
            .or_rejected("sensor.set_fps")?;
        hal.enable_sensor(cfg.sensor).or_rejected("sensor.enable")?;
        if let Some(active) = self.active.as_mut() {
            active.profile = Some(profile);
        }
        self.graph.mark_enabled(self.sensor_endpoint());
        tracing::debug!(profile = profile.index, "sensor enabled");

        // 2. Capture front end
        self.enter(Stage::Capture);
        let pad = hal.sensor_pad(cfg.sensor).or_rejected("sensor.pad")?;
        let plane = hal.sensor_plane(cfg.sensor, cfg.hdr).or_rejected("sensor.plane")?;
        let group = CaptureGroupConfig {
            interface: pad.interface,
            edge: match pad.interface {
                SensorInterface::Bt656 => pad.edge,
                _ => ClockEdge::Double,
            },
            hdr: false,
        };
        hal.create_capture_group(layout.capture_group, &group)
            .or_rejected("capture.create_group")?;
        let device = CaptureDeviceConfig {
            pixel_format: plane.capture_format(),
            crop: plane.capture,
        };
        hal.configure_capture_device(layout.capture_device, &device)
            .or_rejected("capture.set_device")?;
        hal.enable_capture_device(layout.capture_device)
            .or_rejected("capture.enable_device")?;
        hal.enable_capture_port(layout.capture_device, 0)
            .or_rejected("capture.enable_port")?;
        self.graph.mark_enabled(self.capture_endpoint());

        // 3. ISP
        self.enter(Stage::Isp);
        hal.create_isp_device(layout.isp_device)
            .or_rejected("isp.create_device")?;
        hal.create_isp_channel(layout.isp_device, layout.isp_channel, cfg.sensor)
            .or_rejected("isp.create_channel")?;
        let params = IspChannelParams {
            hdr: pad.hdr,
            mirror: cfg.mirror,
            flip: cfg.flip,
            rotation: Rotation::None,
            yuv_to_bayer: plane.bayer.is_none(),
        };
        hal.set_isp_channel_params(layout.isp_device, layout.isp_channel, &params)
            .or_rejected("isp.set_params")?;
        hal.start_isp_channel(layout.isp_device, layout.isp_channel)
            .or_rejected("isp.start_channel")?;
        let isp_port = PortConfig {
            width: plane.capture.width,
            height: plane.capture.height,
            pixel_format: PixelFormat::Yuv422Yuyv,
            compress: false,
        };
        hal.set_isp_port(layout.isp_device, layout.isp_channel, layout.isp_port, &isp_port)
            .or_rejected("isp.set_port")?;
        hal.enable_isp_port(layout.isp_device, layout.isp_channel, layout.isp_port)
            .or_rejected("isp.enable_port")?;
        self.graph.mark_enabled(self.isp_endpoint());

        // 4. Scaler
        self.enter(Stage::Scaler);
        hal.create_scaler_device(layout.scaler_device, cfg.scaler_port_mask())
            .or_rejected("scaler.create_device")?;
        hal.create_scaler_channel(layout.scaler_device, layout.scaler_channel)
            .or_rejected("scaler.create_channel")?;
        hal.start_scaler_channel(layout.scaler_device, layout.scaler_channel)
            .or_rejected("scaler.start_channel")?;
        self.graph.mark_enabled(self.scaler_endpoint(0));

        // 5. Realtime links at the sensor rate
        self.enter(Stage::Bindings);
        let fps = cfg.framerate;
        let (capture, isp, scaler) = (self.capture_endpoint(), self.isp_endpoint(), self.scaler_endpoint(0));
        self.graph.bind(capture, isp, fps, fps, LinkMode::Realtime)?;
        self.graph.bind(isp, scaler, fps, fps, LinkMode::Realtime)?;

        tracing::info!(profile = profile.index, "pipeline online");
        Ok(())
    }

    /// Tear the pipeline down in reverse bring-up order.
    ///
    /// Encoder channels still attached are destroyed first. Works on a
    /// partially built pipeline. Fails with
    /// [`MediaError::PipelineNotBuilt`] when there is nothing to tear down.
    pub fn destroy(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Err(MediaError::PipelineNotBuilt);
        };
        tracing::info!(reached = ?active.reached, "destroying pipeline");
        let cfg = self.config.clone();
        let layout = cfg.layout;
        let hal = self.hal.clone();
        let mut td = Teardown::default();

        for index in self.channels.active_indices() {
            td.check(self.destroy_channel(index));
        }

        if active.reached >= Stage::Bindings {
            for (src, dst) in [
                (self.isp_endpoint(), self.scaler_endpoint(0)),
                (self.capture_endpoint(), self.isp_endpoint()),
            ] {
                if self.graph.is_bound(&src, &dst) {
                    td.check(self.graph.unbind(src, dst));
                }
            }
        }

        if active.reached >= Stage::Scaler {
            let (dev, chn) = (layout.scaler_device, layout.scaler_channel);
            for port in 0..cfg.scaler_ports {
                td.hal("scaler.disable_port", hal.disable_scaler_port(dev, chn, port));
            }
            td.hal("scaler.stop_channel", hal.stop_scaler_channel(dev, chn));
            td.hal("scaler.destroy_channel", hal.destroy_scaler_channel(dev, chn));
            td.hal("scaler.destroy_device", hal.destroy_scaler_device(dev));
            td.check(self.graph.mark_disabled(self.scaler_endpoint(0)));
        }

        if active.reached >= Stage::Isp {
            let (dev, chn) = (layout.isp_device, layout.isp_channel);
            td.hal("isp.disable_port", hal.disable_isp_port(dev, chn, layout.isp_port));
            td.hal("isp.stop_channel", hal.stop_isp_channel(dev, chn));
            td.hal("isp.destroy_channel", hal.destroy_isp_channel(dev, chn));
            td.hal("isp.destroy_device", hal.destroy_isp_device(dev));
            td.check(self.graph.mark_disabled(self.isp_endpoint()));
        }

        if active.reached >= Stage::Capture {
            let dev = layout.capture_device;
            td.hal("capture.disable_port", hal.disable_capture_port(dev, 0));
            td.hal("capture.disable_device", hal.disable_capture_device(dev));
            td.hal("capture.destroy_group", hal.destroy_capture_group(layout.capture_group));
            td.check(self.graph.mark_disabled(self.capture_endpoint()));
        }

        td.hal("sensor.disable", hal.disable_sensor(cfg.sensor));
        td.check(self.graph.mark_disabled(self.sensor_endpoint()));

        let result = td.finish();
        match &result {
            Ok(()) => tracing::info!("pipeline destroyed"),
            Err(e) => tracing::warn!(error = %e, "pipeline destroyed with errors"),
        }
        result
    }

    /// Create encoder channel `index` fed by scaler output port `index`.
    ///
    /// Everything except single-shot JPEG starts receiving frames right
    /// away. JPEG channels stay in [`ChannelState::Created`] until
    /// [`grab_snapshot`](Self::grab_snapshot).
    pub fn create_channel(&mut self, index: u8, config: &EncoderConfig) -> Result<()> {
        match self.channels.state(index) {
            None => return Err(MediaError::InvalidChannel(index)),
            Some(ChannelState::Idle) => {}
            Some(_) => return Err(MediaError::ChannelBusy(index)),
        }
        config.validate()?;
        let rate = RateControl::from_config(config)?;
        if self.active.is_none() {
            return Err(MediaError::PipelineNotBuilt);
        }

        let codec = config.codec;
        let device = EncoderDevice::for_codec(codec);
        let layout = self.config.layout;
        let (width, height) = (align_down(config.width), align_down(config.height));
        let hal = self.hal.clone();
        tracing::info!(channel = index, ?codec, mode = ?rate.mode(), width, height, "creating encoder channel");

        let port = PortConfig {
            width,
            height,
            pixel_format: if codec.is_jpeg() {
                PixelFormat::Yuv422Yuyv
            } else {
                PixelFormat::Yuv420Sp
            },
            compress: !codec.is_jpeg(),
        };
        hal.set_scaler_port(layout.scaler_device, layout.scaler_channel, index, &port)
            .or_rejected("scaler.set_port")?;

        if !codec.is_jpeg() {
            let pool = PoolConfig {
                device,
                max_width: width,
                max_height: height,
                ring_lines: height,
            };
            hal.configure_pool(&pool).or_rejected("sys.configure_pool")?;
        }

        let attrs = EncoderAttributes {
            codec,
            width,
            height,
            max_width: width,
            max_height: height,
            buffer_size: width * height,
            profile: config.profile,
            b_frames: 0,
            ref_frames: 1,
            rate,
        };
        hal.create_encoder(device, index, &attrs)
            .or_rejected("venc.create")?;
        self.graph.mark_enabled(Self::encoder_endpoint(device, index));
        self.channels.update(index, |c| {
            c.codec = Some(codec);
            c.rate = Some(rate);
            c.framerate = config.framerate;
            c.state = ChannelState::Created;
        })?;

        if codec == Codec::Jpeg {
            return Ok(());
        }

        self.attach_channel(index, device, config.framerate, LinkMode::from_codec(codec))?;
        hal.start_receiving(device, index).or_rejected("venc.start")?;
        self.channels.set_state(index, ChannelState::Receiving)?;
        tracing::info!(channel = index, "encoder channel receiving");
        Ok(())
    }

    /// Enable scaler port `index` and bind it to encoder channel `index`.
    fn attach_channel(&mut self, index: u8, device: EncoderDevice, fps: u32, mode: LinkMode) -> Result<()> {
        let layout = self.config.layout;
        self.hal
            .enable_scaler_port(layout.scaler_device, layout.scaler_channel, index)
            .or_rejected("scaler.enable_port")?;
        let (source, dest) = (self.scaler_endpoint(index), Self::encoder_endpoint(device, index));
        self.graph.bind(source, dest, self.config.framerate, fps, mode)?;
        self.channels.set_state(index, ChannelState::Bound)
    }

    /// Release encoder channel `index`, best effort.
    pub fn destroy_channel(&mut self, index: u8) -> Result<()> {
        let current = self.channels.get(index)?;
        if current.state == ChannelState::Idle {
            return Err(MediaError::ChannelNotActive(index));
        }
        // Idle first so the dispatcher stops picking it up.
        let prev = self.channels.reset(index)?;
        let Some(device) = prev.device() else {
            return Err(MediaError::ChannelNotActive(index));
        };
        tracing::info!(channel = index, state = ?prev.state, "destroying encoder channel");

        let hal = self.hal.clone();
        let layout = self.config.layout;
        let mut td = Teardown::default();

        if prev.descriptor.is_some() {
            td.hal("venc.release_descriptor", hal.release_descriptor(device, index));
        }
        if prev.state == ChannelState::Receiving {
            td.hal("venc.stop", hal.stop_receiving(device, index));
        }
        let (src, dst) = (self.scaler_endpoint(index), Self::encoder_endpoint(device, index));
        if self.graph.is_bound(&src, &dst) {
            td.check(self.graph.unbind(src, dst));
        }
        td.hal("venc.destroy", hal.destroy_encoder(device, index));
        td.check(self.graph.mark_disabled(dst));
        td.hal(
            "scaler.disable_port",
            hal.disable_scaler_port(layout.scaler_device, layout.scaler_channel, index),
        );
        td.finish()
    }

    /// Destroy every non-idle channel, stopping at the first failure.
    pub fn destroy_all(&mut self) -> Result<()> {
        for index in self.channels.active_indices() {
            self.destroy_channel(index)?;
        }
        Ok(())
    }

    /// Release every channel, then the pipeline itself.
    ///
    /// Both steps always run; the first error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        let channels = self.destroy_all();
        if let Err(e) = &channels {
            tracing::warn!(error = %e, "channel teardown failed, releasing pipeline anyway");
        }
        let pipeline = if self.active.is_some() { self.destroy() } else { Ok(()) };
        channels.and(pipeline)
    }

    /// Capture one JPEG frame on channel `index`.
    ///
    /// The channel must be a single-shot JPEG channel sitting in
    /// [`ChannelState::Created`]. The Realtime link, reception and the
    /// grayscale override are released on every exit path.
    pub fn grab_snapshot(&mut self, index: u8, quality: u8, grayscale: bool) -> Result<Vec<u8>> {
        let current = self.channels.get(index)?;
        match (current.state, current.codec) {
            (ChannelState::Idle, _) => return Err(MediaError::ChannelNotActive(index)),
            (ChannelState::Created, Some(Codec::Jpeg)) => {}
            (ChannelState::Created, _) => {
                return Err(MediaError::config(format!(
                    "channel {index} is not a single-shot JPEG channel"
                )));
            }
            _ => return Err(MediaError::ChannelBusy(index)),
        }
        if self.active.is_none() {
            return Err(MediaError::PipelineNotBuilt);
        }

        let device = EncoderDevice::Jpeg;
        let timeout = self.config.snapshot_timeout;
        let layout = self.config.layout;
        let source = self.scaler_endpoint(index);
        let dest = Self::encoder_endpoint(device, index);

        if let Err(e) = self.attach_channel(index, device, 1, LinkMode::Realtime) {
            if let Err(code) = self
                .hal
                .disable_scaler_port(layout.scaler_device, layout.scaler_channel, index)
            {
                tracing::warn!(channel = index, %code, "scaler port release failed");
            }
            return Err(e);
        }

        let mut session = SnapshotSession {
            hal: &*self.hal,
            graph: &mut self.graph,
            channels: &self.channels,
            index,
            device,
            source,
            dest,
            layout: self.config.layout,
            receiving: false,
            grayscale: false,
            descriptor: false,
        };
        session.capture(quality, grayscale, timeout)
    }
}

/// One in-flight snapshot. Dropping it stops reception, clears grayscale,
/// unbinds the channel and disables its scaler port.
struct SnapshotSession<'a> {
    hal: &'a dyn Hal,
    graph: &'a mut ModuleGraph,
    channels: &'a ChannelTable,
    index: u8,
    device: EncoderDevice,
    source: ModuleEndpoint,
    dest: ModuleEndpoint,
    layout: crate::config::GraphLayout,
    receiving: bool,
    grayscale: bool,
    descriptor: bool,
}

impl SnapshotSession<'_> {
    fn capture(&mut self, quality: u8, grayscale: bool, timeout: Duration) -> Result<Vec<u8>> {
        let (hal, device, index) = (self.hal, self.device, self.index);

        hal.set_jpeg_quality(device, index, quality)
            .or_rejected("venc.set_jpeg_quality")?;
        if grayscale {
            hal.set_grayscale(self.layout.isp_device, self.layout.isp_channel, true)
                .or_rejected("isp.set_grayscale")?;
            self.grayscale = true;
        }

        hal.start_receiving_frames(device, index, 1)
            .or_rejected("venc.start_frames")?;
        self.receiving = true;

        let handle = hal.descriptor(device, index).or_rejected("venc.descriptor")?;
        self.descriptor = true;
        let ready = hal.wait_ready(&[handle], timeout).or_rejected("venc.wait_ready")?;
        if ready.is_empty() {
            return Err(MediaError::Timeout {
                op: "snapshot",
                after: timeout,
            });
        }

        let status = hal.query(device, index).or_rejected("venc.query")?;
        if status.pending_packets == 0 {
            return Err(MediaError::EmptyFrame(index));
        }
        let stream = hal
            .fetch_stream(device, index, status.pending_packets)
            .or_rejected("venc.fetch")?;
        let jpeg: Vec<u8> = stream.packets.iter().flat_map(|p| p.data.iter().copied()).collect();
        if let Err(code) = hal.release_stream(device, index, &stream) {
            tracing::warn!(channel = index, %code, "snapshot stream release failed");
        }
        tracing::debug!(channel = index, bytes = jpeg.len(), "snapshot captured");
        Ok(jpeg)
    }
}

impl Drop for SnapshotSession<'_> {
    fn drop(&mut self) {
        let (hal, device, index) = (self.hal, self.device, self.index);
        let mut td = Teardown::default();
        if self.descriptor {
            td.hal("venc.release_descriptor", hal.release_descriptor(device, index));
        }
        if self.receiving {
            td.hal("venc.stop", hal.stop_receiving(device, index));
        }
        if self.grayscale {
            td.hal(
                "isp.set_grayscale",
                hal.set_grayscale(self.layout.isp_device, self.layout.isp_channel, false),
            );
        }
        if self.graph.is_bound(&self.source, &self.dest) {
            td.check(self.graph.unbind(self.source, self.dest));
        }
        td.hal(
            "scaler.disable_port",
            hal.disable_scaler_port(self.layout.scaler_device, self.layout.scaler_channel, index),
        );
        td.check(self.channels.set_state(index, ChannelState::Created));
        if let Err(e) = td.finish() {
            tracing::warn!(channel = index, error = %e, "snapshot release incomplete");
        }
    }
}
