//! In-memory chip family.
//!
//! Records every call in order, fails any named operation on request and
//! lets the caller queue encoded frames per encoder channel. Readiness
//! waits block on a condvar, so a dispatcher thread driving it behaves
//! like it would against a real encoder.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::*;
use crate::graph::{Binding, ModuleEndpoint};
use crate::media::StreamPacket;

/// Target object does not exist.
pub const ERR_UNEXIST: HalCode = HalCode(-2);
/// No completed frame to fetch.
pub const ERR_NOBUF: HalCode = HalCode(-3);
/// Target object already exists.
pub const ERR_BUSY: HalCode = HalCode(-4);

#[derive(Default)]
struct SimEncoder {
    attrs: Option<EncoderAttributes>,
    receiving: bool,
    frames_left: Option<u32>,
    queue: VecDeque<Vec<StreamPacket>>,
    sequence: u32,
    jpeg_quality: Option<u8>,
    descriptor: Option<ReadyHandle>,
    released: u64,
}

impl SimEncoder {
    fn ready(&self) -> bool {
        self.receiving && !self.queue.is_empty()
    }
}

struct SimState {
    calls: Vec<String>,
    failures: HashMap<String, HalCode>,
    profiles: Vec<SensorProfile>,
    selected_profile: Option<u8>,
    pad: SensorPad,
    plane: SensorPlane,
    encoders: HashMap<(EncoderDevice, u8), SimEncoder>,
    bindings: Vec<Binding>,
    pools: Vec<PoolConfig>,
    grayscale: bool,
    next_handle: i32,
}

impl SimState {
    fn encoder(&mut self, device: EncoderDevice, channel: u8) -> HalResult<&mut SimEncoder> {
        self.encoders
            .get_mut(&(device, channel))
            .filter(|e| e.attrs.is_some())
            .ok_or(ERR_UNEXIST)
    }
}

pub struct SimulatedHal {
    state: Mutex<SimState>,
    frames: Condvar,
}

impl Default for SimulatedHal {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHal {
    /// A 1080p30 MIPI sensor with a 10-bit RGGB plane.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                calls: Vec::new(),
                failures: HashMap::new(),
                profiles: vec![
                    SensorProfile {
                        index: 0,
                        crop_width: 1280,
                        crop_height: 720,
                        max_fps: 60,
                    },
                    SensorProfile {
                        index: 1,
                        crop_width: 1920,
                        crop_height: 1080,
                        max_fps: 30,
                    },
                    SensorProfile {
                        index: 2,
                        crop_width: 2592,
                        crop_height: 1944,
                        max_fps: 20,
                    },
                ],
                selected_profile: None,
                pad: SensorPad {
                    interface: SensorInterface::Mipi,
                    edge: ClockEdge::Single,
                    hdr: false,
                },
                plane: SensorPlane {
                    bayer: Some(BayerPhase::Rg),
                    bit_depth: 10,
                    native_format: PixelFormat::Yuv422Yuyv,
                    capture: Rect {
                        x: 0,
                        y: 0,
                        width: 1920,
                        height: 1080,
                    },
                },
                encoders: HashMap::new(),
                bindings: Vec::new(),
                pools: Vec::new(),
                grayscale: false,
                next_handle: 3,
            }),
            frames: Condvar::new(),
        }
    }

    pub fn with_profiles(mut self, profiles: Vec<SensorProfile>) -> Self {
        self.state.get_mut().profiles = profiles;
        self
    }

    pub fn with_pad(mut self, pad: SensorPad) -> Self {
        self.state.get_mut().pad = pad;
        self
    }

    pub fn with_plane(mut self, plane: SensorPlane) -> Self {
        self.state.get_mut().plane = plane;
        self
    }

    /// Make every later call to `op` fail with `code`.
    pub fn fail(&self, op: &str, code: HalCode) {
        self.state.lock().failures.insert(op.to_string(), code);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every call so far as `"<op> <args>"`, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Operation names only, oldest first.
    pub fn ops(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|c| c.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Queue one completed frame on an encoder channel and wake waiters.
    /// An empty packet list simulates an empty frame.
    pub fn push_frame(&self, device: EncoderDevice, channel: u8, packets: Vec<StreamPacket>) {
        let mut s = self.state.lock();
        s.encoders
            .entry((device, channel))
            .or_default()
            .queue
            .push_back(packets);
        self.frames.notify_all();
    }

    pub fn queued_frames(&self, device: EncoderDevice, channel: u8) -> usize {
        self.state
            .lock()
            .encoders
            .get(&(device, channel))
            .map_or(0, |e| e.queue.len())
    }

    pub fn encoder_attributes(&self, device: EncoderDevice, channel: u8) -> Option<EncoderAttributes> {
        self.state
            .lock()
            .encoders
            .get(&(device, channel))
            .and_then(|e| e.attrs.clone())
    }

    pub fn is_receiving(&self, device: EncoderDevice, channel: u8) -> bool {
        self.state
            .lock()
            .encoders
            .get(&(device, channel))
            .is_some_and(|e| e.receiving)
    }

    pub fn jpeg_quality(&self, device: EncoderDevice, channel: u8) -> Option<u8> {
        self.state
            .lock()
            .encoders
            .get(&(device, channel))
            .and_then(|e| e.jpeg_quality)
    }

    /// Streams handed back through `release_stream`.
    pub fn released_streams(&self, device: EncoderDevice, channel: u8) -> u64 {
        self.state
            .lock()
            .encoders
            .get(&(device, channel))
            .map_or(0, |e| e.released)
    }

    pub fn selected_profile(&self) -> Option<u8> {
        self.state.lock().selected_profile
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.state.lock().bindings.clone()
    }

    pub fn pools(&self) -> Vec<PoolConfig> {
        self.state.lock().pools.clone()
    }

    pub fn grayscale(&self) -> bool {
        self.state.lock().grayscale
    }

    fn call<T>(
        &self,
        op: &'static str,
        args: String,
        f: impl FnOnce(&mut SimState) -> HalResult<T>,
    ) -> HalResult<T> {
        let mut s = self.state.lock();
        s.calls.push(if args.is_empty() {
            op.to_string()
        } else {
            format!("{op} {args}")
        });
        if let Some(code) = s.failures.get(op) {
            return Err(*code);
        }
        f(&mut s)
    }

    fn record(&self, op: &'static str, args: String) -> HalResult<()> {
        self.call(op, args, |_| Ok(()))
    }
}

impl SensorOps for SimulatedHal {
    fn set_sensor_hdr(&self, sensor: u8, hdr: bool) -> HalResult<()> {
        self.record("sensor.set_hdr", format!("{sensor} {hdr}"))
    }

    fn sensor_profiles(&self, sensor: u8) -> HalResult<Vec<SensorProfile>> {
        self.call("sensor.profiles", sensor.to_string(), |s| Ok(s.profiles.clone()))
    }

    fn set_sensor_profile(&self, sensor: u8, profile: u8) -> HalResult<()> {
        self.call("sensor.set_profile", format!("{sensor} {profile}"), |s| {
            if !s.profiles.iter().any(|p| p.index == profile) {
                return Err(ERR_UNEXIST);
            }
            s.selected_profile = Some(profile);
            Ok(())
        })
    }

    fn set_sensor_framerate(&self, sensor: u8, fps: u32) -> HalResult<()> {
        self.record("sensor.set_fps", format!("{sensor} {fps}"))
    }

    fn enable_sensor(&self, sensor: u8) -> HalResult<()> {
        self.record("sensor.enable", sensor.to_string())
    }

    fn disable_sensor(&self, sensor: u8) -> HalResult<()> {
        self.record("sensor.disable", sensor.to_string())
    }

    fn sensor_pad(&self, sensor: u8) -> HalResult<SensorPad> {
        self.call("sensor.pad", sensor.to_string(), |s| Ok(s.pad))
    }

    fn sensor_plane(&self, sensor: u8, hdr: bool) -> HalResult<SensorPlane> {
        self.call("sensor.plane", format!("{sensor} {hdr}"), |s| Ok(s.plane))
    }
}

impl CaptureOps for SimulatedHal {
    fn create_capture_group(&self, group: u8, config: &CaptureGroupConfig) -> HalResult<()> {
        self.record("capture.create_group", format!("{group} {:?} {:?}", config.interface, config.edge))
    }

    fn destroy_capture_group(&self, group: u8) -> HalResult<()> {
        self.record("capture.destroy_group", group.to_string())
    }

    fn configure_capture_device(&self, device: u8, config: &CaptureDeviceConfig) -> HalResult<()> {
        self.record("capture.set_device", format!("{device} {:?}", config.pixel_format))
    }

    fn enable_capture_device(&self, device: u8) -> HalResult<()> {
        self.record("capture.enable_device", device.to_string())
    }

    fn disable_capture_device(&self, device: u8) -> HalResult<()> {
        self.record("capture.disable_device", device.to_string())
    }

    fn enable_capture_port(&self, device: u8, port: u8) -> HalResult<()> {
        self.record("capture.enable_port", format!("{device} {port}"))
    }

    fn disable_capture_port(&self, device: u8, port: u8) -> HalResult<()> {
        self.record("capture.disable_port", format!("{device} {port}"))
    }
}

impl IspOps for SimulatedHal {
    fn create_isp_device(&self, device: u8) -> HalResult<()> {
        self.record("isp.create_device", device.to_string())
    }

    fn destroy_isp_device(&self, device: u8) -> HalResult<()> {
        self.record("isp.destroy_device", device.to_string())
    }

    fn create_isp_channel(&self, device: u8, channel: u8, sensor: u8) -> HalResult<()> {
        self.record("isp.create_channel", format!("{device} {channel} sensor={sensor}"))
    }

    fn destroy_isp_channel(&self, device: u8, channel: u8) -> HalResult<()> {
        self.record("isp.destroy_channel", format!("{device} {channel}"))
    }

    fn set_isp_channel_params(&self, device: u8, channel: u8, params: &IspChannelParams) -> HalResult<()> {
        self.record("isp.set_params", format!("{device} {channel} {params:?}"))
    }

    fn start_isp_channel(&self, device: u8, channel: u8) -> HalResult<()> {
        self.record("isp.start_channel", format!("{device} {channel}"))
    }

    fn stop_isp_channel(&self, device: u8, channel: u8) -> HalResult<()> {
        self.record("isp.stop_channel", format!("{device} {channel}"))
    }

    fn set_isp_port(&self, device: u8, channel: u8, port: u8, config: &PortConfig) -> HalResult<()> {
        self.record("isp.set_port", format!("{device} {channel} {port} {:?}", config.pixel_format))
    }

    fn enable_isp_port(&self, device: u8, channel: u8, port: u8) -> HalResult<()> {
        self.record("isp.enable_port", format!("{device} {channel} {port}"))
    }

    fn disable_isp_port(&self, device: u8, channel: u8, port: u8) -> HalResult<()> {
        self.record("isp.disable_port", format!("{device} {channel} {port}"))
    }

    fn set_grayscale(&self, device: u8, channel: u8, enable: bool) -> HalResult<()> {
        self.call("isp.set_grayscale", format!("{device} {channel} {enable}"), |s| {
            s.grayscale = enable;
            Ok(())
        })
    }
}

impl ScalerOps for SimulatedHal {
    fn create_scaler_device(&self, device: u8, port_mask: u32) -> HalResult<()> {
        self.record("scaler.create_device", format!("{device} mask={port_mask:#b}"))
    }

    fn destroy_scaler_device(&self, device: u8) -> HalResult<()> {
        self.record("scaler.destroy_device", device.to_string())
    }

    fn create_scaler_channel(&self, device: u8, channel: u8) -> HalResult<()> {
        self.record("scaler.create_channel", format!("{device} {channel}"))
    }

    fn destroy_scaler_channel(&self, device: u8, channel: u8) -> HalResult<()> {
        self.record("scaler.destroy_channel", format!("{device} {channel}"))
    }

    fn start_scaler_channel(&self, device: u8, channel: u8) -> HalResult<()> {
        self.record("scaler.start_channel", format!("{device} {channel}"))
    }

    fn stop_scaler_channel(&self, device: u8, channel: u8) -> HalResult<()> {
        self.record("scaler.stop_channel", format!("{device} {channel}"))
    }

    fn set_scaler_port(&self, device: u8, channel: u8, port: u8, config: &PortConfig) -> HalResult<()> {
        self.record(
            "scaler.set_port",
            format!(
                "{device} {channel} {port} {}x{} {:?} compress={}",
                config.width, config.height, config.pixel_format, config.compress
            ),
        )
    }

    fn enable_scaler_port(&self, device: u8, channel: u8, port: u8) -> HalResult<()> {
        self.record("scaler.enable_port", format!("{device} {channel} {port}"))
    }

    fn disable_scaler_port(&self, device: u8, channel: u8, port: u8) -> HalResult<()> {
        self.record("scaler.disable_port", format!("{device} {channel} {port}"))
    }
}

impl SystemOps for SimulatedHal {
    fn bind(&self, binding: &Binding) -> HalResult<()> {
        self.call("sys.bind", format!("{} -> {}", binding.source, binding.dest), |s| {
            s.bindings.push(*binding);
            Ok(())
        })
    }

    fn unbind(&self, source: &ModuleEndpoint, dest: &ModuleEndpoint) -> HalResult<()> {
        self.call("sys.unbind", format!("{source} -> {dest}"), |s| {
            let pos = s
                .bindings
                .iter()
                .position(|b| b.source == *source && b.dest == *dest)
                .ok_or(ERR_UNEXIST)?;
            s.bindings.remove(pos);
            Ok(())
        })
    }

    fn configure_pool(&self, pool: &PoolConfig) -> HalResult<()> {
        self.call("sys.configure_pool", format!("{:?} {}x{}", pool.device, pool.max_width, pool.max_height), |s| {
            s.pools.push(*pool);
            Ok(())
        })
    }
}

impl EncoderOps for SimulatedHal {
    fn create_encoder(&self, device: EncoderDevice, channel: u8, attrs: &EncoderAttributes) -> HalResult<()> {
        self.call("venc.create", format!("{device:?} {channel} {:?}", attrs.codec), |s| {
            let enc = s.encoders.entry((device, channel)).or_default();
            if enc.attrs.is_some() {
                return Err(ERR_BUSY);
            }
            enc.attrs = Some(attrs.clone());
            Ok(())
        })
    }

    fn destroy_encoder(&self, device: EncoderDevice, channel: u8) -> HalResult<()> {
        self.call("venc.destroy", format!("{device:?} {channel}"), |s| {
            s.encoder(device, channel)?;
            s.encoders.remove(&(device, channel));
            Ok(())
        })
    }

    fn start_receiving(&self, device: EncoderDevice, channel: u8) -> HalResult<()> {
        self.call("venc.start", format!("{device:?} {channel}"), |s| {
            let enc = s.encoder(device, channel)?;
            enc.receiving = true;
            enc.frames_left = None;
            Ok(())
        })?;
        self.frames.notify_all();
        Ok(())
    }

    fn start_receiving_frames(&self, device: EncoderDevice, channel: u8, frames: u32) -> HalResult<()> {
        self.call("venc.start_frames", format!("{device:?} {channel} {frames}"), |s| {
            let enc = s.encoder(device, channel)?;
            enc.receiving = true;
            enc.frames_left = Some(frames);
            Ok(())
        })?;
        self.frames.notify_all();
        Ok(())
    }

    fn stop_receiving(&self, device: EncoderDevice, channel: u8) -> HalResult<()> {
        self.call("venc.stop", format!("{device:?} {channel}"), |s| {
            s.encoder(device, channel)?.receiving = false;
            Ok(())
        })
    }

    fn set_jpeg_quality(&self, device: EncoderDevice, channel: u8, quality: u8) -> HalResult<()> {
        self.call("venc.set_jpeg_quality", format!("{device:?} {channel} {quality}"), |s| {
            s.encoder(device, channel)?.jpeg_quality = Some(quality);
            Ok(())
        })
    }

    fn query(&self, device: EncoderDevice, channel: u8) -> HalResult<EncoderStatus> {
        self.call("venc.query", format!("{device:?} {channel}"), |s| {
            let enc = s.encoder(device, channel)?;
            if enc.queue.front().is_some_and(|f| f.is_empty()) {
                enc.queue.pop_front();
                return Ok(EncoderStatus::default());
            }
            Ok(EncoderStatus {
                pending_packets: enc.queue.front().map_or(0, |f| f.len() as u32),
            })
        })
    }

    fn fetch_stream(&self, device: EncoderDevice, channel: u8, packets: u32) -> HalResult<EncodedStream> {
        self.call("venc.fetch", format!("{device:?} {channel} {packets}"), |s| {
            let enc = s.encoder(device, channel)?;
            let frame = enc.queue.pop_front().ok_or(ERR_NOBUF)?;
            let sequence = enc.sequence;
            enc.sequence = enc.sequence.wrapping_add(1);
            if let Some(left) = enc.frames_left.as_mut() {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    enc.receiving = false;
                }
            }
            Ok(EncodedStream {
                sequence,
                packets: frame,
            })
        })
    }

    fn release_stream(&self, device: EncoderDevice, channel: u8, stream: &EncodedStream) -> HalResult<()> {
        self.call("venc.release", format!("{device:?} {channel} {}", stream.sequence), |s| {
            s.encoder(device, channel)?.released += 1;
            Ok(())
        })
    }

    fn descriptor(&self, device: EncoderDevice, channel: u8) -> HalResult<ReadyHandle> {
        self.call("venc.descriptor", format!("{device:?} {channel}"), |s| {
            let next = s.next_handle;
            let enc = s.encoder(device, channel)?;
            if let Some(handle) = enc.descriptor {
                return Ok(handle);
            }
            let handle = ReadyHandle(next);
            enc.descriptor = Some(handle);
            s.next_handle += 1;
            Ok(handle)
        })
    }

    fn release_descriptor(&self, device: EncoderDevice, channel: u8) -> HalResult<()> {
        self.call("venc.release_descriptor", format!("{device:?} {channel}"), |s| {
            s.encoder(device, channel)?.descriptor = None;
            Ok(())
        })
    }

    fn wait_ready(&self, handles: &[ReadyHandle], timeout: Duration) -> HalResult<Vec<ReadyHandle>> {
        let deadline = Instant::now() + timeout;
        let mut s = self.state.lock();
        loop {
            if let Some(code) = s.failures.get("venc.wait_ready") {
                return Err(*code);
            }
            let ready: Vec<ReadyHandle> = handles
                .iter()
                .copied()
                .filter(|h| {
                    s.encoders
                        .values()
                        .any(|e| e.descriptor == Some(*h) && e.ready())
                })
                .collect();
            if !ready.is_empty() || Instant::now() >= deadline {
                return Ok(ready);
            }
            self.frames.wait_until(&mut s, deadline);
        }
    }
}

impl Hal for SimulatedHal {
    fn family(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderProfile;
    use crate::media::Codec;
    use crate::pipeline::rate::{FrameRate, RateControl};
    use std::sync::Arc;
    use std::thread;

    fn attrs() -> EncoderAttributes {
        EncoderAttributes {
            codec: Codec::H264,
            width: 640,
            height: 480,
            max_width: 640,
            max_height: 480,
            buffer_size: 640 * 480,
            profile: EncoderProfile::Main,
            b_frames: 0,
            ref_frames: 1,
            rate: RateControl::Cbr {
                codec: crate::pipeline::rate::H26x::H264,
                gop: 30,
                frame_rate: FrameRate::per_second(30),
                bitrate: 1 << 20,
            },
        }
    }

    fn packet(data: &[u8]) -> StreamPacket {
        StreamPacket {
            data: data.to_vec(),
            timestamp_us: 0,
        }
    }

    #[test]
    fn injected_failure_is_returned_and_logged() {
        let hal = SimulatedHal::new();
        hal.fail("isp.create_device", HalCode(-9));
        assert_eq!(hal.create_isp_device(0), Err(HalCode(-9)));
        assert_eq!(hal.ops(), vec!["isp.create_device"]);
    }

    #[test]
    fn frames_flow_only_while_receiving() {
        let hal = SimulatedHal::new();
        let dev = EncoderDevice::H26x;
        hal.create_encoder(dev, 0, &attrs()).unwrap();
        let h = hal.descriptor(dev, 0).unwrap();
        hal.push_frame(dev, 0, vec![packet(&[0, 0, 1, 0x65])]);

        assert!(hal.wait_ready(&[h], Duration::ZERO).unwrap().is_empty());
        hal.start_receiving(dev, 0).unwrap();
        assert_eq!(hal.wait_ready(&[h], Duration::ZERO).unwrap(), vec![h]);

        assert_eq!(hal.query(dev, 0).unwrap().pending_packets, 1);
        let stream = hal.fetch_stream(dev, 0, 1).unwrap();
        assert_eq!(stream.packets.len(), 1);
        hal.release_stream(dev, 0, &stream).unwrap();
        assert_eq!(hal.released_streams(dev, 0), 1);
        assert_eq!(hal.fetch_stream(dev, 0, 1), Err(ERR_NOBUF));
    }

    #[test]
    fn wait_wakes_on_pushed_frame() {
        let hal = Arc::new(SimulatedHal::new());
        let dev = EncoderDevice::Jpeg;
        hal.create_encoder(dev, 1, &attrs()).unwrap();
        hal.start_receiving(dev, 1).unwrap();
        let h = hal.descriptor(dev, 1).unwrap();

        let producer = {
            let hal = hal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                hal.push_frame(dev, 1, vec![packet(&[0xFF, 0xD8])]);
            })
        };
        let ready = hal.wait_ready(&[h], Duration::from_secs(5)).unwrap();
        producer.join().unwrap();
        assert_eq!(ready, vec![h]);
    }

    #[test]
    fn single_frame_budget_stops_reception() {
        let hal = SimulatedHal::new();
        let dev = EncoderDevice::Jpeg;
        hal.create_encoder(dev, 0, &attrs()).unwrap();
        hal.start_receiving_frames(dev, 0, 1).unwrap();
        hal.push_frame(dev, 0, vec![packet(&[1])]);
        hal.fetch_stream(dev, 0, 1).unwrap();
        assert!(!hal.is_receiving(dev, 0));
    }

    #[test]
    fn empty_frame_reports_zero_packets() {
        let hal = SimulatedHal::new();
        let dev = EncoderDevice::H26x;
        hal.create_encoder(dev, 0, &attrs()).unwrap();
        hal.push_frame(dev, 0, Vec::new());
        assert_eq!(hal.query(dev, 0).unwrap().pending_packets, 0);
        assert_eq!(hal.queued_frames(dev, 0), 0);
    }

    #[test]
    fn duplicate_encoder_is_busy() {
        let hal = SimulatedHal::new();
        hal.create_encoder(EncoderDevice::H26x, 0, &attrs()).unwrap();
        assert_eq!(hal.create_encoder(EncoderDevice::H26x, 0, &attrs()), Err(ERR_BUSY));
        assert_eq!(hal.destroy_encoder(EncoderDevice::H26x, 3), Err(ERR_UNEXIST));
    }
}
