//! Integration test: pipeline bring-up, encoder channels, snapshots and
//! teardown against the simulated chip family.

use std::sync::Arc;
use std::time::Duration;

use ipcam::hal::sim::SimulatedHal;
use ipcam::hal::{EncoderDevice, HalCode};
use ipcam::media::StreamPacket;
use ipcam::{
    ChannelState, Codec, EncoderConfig, ErrorKind, LinkMode, MediaError, Pipeline, PipelineConfig,
    RateMode,
};

fn built() -> (Arc<SimulatedHal>, Pipeline) {
    let hal = Arc::new(SimulatedHal::new());
    let mut pipeline = Pipeline::new(hal.clone(), PipelineConfig::default()).unwrap();
    pipeline.build().unwrap();
    hal.clear_calls();
    (hal, pipeline)
}

fn jpeg_channel() -> EncoderConfig {
    EncoderConfig {
        codec: Codec::Jpeg,
        mode: RateMode::Qp,
        width: 1280,
        height: 720,
        min_qual: 70,
        max_qual: 90,
        ..EncoderConfig::default()
    }
}

#[test]
fn bring_up_runs_in_order() {
    let hal = Arc::new(SimulatedHal::new());
    let mut pipeline = Pipeline::new(hal.clone(), PipelineConfig::default()).unwrap();
    pipeline.build().unwrap();

    assert_eq!(
        hal.ops(),
        vec![
            "sensor.set_hdr",
            "sensor.profiles",
            "sensor.set_profile",
            "sensor.set_fps",
            "sensor.enable",
            "sensor.pad",
            "sensor.plane",
            "capture.create_group",
            "capture.set_device",
            "capture.enable_device",
            "capture.enable_port",
            "isp.create_device",
            "isp.create_channel",
            "isp.set_params",
            "isp.start_channel",
            "isp.set_port",
            "isp.enable_port",
            "scaler.create_device",
            "scaler.create_channel",
            "scaler.start_channel",
            "sys.bind",
            "sys.bind",
        ]
    );
    // 1280x720@60 is listed first but too small; 1920x1080@30 fits.
    assert_eq!(hal.selected_profile(), Some(1));
    assert_eq!(pipeline.profile().map(|p| p.index), Some(1));

    let bindings = hal.bindings();
    assert_eq!(bindings.len(), 2);
    assert!(bindings.iter().all(|b| b.mode == LinkMode::Realtime));
    assert!(bindings.iter().all(|b| b.fps_in == 30 && b.fps_out == 30));
    assert!(hal.calls().contains(&"scaler.create_device 0 mask=0b1111".to_string()));
    assert!(hal.calls().contains(&"capture.create_group 0 Mipi Double".to_string()));
}

#[test]
fn build_twice_is_rejected() {
    let (_hal, mut pipeline) = built();
    assert!(matches!(pipeline.build(), Err(MediaError::PipelineAlreadyBuilt)));
}

#[test]
fn unmatched_profile_fails_before_enabling_sensor() {
    let hal = Arc::new(SimulatedHal::new());
    let config = PipelineConfig {
        width: 3840,
        height: 2160,
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(hal.clone(), config).unwrap();
    let err = pipeline.build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
    assert!(!hal.ops().contains(&"sensor.enable".to_string()));
}

#[test]
fn teardown_reverses_bring_up() {
    let (hal, mut pipeline) = built();
    pipeline.destroy().unwrap();

    assert_eq!(
        hal.ops(),
        vec![
            "sys.unbind",
            "sys.unbind",
            "scaler.disable_port",
            "scaler.disable_port",
            "scaler.disable_port",
            "scaler.disable_port",
            "scaler.stop_channel",
            "scaler.destroy_channel",
            "scaler.destroy_device",
            "isp.disable_port",
            "isp.stop_channel",
            "isp.destroy_channel",
            "isp.destroy_device",
            "capture.disable_port",
            "capture.disable_device",
            "capture.destroy_group",
            "sensor.disable",
        ]
    );
    let unbinds: Vec<_> = hal
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("sys.unbind"))
        .collect();
    assert_eq!(
        unbinds,
        vec![
            "sys.unbind isp:0/0/0 -> scaler:0/0/0",
            "sys.unbind capture:0/0/0 -> isp:0/0/0",
        ]
    );
    assert!(hal.bindings().is_empty());
    assert!(!pipeline.is_built());
}

#[test]
fn second_destroy_reports_not_built() {
    let (hal, mut pipeline) = built();
    pipeline.destroy().unwrap();
    hal.clear_calls();

    let err = pipeline.destroy().unwrap_err();
    assert!(matches!(err, MediaError::PipelineNotBuilt));
    assert_eq!(err.kind(), ErrorKind::NotBound);
    assert!(hal.calls().is_empty());
}

#[test]
fn teardown_keeps_going_after_failure() {
    let (hal, mut pipeline) = built();
    hal.fail("scaler.destroy_device", HalCode(0x1234));

    let err = pipeline.destroy().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HardwareRejected);
    assert_eq!(err.code(), Some(0x1234));
    let ops = hal.ops();
    assert!(ops.contains(&"isp.destroy_device".to_string()));
    assert_eq!(ops.last().map(String::as_str), Some("sensor.disable"));
}

#[test]
fn partial_bring_up_is_released_by_destroy() {
    let hal = Arc::new(SimulatedHal::new());
    hal.fail("isp.create_channel", HalCode(-7));
    let mut pipeline = Pipeline::new(hal.clone(), PipelineConfig::default()).unwrap();

    let err = pipeline.build().unwrap_err();
    assert_eq!(err.code(), Some(-7));
    assert!(!hal.ops().contains(&"isp.set_params".to_string()));

    hal.clear_failures();
    hal.clear_calls();
    pipeline.destroy().unwrap();
    let ops = hal.ops();
    assert!(!ops.iter().any(|op| op.starts_with("scaler.")));
    assert!(!ops.contains(&"sys.unbind".to_string()));
    assert!(ops.contains(&"isp.destroy_device".to_string()));
    assert!(ops.contains(&"capture.destroy_group".to_string()));
    assert_eq!(ops.last().map(String::as_str), Some("sensor.disable"));
}

#[test]
fn h264_channel_lifecycle() {
    let (hal, mut pipeline) = built();
    let config = EncoderConfig {
        width: 1280,
        height: 730,
        ..EncoderConfig::default()
    };
    pipeline.create_channel(0, &config).unwrap();

    assert_eq!(
        hal.ops(),
        vec![
            "scaler.set_port",
            "sys.configure_pool",
            "venc.create",
            "scaler.enable_port",
            "sys.bind",
            "venc.start",
        ]
    );
    assert!(hal
        .calls()
        .contains(&"scaler.set_port 0 0 0 1280x720 Yuv420Sp compress=true".to_string()));
    let attrs = hal.encoder_attributes(EncoderDevice::H26x, 0).unwrap();
    assert_eq!((attrs.width, attrs.height), (1280, 720));
    assert_eq!(attrs.buffer_size, 1280 * 720);
    let pool = hal.pools()[0];
    assert_eq!(pool.ring_lines, 720);

    let link = hal.bindings().last().copied().unwrap();
    assert_eq!(link.mode, LinkMode::RingBuffered);
    assert_eq!(pipeline.channels().state(0), Some(ChannelState::Receiving));

    hal.clear_calls();
    pipeline.destroy_channel(0).unwrap();
    assert_eq!(
        hal.ops(),
        vec!["venc.stop", "sys.unbind", "venc.destroy", "scaler.disable_port"]
    );
    assert_eq!(pipeline.channels().state(0), Some(ChannelState::Idle));
    assert_eq!(hal.bindings().len(), 2);
}

#[test]
fn channel_slot_errors() {
    let (_hal, mut pipeline) = built();
    let config = EncoderConfig::default();

    assert!(matches!(
        pipeline.create_channel(9, &config),
        Err(MediaError::InvalidChannel(9))
    ));
    assert!(matches!(
        pipeline.destroy_channel(1),
        Err(MediaError::ChannelNotActive(1))
    ));
    pipeline.create_channel(1, &config).unwrap();
    assert!(matches!(
        pipeline.create_channel(1, &config),
        Err(MediaError::ChannelBusy(1))
    ));
}

#[test]
fn channel_needs_built_pipeline() {
    let hal = Arc::new(SimulatedHal::new());
    let mut pipeline = Pipeline::new(hal.clone(), PipelineConfig::default()).unwrap();
    let err = pipeline
        .create_channel(0, &EncoderConfig::default())
        .unwrap_err();
    assert!(matches!(err, MediaError::PipelineNotBuilt));
    assert!(hal.calls().is_empty());
}

#[test]
fn invalid_rate_control_touches_no_hardware() {
    let (hal, mut pipeline) = built();
    for (codec, mode) in [
        (Codec::H265, RateMode::Abr),
        (Codec::Mjpeg, RateMode::Vbr),
        (Codec::Jpeg, RateMode::Avbr),
    ] {
        let config = EncoderConfig {
            codec,
            mode,
            ..EncoderConfig::default()
        };
        let err = pipeline.create_channel(0, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError, "{codec:?}/{mode:?}");
    }
    assert!(hal.calls().is_empty());
    assert_eq!(pipeline.channels().state(0), Some(ChannelState::Idle));
}

#[test]
fn jpeg_channel_waits_for_snapshot() {
    let (hal, mut pipeline) = built();
    pipeline.create_channel(2, &jpeg_channel()).unwrap();

    assert_eq!(hal.ops(), vec!["scaler.set_port", "venc.create"]);
    assert!(hal
        .calls()
        .contains(&"scaler.set_port 0 0 2 1280x720 Yuv422Yuyv compress=false".to_string()));
    assert_eq!(pipeline.channels().state(2), Some(ChannelState::Created));
    assert!(!hal.is_receiving(EncoderDevice::Jpeg, 2));
}

#[test]
fn snapshot_returns_frame_and_releases_link() {
    let (hal, mut pipeline) = built();
    pipeline.create_channel(1, &jpeg_channel()).unwrap();
    hal.push_frame(
        EncoderDevice::Jpeg,
        1,
        vec![
            StreamPacket {
                data: vec![0xFF, 0xD8, 0x01],
                timestamp_us: 10,
            },
            StreamPacket {
                data: vec![0x02, 0xFF, 0xD9],
                timestamp_us: 10,
            },
        ],
    );
    hal.clear_calls();

    let jpeg = pipeline.grab_snapshot(1, 80, true).unwrap();
    assert_eq!(jpeg, vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
    assert_eq!(hal.jpeg_quality(EncoderDevice::Jpeg, 1), Some(80));
    assert_eq!(hal.released_streams(EncoderDevice::Jpeg, 1), 1);

    let ops = hal.ops();
    assert_eq!(ops.first().map(String::as_str), Some("scaler.enable_port"));
    assert!(ops.contains(&"isp.set_grayscale".to_string()));
    assert!(ops.contains(&"venc.start_frames".to_string()));
    assert_eq!(ops.last().map(String::as_str), Some("scaler.disable_port"));

    assert!(!hal.grayscale());
    assert!(!hal.is_receiving(EncoderDevice::Jpeg, 1));
    assert_eq!(hal.bindings().len(), 2);
    assert_eq!(pipeline.channels().state(1), Some(ChannelState::Created));

    // The channel is reusable.
    hal.push_frame(
        EncoderDevice::Jpeg,
        1,
        vec![StreamPacket {
            data: vec![0xFF, 0xD8, 0xFF, 0xD9],
            timestamp_us: 20,
        }],
    );
    assert_eq!(pipeline.grab_snapshot(1, 50, false).unwrap().len(), 4);
}

#[test]
fn snapshot_timeout_still_releases() {
    let hal = Arc::new(SimulatedHal::new());
    let config = PipelineConfig {
        snapshot_timeout: Duration::from_millis(30),
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(hal.clone(), config).unwrap();
    pipeline.build().unwrap();
    pipeline.create_channel(0, &jpeg_channel()).unwrap();

    let err = pipeline.grab_snapshot(0, 80, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!hal.is_receiving(EncoderDevice::Jpeg, 0));
    assert_eq!(hal.bindings().len(), 2);
    assert_eq!(pipeline.channels().state(0), Some(ChannelState::Created));
}

#[test]
fn snapshot_failure_mid_sequence_releases() {
    let (hal, mut pipeline) = built();
    pipeline.create_channel(0, &jpeg_channel()).unwrap();
    hal.fail("venc.start_frames", HalCode(-5));

    let err = pipeline.grab_snapshot(0, 80, true).unwrap_err();
    assert_eq!(err.code(), Some(-5));
    assert!(!hal.grayscale());
    assert_eq!(hal.bindings().len(), 2);
    assert!(!hal.ops().contains(&"venc.stop".to_string()));
}

#[test]
fn snapshot_empty_frame() {
    let (hal, mut pipeline) = built();
    pipeline.create_channel(3, &jpeg_channel()).unwrap();
    hal.push_frame(EncoderDevice::Jpeg, 3, Vec::new());

    let err = pipeline.grab_snapshot(3, 80, false).unwrap_err();
    assert!(matches!(err, MediaError::EmptyFrame(3)));
    assert_eq!(hal.bindings().len(), 2);
}

#[test]
fn snapshot_rejects_streaming_channel() {
    let (_hal, mut pipeline) = built();
    pipeline.create_channel(0, &EncoderConfig::default()).unwrap();
    assert!(matches!(
        pipeline.grab_snapshot(0, 80, false),
        Err(MediaError::ChannelBusy(0))
    ));
    assert!(matches!(
        pipeline.grab_snapshot(1, 80, false),
        Err(MediaError::ChannelNotActive(1))
    ));
}

#[test]
fn destroy_all_stops_at_first_failure() {
    let (hal, mut pipeline) = built();
    pipeline.create_channel(0, &EncoderConfig::default()).unwrap();
    pipeline
        .create_channel(
            1,
            &EncoderConfig {
                codec: Codec::H265,
                mode: RateMode::Vbr,
                ..EncoderConfig::default()
            },
        )
        .unwrap();
    hal.fail("venc.destroy", HalCode(-1));

    assert!(pipeline.destroy_all().is_err());
    assert_eq!(pipeline.channels().state(0), Some(ChannelState::Idle));
    assert_eq!(pipeline.channels().state(1), Some(ChannelState::Receiving));

    hal.clear_failures();
    pipeline.destroy_all().unwrap();
    assert_eq!(pipeline.channels().state(1), Some(ChannelState::Idle));
}

#[test]
fn shutdown_releases_pipeline_after_channel_failure() {
    let (hal, mut pipeline) = built();
    pipeline.create_channel(0, &EncoderConfig::default()).unwrap();
    pipeline
        .create_channel(
            1,
            &EncoderConfig {
                codec: Codec::H265,
                mode: RateMode::Vbr,
                ..EncoderConfig::default()
            },
        )
        .unwrap();
    hal.fail("venc.destroy", HalCode(-7));

    let err = pipeline.shutdown().unwrap_err();
    assert_eq!(err.code(), Some(-7));
    assert!(!pipeline.is_built());
    assert_eq!(pipeline.channels().active_indices(), Vec::<u8>::new());
    assert!(hal.bindings().is_empty());
    assert_eq!(hal.ops().last().map(String::as_str), Some("sensor.disable"));
}

#[test]
fn shutdown_of_unbuilt_pipeline_is_quiet() {
    let hal = Arc::new(SimulatedHal::new());
    let mut pipeline = Pipeline::new(hal.clone(), PipelineConfig::default()).unwrap();
    pipeline.shutdown().unwrap();
    assert!(hal.calls().is_empty());
}

#[test]
fn destroy_releases_live_channels_first() {
    let (hal, mut pipeline) = built();
    pipeline.create_channel(0, &EncoderConfig::default()).unwrap();
    hal.clear_calls();

    pipeline.destroy().unwrap();
    let ops = hal.ops();
    assert_eq!(ops.first().map(String::as_str), Some("venc.stop"));
    assert!(hal.bindings().is_empty());
    assert_eq!(pipeline.channels().state(0), Some(ChannelState::Idle));
}
