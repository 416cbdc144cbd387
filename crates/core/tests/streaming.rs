//! Integration test: encoder output through the dispatcher, the frame
//! handoff and the RTP sender to a loopback UDP socket.

use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use ipcam::hal::sim::SimulatedHal;
use ipcam::hal::{EncoderDevice, HalCode};
use ipcam::media::StreamPacket;
use ipcam::{
    AccessUnit, Codec, DispatcherConfig, EncoderConfig, FrameHandoff, Pipeline, PipelineConfig,
    RateMode, RtpConfig, RtpSender, StreamDispatcher,
};

fn packet(data: Vec<u8>) -> StreamPacket {
    StreamPacket {
        data,
        timestamp_us: 1_000,
    }
}

/// SPS + PPS + a 3000-byte IDR slice, Annex B framed.
fn key_frame() -> Vec<u8> {
    let mut au = vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e, 0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80];
    au.extend_from_slice(&[0, 0, 0, 1, 0x65]);
    au.extend((0..2999u32).map(|i| (i % 251) as u8 + 1));
    au
}

fn streaming_pipeline(hal: &Arc<SimulatedHal>) -> Pipeline {
    let mut pipeline = Pipeline::new(hal.clone(), PipelineConfig::default()).unwrap();
    pipeline.build().unwrap();
    pipeline.create_channel(0, &EncoderConfig::default()).unwrap();
    pipeline
        .create_channel(
            1,
            &EncoderConfig {
                codec: Codec::Mjpeg,
                mode: RateMode::Cbr,
                width: 640,
                height: 480,
                ..EncoderConfig::default()
            },
        )
        .unwrap();
    pipeline
}

fn quick() -> DispatcherConfig {
    DispatcherConfig {
        wait_timeout: Duration::from_millis(10),
        idle_interval: Duration::from_millis(1),
    }
}

#[test]
fn dispatcher_routes_each_channel() {
    let hal = Arc::new(SimulatedHal::new());
    let pipeline = streaming_pipeline(&hal);
    let running = Arc::new(AtomicBool::new(true));
    let mut dispatcher = StreamDispatcher::new(hal.clone(), pipeline.channels(), running, quick());

    let (tx, rx) = mpsc::channel();
    let tx_mjpeg = tx.clone();
    dispatcher.route(0, move |unit: AccessUnit| tx.send(unit).unwrap()).unwrap();
    dispatcher
        .route(1, move |unit: AccessUnit| tx_mjpeg.send(unit).unwrap())
        .unwrap();

    hal.push_frame(EncoderDevice::H26x, 0, vec![packet(key_frame())]);
    hal.push_frame(EncoderDevice::Jpeg, 1, vec![packet(vec![0xFF, 0xD8]), packet(vec![0xFF, 0xD9])]);

    assert_eq!(dispatcher.poll_once().unwrap(), 2);
    let units: Vec<AccessUnit> = rx.try_iter().collect();
    assert_eq!(units.len(), 2);

    let h264 = units.iter().find(|u| u.channel == 0).unwrap();
    assert_eq!(h264.codec, Codec::H264);
    assert!(h264.key_frame);
    assert_eq!(h264.unit_count(), 3);

    let mjpeg = units.iter().find(|u| u.channel == 1).unwrap();
    assert_eq!(mjpeg.data(), &[0xFF, 0xD8, 0xFF, 0xD9]);
    let packets: Vec<&[u8]> = mjpeg.packets().map(|p| p.data).collect();
    let expected: Vec<&[u8]> = vec![&[0xFF, 0xD8], &[0xFF, 0xD9]];
    assert_eq!(packets, expected);
    assert!(mjpeg.packets().all(|p| p.timestamp_us == 1_000));

    assert_eq!(hal.released_streams(EncoderDevice::H26x, 0), 1);
    assert_eq!(hal.released_streams(EncoderDevice::Jpeg, 1), 1);
    assert_eq!(dispatcher.snapshot().delivered, 2);
}

#[test]
fn dispatcher_skips_empty_frames_and_timeouts() {
    let hal = Arc::new(SimulatedHal::new());
    let pipeline = streaming_pipeline(&hal);
    let running = Arc::new(AtomicBool::new(true));
    let mut dispatcher = StreamDispatcher::new(hal.clone(), pipeline.channels(), running, quick());
    let (tx, rx) = mpsc::channel();
    dispatcher.route(0, move |unit: AccessUnit| tx.send(unit.sequence).unwrap()).unwrap();

    assert_eq!(dispatcher.poll_once().unwrap(), 0);
    assert_eq!(dispatcher.snapshot().wait_timeouts, 1);

    hal.push_frame(EncoderDevice::H26x, 0, Vec::new());
    assert_eq!(dispatcher.poll_once().unwrap(), 0);
    assert_eq!(dispatcher.snapshot().empty_frames, 1);

    hal.push_frame(EncoderDevice::H26x, 0, vec![packet(vec![0, 0, 1, 0x41, 0x9a])]);
    assert_eq!(dispatcher.poll_once().unwrap(), 1);
    assert_eq!(rx.try_recv().unwrap(), 0);
}

#[test]
fn dispatcher_survives_fetch_failure() {
    let hal = Arc::new(SimulatedHal::new());
    let pipeline = streaming_pipeline(&hal);
    let running = Arc::new(AtomicBool::new(true));
    let mut dispatcher = StreamDispatcher::new(hal.clone(), pipeline.channels(), running, quick());
    let (tx, rx) = mpsc::channel();
    dispatcher.route(0, move |unit: AccessUnit| tx.send(unit.sequence).unwrap()).unwrap();

    hal.push_frame(EncoderDevice::H26x, 0, vec![packet(vec![0, 0, 1, 0x41, 0x9a])]);
    hal.fail("venc.fetch", HalCode(-3));
    assert_eq!(dispatcher.poll_once().unwrap(), 0);
    assert_eq!(dispatcher.snapshot().read_errors, 1);
    assert_eq!(hal.queued_frames(EncoderDevice::H26x, 0), 1);

    hal.clear_failures();
    assert_eq!(dispatcher.poll_once().unwrap(), 1);
    assert_eq!(rx.try_recv().unwrap(), 0);
}

#[test]
fn refused_wait_backs_off() {
    let hal = Arc::new(SimulatedHal::new());
    let pipeline = streaming_pipeline(&hal);
    let running = Arc::new(AtomicBool::new(true));
    let mut dispatcher = StreamDispatcher::new(
        hal.clone(),
        pipeline.channels(),
        running.clone(),
        DispatcherConfig {
            wait_timeout: Duration::from_millis(100),
            idle_interval: Duration::from_millis(20),
        },
    );
    dispatcher.route(0, |_unit: AccessUnit| {}).unwrap();
    let stats = dispatcher.stats();

    hal.fail("venc.wait_ready", HalCode(-9));
    let handle = dispatcher.spawn().unwrap();
    thread::sleep(Duration::from_millis(200));
    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    let failures = stats.snapshot().wait_failures;
    assert!((1..=20).contains(&failures), "{failures} refused waits in 200 ms");
}

#[test]
fn unrouted_channels_are_not_drained() {
    let hal = Arc::new(SimulatedHal::new());
    let pipeline = streaming_pipeline(&hal);
    let running = Arc::new(AtomicBool::new(true));
    let mut dispatcher = StreamDispatcher::new(hal.clone(), pipeline.channels(), running, quick());
    dispatcher.route(1, |_unit: AccessUnit| {}).unwrap();

    hal.push_frame(EncoderDevice::H26x, 0, vec![packet(vec![0, 0, 1, 0x41, 0x9a])]);
    assert_eq!(dispatcher.poll_once().unwrap(), 0);
    assert_eq!(hal.queued_frames(EncoderDevice::H26x, 0), 1);
}

#[test]
fn key_frame_reaches_udp_as_rtp() {
    let hal = Arc::new(SimulatedHal::new());
    let mut pipeline = streaming_pipeline(&hal);

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let rtp = RtpConfig {
        destination: receiver.local_addr().unwrap(),
        ..RtpConfig::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    let handoff = Arc::new(FrameHandoff::new(rtp.frame_capacity));
    let mut sender = RtpSender::start(&rtp, handoff.clone(), running.clone()).unwrap();

    let mut dispatcher = StreamDispatcher::new(hal.clone(), pipeline.channels(), running.clone(), quick());
    let sink = handoff.clone();
    dispatcher
        .route(0, move |unit: AccessUnit| sink.publish_unit(&unit))
        .unwrap();
    let dispatch_thread = dispatcher.spawn().unwrap();

    hal.push_frame(EncoderDevice::H26x, 0, vec![packet(key_frame())]);

    // SPS, PPS, then the IDR in three fragments (1458 + 1458 + 83 bytes).
    let mut packets = Vec::new();
    let mut buf = [0u8; 2048];
    while packets.len() < 5 {
        let (n, _) = receiver.recv_from(&mut buf).expect("RTP packet");
        packets.push(buf[..n].to_vec());
    }

    running.store(false, Ordering::SeqCst);
    dispatch_thread.join().unwrap();
    sender.stop();

    let seqs: Vec<u16> = packets
        .iter()
        .map(|p| u16::from_be_bytes([p[2], p[3]]))
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    assert!(packets.iter().all(|p| p[0] >> 6 == 2));
    assert!(packets
        .iter()
        .all(|p| u32::from_be_bytes([p[8], p[9], p[10], p[11]]) == 0x1234_5678));

    let markers: Vec<bool> = packets.iter().map(|p| p[1] & 0x80 != 0).collect();
    assert_eq!(markers, vec![false, false, false, false, true]);

    assert_eq!(packets[0][12], 0x67);
    assert_eq!(packets[1][12], 0x68);
    assert_eq!(packets[2][12] & 0x1f, 28);
    assert_eq!(packets[2][13], 0x80 | 5);
    assert_eq!(packets[4][13], 0x40 | 5);
    assert_eq!(packets[2].len(), 1472);
    assert_eq!(packets[4].len(), 12 + 2 + 83);

    let stats = sender.stats();
    assert_eq!(stats.packets_sent, 5);
    assert_eq!(stats.units_sent, 1);
    assert_eq!(stats.send_errors, 0);

    let fmtp = sender.packetizer().lock().parameter_sets().fmtp(Codec::H264).unwrap();
    assert!(fmtp.contains("profile-level-id=42001e"));

    pipeline.destroy().unwrap();
}

#[test]
fn unpacketizable_nals_are_skipped() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let rtp = RtpConfig {
        destination: receiver.local_addr().unwrap(),
        ..RtpConfig::default()
    };
    let running = Arc::new(AtomicBool::new(true));
    let handoff = Arc::new(FrameHandoff::new(rtp.frame_capacity));
    let mut sender = RtpSender::start(&rtp, handoff.clone(), running).unwrap();

    // MJPEG has no RTP mapping on this path: both NALs fail on their own.
    handoff
        .publish(Codec::Mjpeg, &[0, 0, 0, 1, 0x65, 1, 2, 0, 0, 0, 1, 0x41, 3])
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while sender.stats().nals_dropped < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(sender.stats().nals_dropped, 2);

    handoff.publish(Codec::H264, &[0, 0, 0, 1, 0x41, 0x9a, 0x01]).unwrap();
    let mut buf = [0u8; 2048];
    let (n, _) = receiver.recv_from(&mut buf).expect("RTP packet");
    assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 0);
    assert_eq!(&buf[12..n], &[0x41u8, 0x9a, 0x01][..]);

    sender.stop();
    let stats = sender.stats();
    assert_eq!(stats.units_sent, 2);
    assert_eq!(stats.packets_sent, 1);
}
