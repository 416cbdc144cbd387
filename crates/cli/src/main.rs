use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use ipcam::hal::EncoderDevice;
use ipcam::hal::sim::SimulatedHal;
use ipcam::media::StreamPacket;
use ipcam::stream::{DispatchStats, StreamerSnapshot};
use ipcam::{
    AccessUnit, Codec, DispatcherConfig, EncoderConfig, FrameHandoff, MediaError, Pipeline,
    PipelineConfig, RateMode, RtpConfig, RtpSender, StreamDispatcher,
};

const STREAM_CHANNEL: u8 = 0;
const SNAPSHOT_CHANNEL: u8 = 1;

#[derive(Clone, Copy, ValueEnum)]
enum VideoCodec {
    H264,
    H265,
}

impl From<VideoCodec> for Codec {
    fn from(codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::H264 => Codec::H264,
            VideoCodec::H265 => Codec::H265,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Cbr,
    Vbr,
    Qp,
    Abr,
    Avbr,
}

impl From<Mode> for RateMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Cbr => RateMode::Cbr,
            Mode::Vbr => RateMode::Vbr,
            Mode::Qp => RateMode::Qp,
            Mode::Abr => RateMode::Abr,
            Mode::Avbr => RateMode::Avbr,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "ipcam-streamer",
    about = "Stream a simulated camera pipeline as RTP over UDP"
)]
struct Args {
    /// RTP destination (host:port)
    #[arg(long, short, default_value = "127.0.0.1:5600")]
    destination: SocketAddr,

    #[arg(long, value_enum, default_value = "h264")]
    codec: VideoCodec,

    #[arg(long, value_enum, default_value = "cbr")]
    mode: Mode,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Target bitrate in kbit/s
    #[arg(long, default_value_t = 4096)]
    bitrate: u32,

    #[arg(long, default_value_t = 60)]
    gop: u32,

    /// RTP packet size including the 12-byte header
    #[arg(long, default_value_t = 1472)]
    packet_size: usize,

    #[arg(long, default_value_t = 96)]
    payload_type: u8,

    /// Pick a random SSRC instead of the fixed default
    #[arg(long)]
    random_ssrc: bool,

    /// Grab one grayscale JPEG snapshot after bring-up
    #[arg(long)]
    snapshot: bool,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        tracing::error!(kind = %e.kind(), code = ?e.code(), error = %e, "streamer failed");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> ipcam::Result<()> {
    let hal = Arc::new(SimulatedHal::new());
    let mut pipeline = Pipeline::new(
        hal.clone(),
        PipelineConfig {
            width: args.width,
            height: args.height,
            framerate: args.fps,
            ..PipelineConfig::default()
        },
    )?;
    if let Err(e) = pipeline.build() {
        release(&mut pipeline);
        return Err(e);
    }

    let encoder = EncoderConfig {
        codec: args.codec.into(),
        mode: args.mode.into(),
        width: args.width,
        height: args.height,
        framerate: args.fps,
        bitrate: args.bitrate,
        max_bitrate: args.bitrate,
        gop: args.gop,
        ..EncoderConfig::default()
    };
    if let Err(e) = pipeline.create_channel(STREAM_CHANNEL, &encoder) {
        release(&mut pipeline);
        return Err(e);
    }

    if args.snapshot {
        if let Err(e) = snapshot(&hal, &mut pipeline) {
            tracing::warn!(kind = %e.kind(), error = %e, "snapshot failed");
        }
    }

    let rtp = RtpConfig {
        destination: args.destination,
        packet_size: args.packet_size,
        payload_type: args.payload_type,
        random_ssrc: args.random_ssrc,
        ..RtpConfig::default()
    };
    let running = Arc::new(AtomicBool::new(true));
    let handoff = Arc::new(FrameHandoff::new(rtp.frame_capacity));
    let mut sender = match RtpSender::start(&rtp, handoff.clone(), running.clone()) {
        Ok(sender) => sender,
        Err(e) => {
            release(&mut pipeline);
            return Err(e);
        }
    };

    let workers = match start_workers(&hal, &pipeline, &encoder, &handoff, &running) {
        Ok(workers) => workers,
        Err(e) => {
            sender.stop();
            release(&mut pipeline);
            return Err(e);
        }
    };

    let started = Instant::now();
    println!(
        "Streaming {:?} {}x{}@{} to {} - press Enter to stop",
        encoder.codec, encoder.width, encoder.height, encoder.framerate, args.destination
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "stdin closed");
    }

    running.store(false, Ordering::SeqCst);
    let dispatch_stats = workers.dispatch_stats.clone();
    workers.join();
    let dispatched = dispatch_stats.snapshot();
    sender.stop();

    let elapsed = started.elapsed().as_secs_f64();
    let sent = sender.stats();
    tracing::info!(
        units = sent.units_sent,
        packets = sent.packets_sent,
        send_errors = sent.send_errors,
        nals_dropped = sent.nals_dropped,
        overwritten = handoff.overwritten(),
        empty_frames = dispatched.empty_frames,
        wait_failures = dispatched.wait_failures,
        kbps = sent.bitrate_kbps(&StreamerSnapshot::default(), elapsed),
        fps = sent.units_per_sec(&StreamerSnapshot::default(), elapsed),
        "stream stopped"
    );
    if let Some(fmtp) = sender.packetizer().lock().parameter_sets().fmtp(encoder.codec) {
        tracing::info!(pt = rtp.payload_type, %fmtp, "fmtp");
    }

    pipeline.shutdown()
}

struct Workers {
    dispatch: JoinHandle<()>,
    source: JoinHandle<()>,
    dispatch_stats: Arc<DispatchStats>,
}

impl Workers {
    fn join(self) {
        for (name, handle) in [("dispatcher", self.dispatch), ("source", self.source)] {
            if handle.join().is_err() {
                tracing::warn!(thread = name, "worker panicked");
            }
        }
    }
}

/// Start the dispatcher and the synthetic frame source. On failure nothing
/// is left running.
fn start_workers(
    hal: &Arc<SimulatedHal>,
    pipeline: &Pipeline,
    encoder: &EncoderConfig,
    handoff: &Arc<FrameHandoff>,
    running: &Arc<AtomicBool>,
) -> ipcam::Result<Workers> {
    let mut dispatcher = StreamDispatcher::new(
        hal.clone(),
        pipeline.channels(),
        running.clone(),
        DispatcherConfig::default(),
    );
    let sink = handoff.clone();
    dispatcher.route(STREAM_CHANNEL, move |unit: AccessUnit| sink.publish_unit(&unit))?;
    let dispatch_stats = dispatcher.stats();
    let dispatch = dispatcher.spawn()?;

    match spawn_source(hal.clone(), encoder, running.clone()) {
        Ok(source) => Ok(Workers {
            dispatch,
            source,
            dispatch_stats,
        }),
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            if dispatch.join().is_err() {
                tracing::warn!(thread = "dispatcher", "worker panicked");
            }
            Err(e)
        }
    }
}

/// Best-effort teardown on a failed start.
fn release(pipeline: &mut Pipeline) {
    if let Err(e) = pipeline.shutdown() {
        tracing::warn!(kind = %e.kind(), code = ?e.code(), error = %e, "teardown failed");
    }
}

fn snapshot(hal: &SimulatedHal, pipeline: &mut Pipeline) -> ipcam::Result<()> {
    let jpeg = EncoderConfig {
        codec: Codec::Jpeg,
        mode: RateMode::Qp,
        width: 640,
        height: 360,
        ..EncoderConfig::default()
    };
    pipeline.create_channel(SNAPSHOT_CHANNEL, &jpeg)?;

    let mut image = vec![0xFF, 0xD8];
    image.resize(16 * 1024, 0x80);
    image.extend_from_slice(&[0xFF, 0xD9]);
    hal.push_frame(
        EncoderDevice::Jpeg,
        SNAPSHOT_CHANNEL,
        vec![StreamPacket {
            data: image,
            timestamp_us: 0,
        }],
    );

    let grabbed = pipeline.grab_snapshot(SNAPSHOT_CHANNEL, 80, true);
    let destroyed = pipeline.destroy_channel(SNAPSHOT_CHANNEL);
    let bytes = grabbed?;
    destroyed?;
    tracing::info!(bytes = bytes.len(), "snapshot grabbed");
    Ok(())
}

/// Feed the simulated encoder with Annex B frames at the configured rate.
fn spawn_source(
    hal: Arc<SimulatedHal>,
    encoder: &EncoderConfig,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, MediaError> {
    let codec = encoder.codec;
    let gop = encoder.gop.max(1);
    let interval = Duration::from_secs(1) / encoder.framerate.max(1);
    let frame_bytes = (encoder.bitrate as usize * 1024 / 8 / encoder.framerate.max(1) as usize).max(64);
    let device = EncoderDevice::for_codec(codec);

    let handle = thread::Builder::new()
        .name("frame-source".into())
        .spawn(move || {
            let started = Instant::now();
            let mut index = 0u32;
            while running.load(Ordering::SeqCst) {
                let key = index % gop == 0;
                let data = synthetic_frame(codec, key, if key { frame_bytes * 4 } else { frame_bytes });
                hal.push_frame(
                    device,
                    STREAM_CHANNEL,
                    vec![StreamPacket {
                        data,
                        timestamp_us: started.elapsed().as_micros() as u64,
                    }],
                );
                index = index.wrapping_add(1);
                thread::sleep(interval);
            }
        })?;
    Ok(handle)
}

fn synthetic_frame(codec: Codec, key: bool, slice_len: usize) -> Vec<u8> {
    const START: [u8; 4] = [0, 0, 0, 1];
    let mut out = Vec::with_capacity(slice_len + 64);
    let mut nal = |header: &[u8], body: &[u8]| {
        out.extend_from_slice(&START);
        out.extend_from_slice(header);
        out.extend_from_slice(body);
    };

    let slice: Vec<u8> = (0..slice_len).map(|i| (i % 255) as u8 + 1).collect();
    match codec {
        Codec::H265 => {
            if key {
                nal(&[0x40, 0x01], &[0x0c, 0x01, 0xff, 0xff]);
                nal(&[0x42, 0x01], &[0x01, 0x01, 0x60, 0x00]);
                nal(&[0x44, 0x01], &[0xc1, 0x72, 0xb4]);
                nal(&[0x26, 0x01], &slice);
            } else {
                nal(&[0x02, 0x01], &slice);
            }
        }
        _ => {
            if key {
                nal(&[0x67], &[0x4d, 0x00, 0x28, 0xe9]);
                nal(&[0x68], &[0xee, 0x3c, 0x80]);
                nal(&[0x65], &slice);
            } else {
                nal(&[0x41], &slice);
            }
        }
    }
    out
}
