//! RTP sender thread: handoff buffer → packetizer → UDP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::handoff::{Frame, FrameHandoff};
use super::stats::{StreamerSnapshot, StreamerStats};
use crate::config::RtpConfig;
use crate::error::Result;
use crate::media::{RtpPacketizer, annexb};
use crate::transport::UdpTransport;

/// Live RTP output for one destination.
///
/// Owns the sender thread. The packetizer is shared so SDP producers can
/// read its SSRC, payload type and captured parameter sets.
pub struct RtpSender {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    packetizer: Arc<Mutex<RtpPacketizer>>,
    stats: Arc<StreamerStats>,
    local_addr: SocketAddr,
    destination: SocketAddr,
}

impl RtpSender {
    /// Bind the socket and start the sender thread.
    ///
    /// The thread runs until `running` clears.
    pub fn start(config: &RtpConfig, handoff: Arc<FrameHandoff>, running: Arc<AtomicBool>) -> Result<Self> {
        config.validate()?;
        let packetizer = if config.random_ssrc {
            RtpPacketizer::with_random_ssrc(config.payload_type, config.packet_size)?
        } else {
            RtpPacketizer::new(config.payload_type, config.ssrc, config.packet_size)?
        };
        let transport = UdpTransport::bind(config.destination)?;
        let local_addr = transport.local_addr()?;
        let packetizer = Arc::new(Mutex::new(packetizer));
        let stats = Arc::new(StreamerStats::default());

        let worker = SenderLoop {
            transport,
            packetizer: packetizer.clone(),
            handoff,
            running: running.clone(),
            stats: stats.clone(),
            poll: config.poll_interval,
        };
        let handle = thread::Builder::new()
            .name("rtp-sender".into())
            .spawn(move || worker.run())?;

        tracing::info!(
            destination = %config.destination,
            packet_size = config.packet_size,
            pt = config.payload_type,
            "RTP sender started"
        );

        Ok(Self {
            running,
            worker: Some(handle),
            packetizer,
            stats,
            local_addr,
            destination: config.destination,
        })
    }

    /// Clear the running flag and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("RTP sender thread panicked");
            }
            tracing::info!("RTP sender stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn packetizer(&self) -> Arc<Mutex<RtpPacketizer>> {
        self.packetizer.clone()
    }

    pub fn stats(&self) -> StreamerSnapshot {
        self.stats.snapshot()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl Drop for RtpSender {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SenderLoop {
    transport: UdpTransport,
    packetizer: Arc<Mutex<RtpPacketizer>>,
    handoff: Arc<FrameHandoff>,
    running: Arc<AtomicBool>,
    stats: Arc<StreamerStats>,
    poll: Duration,
}

impl SenderLoop {
    fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            let Some(frame) = self.handoff.take(self.poll) else {
                continue;
            };
            self.send_frame(&frame);
            self.handoff.recycle(frame.data);
        }
    }

    /// Packetize every NAL of the frame in order and send each packet on
    /// its own. A NAL that cannot be packetized and a failed send are both
    /// counted and skipped.
    fn send_frame(&self, frame: &Frame) {
        let mut packetizer = self.packetizer.lock();
        for nal in annexb::nal_units(&frame.data) {
            let packets = match packetizer.packetize(frame.codec, nal) {
                Ok(packets) => packets,
                Err(e) => {
                    self.stats.nal_dropped();
                    tracing::warn!(generation = frame.generation, error = %e, "NAL unit not packetized");
                    continue;
                }
            };
            for packet in &packets {
                match self.transport.send(packet) {
                    Ok(n) => self.stats.packet_sent(n),
                    Err(e) => {
                        self.stats.send_failed();
                        tracing::warn!(
                            destination = %self.transport.destination(),
                            error = %e,
                            "RTP send failed"
                        );
                    }
                }
            }
        }
        self.stats.unit_sent();
        tracing::trace!(
            generation = frame.generation,
            seq = packetizer.next_sequence(),
            "frame sent"
        );
    }
}
