//! Drains completed access units from every receiving encoder channel.
//!
//! The dispatcher waits on the readiness descriptors of all routed
//! channels at once. For each ready channel it queries the pending packet
//! count, fetches exactly that many packets, hands the assembled
//! [`AccessUnit`] to the channel's consumer and releases the stream back
//! to the encoder. A timed-out wait and an empty frame are both normal and
//! only logged; a failed query or fetch ends the current cycle, and the
//! next cycle starts over with every channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::stats::{DispatchSnapshot, DispatchStats};
use crate::config::DispatcherConfig;
use crate::error::{MediaError, Result};
use crate::hal::{EncoderDevice, Hal, ReadyHandle};
use crate::media::{AccessUnit, Codec};
use crate::pipeline::ChannelTable;

/// Receiver of one channel's access units.
pub trait StreamConsumer: Send {
    fn on_access_unit(&mut self, unit: AccessUnit);
}

impl<F> StreamConsumer for F
where
    F: FnMut(AccessUnit) + Send,
{
    fn on_access_unit(&mut self, unit: AccessUnit) {
        self(unit)
    }
}

/// Channel index to consumer.
pub struct RouteTable {
    routes: Vec<Option<Box<dyn StreamConsumer>>>,
}

impl RouteTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            routes: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Route `channel` to `consumer`, replacing any earlier route.
    pub fn route(&mut self, channel: u8, consumer: impl StreamConsumer + 'static) -> Result<()> {
        let slot = self
            .routes
            .get_mut(channel as usize)
            .ok_or(MediaError::InvalidChannel(channel))?;
        *slot = Some(Box::new(consumer));
        Ok(())
    }

    pub fn unroute(&mut self, channel: u8) {
        if let Some(slot) = self.routes.get_mut(channel as usize) {
            *slot = None;
        }
    }

    pub fn is_routed(&self, channel: u8) -> bool {
        self.routes
            .get(channel as usize)
            .is_some_and(|r| r.is_some())
    }

    fn get_mut(&mut self, channel: u8) -> Option<&mut Box<dyn StreamConsumer>> {
        self.routes.get_mut(channel as usize)?.as_mut()
    }
}

struct Watched {
    handle: ReadyHandle,
    index: u8,
    device: EncoderDevice,
    codec: Codec,
}

pub struct StreamDispatcher {
    hal: Arc<dyn Hal>,
    channels: Arc<ChannelTable>,
    routes: RouteTable,
    running: Arc<AtomicBool>,
    config: DispatcherConfig,
    stats: Arc<DispatchStats>,
}

impl StreamDispatcher {
    pub fn new(
        hal: Arc<dyn Hal>,
        channels: Arc<ChannelTable>,
        running: Arc<AtomicBool>,
        config: DispatcherConfig,
    ) -> Self {
        let routes = RouteTable::new(channels.capacity());
        Self {
            hal,
            channels,
            routes,
            running,
            config,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn route(&mut self, channel: u8, consumer: impl StreamConsumer + 'static) -> Result<()> {
        self.routes.route(channel, consumer)
    }

    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    /// Run on a dedicated thread until the running flag clears.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        Ok(thread::Builder::new()
            .name("stream-dispatch".into())
            .spawn(move || self.run())?)
    }

    /// A failed cycle backs off for `idle_interval` before the next one.
    pub fn run(mut self) {
        tracing::info!("stream dispatcher started");
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.poll_once() {
                tracing::warn!(error = %e, code = ?e.code(), "dispatch cycle failed");
                thread::sleep(self.config.idle_interval);
            }
        }
        tracing::info!("stream dispatcher stopped");
    }

    /// One wait-and-drain cycle. Returns the number of units delivered.
    pub fn poll_once(&mut self) -> Result<usize> {
        let watched = self.watch_list();
        if watched.is_empty() {
            thread::sleep(self.config.idle_interval);
            return Ok(0);
        }

        let handles: Vec<ReadyHandle> = watched.iter().map(|w| w.handle).collect();
        let ready = match self.hal.wait_ready(&handles, self.config.wait_timeout) {
            Ok(ready) => ready,
            Err(code) => {
                self.stats.wait_failed();
                return Err(MediaError::HardwareRejected {
                    op: "venc.wait_ready",
                    code,
                });
            }
        };
        if ready.is_empty() {
            self.stats.wait_timeout();
            tracing::debug!(channels = watched.len(), "no encoder output before timeout");
            return Ok(0);
        }

        let mut delivered = 0;
        for w in watched.iter().filter(|w| ready.contains(&w.handle)) {
            let status = match self.hal.query(w.device, w.index) {
                Ok(status) => status,
                Err(code) => {
                    self.stats.read_error();
                    tracing::warn!(channel = w.index, %code, "stream query failed");
                    break;
                }
            };
            if status.pending_packets == 0 {
                self.stats.empty_frame();
                tracing::debug!(channel = w.index, "empty frame skipped");
                continue;
            }

            let stream = match self
                .hal
                .fetch_stream(w.device, w.index, status.pending_packets)
            {
                Ok(stream) => stream,
                Err(code) => {
                    self.stats.read_error();
                    tracing::warn!(channel = w.index, %code, "stream fetch failed");
                    break;
                }
            };

            let unit = AccessUnit::from_packets(w.index, w.codec, stream.sequence, &stream.packets);
            tracing::trace!(
                channel = w.index,
                seq = stream.sequence,
                packets = stream.packets.len(),
                key_frame = unit.key_frame,
                "access unit"
            );
            if let Some(consumer) = self.routes.get_mut(w.index) {
                consumer.on_access_unit(unit);
            }
            if let Err(code) = self.hal.release_stream(w.device, w.index, &stream) {
                tracing::warn!(channel = w.index, %code, "stream release failed");
            }
            self.stats.delivered();
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Routed, receiving channels with their readiness descriptors,
    /// acquiring descriptors on first sight.
    fn watch_list(&self) -> Vec<Watched> {
        let mut watched = Vec::new();
        for ch in self.channels.receiving() {
            let Some(codec) = ch.codec else { continue };
            if !self.routes.is_routed(ch.index) {
                continue;
            }
            let device = EncoderDevice::for_codec(codec);
            let handle = match ch.descriptor {
                Some(handle) => handle,
                None => match self.hal.descriptor(device, ch.index) {
                    Ok(handle) if self.channels.attach_descriptor(ch.index, handle) => {
                        tracing::debug!(channel = ch.index, fd = handle.0, "watching channel");
                        handle
                    }
                    Ok(_) => {
                        // Torn down between the snapshot and the attach.
                        if let Err(code) = self.hal.release_descriptor(device, ch.index) {
                            tracing::debug!(channel = ch.index, %code, "descriptor release failed");
                        }
                        continue;
                    }
                    Err(code) => {
                        tracing::warn!(channel = ch.index, %code, "no readiness descriptor");
                        continue;
                    }
                },
            };
            watched.push(Watched {
                handle,
                index: ch.index,
                device,
                codec,
            });
        }
        watched
    }
}
