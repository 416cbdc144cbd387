//! Latest-wins frame handoff between a producer and the RTP sender.
//!
//! Two buffers circulate: the producer fills one outside the lock, then
//! swaps it in as the readable generation. Whatever generation was still
//! unread is discarded and its buffer becomes the next write target. The
//! reader takes the readable buffer by value, so it can never observe a
//! half-written frame, and hands it back with [`FrameHandoff::recycle`].
//!
//! There is no backpressure: a slow reader simply sees fewer generations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{MediaError, Result};
use crate::media::{AccessUnit, Codec};

/// One published generation.
#[derive(Debug)]
pub struct Frame {
    pub codec: Codec,
    pub generation: u64,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct Slots {
    readable: Option<Frame>,
    spare: Option<Vec<u8>>,
    generation: u64,
}

pub struct FrameHandoff {
    slots: Mutex<Slots>,
    ready: Condvar,
    capacity: usize,
    overwritten: AtomicU64,
    rejected: AtomicU64,
}

impl FrameHandoff {
    /// `capacity` bounds the size of one frame in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            ready: Condvar::new(),
            capacity,
            overwritten: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish one complete access unit. Returns its generation number.
    pub fn publish(&self, codec: Codec, data: &[u8]) -> Result<u64> {
        if data.len() > self.capacity {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(MediaError::FrameTooLarge {
                size: data.len(),
                capacity: self.capacity,
            });
        }

        let mut buf = self
            .slots
            .lock()
            .spare
            .take()
            .unwrap_or_else(|| Vec::with_capacity(data.len()));
        buf.clear();
        buf.extend_from_slice(data);

        let mut slots = self.slots.lock();
        slots.generation += 1;
        let generation = slots.generation;
        let frame = Frame {
            codec,
            generation,
            data: buf,
        };
        if let Some(stale) = slots.readable.replace(frame) {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(generation = stale.generation, "unread frame overwritten");
            slots.spare.get_or_insert(stale.data);
        }
        drop(slots);
        self.ready.notify_one();
        Ok(generation)
    }

    /// Publish an access unit from the dispatcher. JPEG units are not
    /// streamed over RTP and are skipped.
    pub fn publish_unit(&self, unit: &AccessUnit) {
        if unit.codec.is_jpeg() {
            tracing::trace!(channel = unit.channel, "JPEG unit not handed off");
            return;
        }
        if let Err(e) = self.publish(unit.codec, unit.data()) {
            tracing::warn!(channel = unit.channel, error = %e, "frame dropped");
        }
    }

    /// Take the newest unread generation, waiting up to `timeout`.
    pub fn take(&self, timeout: Duration) -> Option<Frame> {
        let mut slots = self.slots.lock();
        if slots.readable.is_none() {
            self.ready
                .wait_while_for(&mut slots, |s| s.readable.is_none(), timeout);
        }
        slots.readable.take()
    }

    /// Return a consumed frame's buffer for reuse.
    pub fn recycle(&self, buf: Vec<u8>) {
        let mut slots = self.slots.lock();
        if slots.spare.is_none() {
            slots.spare = Some(buf);
        }
    }

    /// Generations discarded before the reader got to them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Frames refused for exceeding the capacity.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Last published generation (0 before the first publish).
    pub fn generation(&self) -> u64 {
        self.slots.lock().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn latest_generation_wins() {
        let handoff = FrameHandoff::new(64);
        handoff.publish(Codec::H264, b"first").unwrap();
        let g2 = handoff.publish(Codec::H264, b"second").unwrap();

        let frame = handoff.take(Duration::ZERO).unwrap();
        assert_eq!(frame.generation, g2);
        assert_eq!(frame.data, b"second");
        assert_eq!(handoff.overwritten(), 1);
        assert!(handoff.take(Duration::ZERO).is_none());
    }

    #[test]
    fn oversize_frame_rejected() {
        let handoff = FrameHandoff::new(4);
        let err = handoff.publish(Codec::H265, b"too big").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert_eq!(handoff.rejected(), 1);
        assert_eq!(handoff.generation(), 0);
    }

    #[test]
    fn recycled_buffer_is_reused() {
        let handoff = FrameHandoff::new(1024);
        handoff.publish(Codec::H264, &[1; 512]).unwrap();
        let frame = handoff.take(Duration::ZERO).unwrap();
        let ptr = frame.data.as_ptr();
        handoff.recycle(frame.data);

        handoff.publish(Codec::H264, &[2; 100]).unwrap();
        let frame = handoff.take(Duration::ZERO).unwrap();
        assert_eq!(frame.data.as_ptr(), ptr);
        assert_eq!(frame.data, vec![2; 100]);
    }

    #[test]
    fn take_waits_for_publisher() {
        let handoff = Arc::new(FrameHandoff::new(64));
        let producer = {
            let handoff = handoff.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                handoff.publish(Codec::H264, b"late").unwrap();
            })
        };
        let frame = handoff.take(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();
        assert_eq!(frame.data, b"late");
    }

    #[test]
    fn concurrent_producers_never_tear() {
        let handoff = Arc::new(FrameHandoff::new(4096));
        let producers: Vec<_> = (0u8..4)
            .map(|id| {
                let handoff = handoff.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        handoff.publish(Codec::H264, &[id; 4096]).unwrap();
                    }
                })
            })
            .collect();

        let mut seen = 0;
        while seen < 50 {
            if let Some(frame) = handoff.take(Duration::from_millis(50)) {
                let first = frame.data[0];
                assert!(frame.data.iter().all(|&b| b == first));
                handoff.recycle(frame.data);
                seen += 1;
            } else if producers.iter().all(|p| p.is_finished()) {
                break;
            }
        }
        for p in producers {
            p.join().unwrap();
        }
    }

    #[test]
    fn jpeg_units_are_not_handed_off() {
        let handoff = FrameHandoff::new(64);
        let packets = [crate::media::StreamPacket {
            data: vec![0xFF, 0xD8],
            timestamp_us: 0,
        }];
        handoff.publish_unit(&AccessUnit::from_packets(0, Codec::Mjpeg, 0, &packets));
        assert_eq!(handoff.generation(), 0);
    }
}
