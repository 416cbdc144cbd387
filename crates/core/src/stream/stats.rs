//! Streaming counters, updated lock-free from the worker threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// RTP sender counters.
#[derive(Debug, Default)]
pub struct StreamerStats {
    units_sent: AtomicU64,
    nals_dropped: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Point-in-time copy of [`StreamerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamerSnapshot {
    /// Access units fully handed to the socket.
    pub units_sent: u64,
    /// Sub-units skipped because they could not be packetized.
    pub nals_dropped: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

impl StreamerStats {
    pub(crate) fn packet_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn send_failed(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unit_sent(&self) {
        self.units_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn nal_dropped(&self) {
        self.nals_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamerSnapshot {
        StreamerSnapshot {
            units_sent: self.units_sent.load(Ordering::Relaxed),
            nals_dropped: self.nals_dropped.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

impl StreamerSnapshot {
    /// Bitrate in kbit/s between `previous` and `self`.
    pub fn bitrate_kbps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        let bytes = self.bytes_sent.saturating_sub(previous.bytes_sent);
        (bytes as f64 * 8.0) / elapsed_secs / 1000.0
    }

    /// Access units per second between `previous` and `self`.
    pub fn units_per_sec(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.units_sent.saturating_sub(previous.units_sent) as f64 / elapsed_secs
    }
}

/// Stream dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    empty_frames: AtomicU64,
    read_errors: AtomicU64,
    wait_timeouts: AtomicU64,
    wait_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub delivered: u64,
    pub empty_frames: u64,
    pub read_errors: u64,
    pub wait_timeouts: u64,
    /// Readiness waits the hardware refused.
    pub wait_failures: u64,
}

impl DispatchStats {
    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn empty_frame(&self) {
        self.empty_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn wait_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn wait_failed(&self) {
        self.wait_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            empty_frames: self.empty_frames.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            wait_failures: self.wait_failures.load(Ordering::Relaxed),
        }
    }
}
