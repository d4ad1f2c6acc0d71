//! Per-session I/O counters.
//!
//! Updated only by the I/O-handling path; read from anywhere. Times are
//! milliseconds since the Unix epoch, zero until the first read or write.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Byte counters and last-activity timestamps.
#[derive(Debug, Default)]
pub struct IoStats {
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    last_read_ms: AtomicI64,
    last_write_ms: AtomicI64,
}

impl IoStats {
    /// Fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` bytes read at `now_ms`.
    pub fn record_read(&self, count: u64, now_ms: i64) {
        let _ = self.read_bytes.fetch_add(count, Ordering::Relaxed);
        let _ = self.last_read_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// Record `count` bytes written at `now_ms`.
    pub fn record_write(&self, count: u64, now_ms: i64) {
        let _ = self.written_bytes.fetch_add(count, Ordering::Relaxed);
        let _ = self.last_write_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// Total bytes read.
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    /// Total bytes written.
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::Relaxed)
    }

    /// Time of the last read.
    pub fn last_read_time(&self) -> i64 {
        self.last_read_ms.load(Ordering::Relaxed)
    }

    /// Time of the last write.
    pub fn last_write_time(&self) -> i64 {
        self.last_write_ms.load(Ordering::Relaxed)
    }

    /// Latest of the last read and last write times.
    pub fn last_io_time(&self) -> i64 {
        self.last_read_time().max(self.last_write_time())
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
