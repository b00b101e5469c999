//! Progress tracking for archive operations.
//!
//! The engine reports totals and completed amounts from its own threads. The
//! tracker aggregates them lock-free and decides when a notification is due,
//! so handlers are not flooded with one dispatched action per engine call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Snapshot handed to a handler's progress hook.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub elapsed_time: Duration,
    pub speed_mbps: f32,
    pub progress_percent: f32,
}

pub struct ProgressTracker {
    total_bytes: AtomicU64,
    processed_bytes: AtomicU64,
    start_time: Instant,
    /// `None` until the first notification went out.
    last_emit_time: Mutex<Option<Instant>>,
    emit_interval: Duration,
}

impl ProgressTracker {
    pub fn new(emit_interval: Duration) -> Self {
        Self {
            total_bytes: AtomicU64::new(0),
            processed_bytes: AtomicU64::new(0),
            start_time: Instant::now(),
            last_emit_time: Mutex::new(None),
            emit_interval,
        }
    }

    pub fn set_total(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Records the completed amount. Returns a snapshot when a notification
    /// is due: the first report, the final one, or one emit interval after
    /// the previous notification.
    pub fn set_completed(&self, bytes: u64) -> Option<ProgressState> {
        self.processed_bytes.store(bytes, Ordering::Relaxed);

        let now = Instant::now();
        let finished = bytes >= self.total_bytes.load(Ordering::Relaxed);
        let mut last = self.last_emit_time.lock().unwrap_or_else(PoisonError::into_inner);
        let due = match *last {
            None => true,
            Some(prev) => finished || now.duration_since(prev) >= self.emit_interval,
        };
        if !due {
            return None;
        }
        *last = Some(now);
        drop(last);
        Some(self.state())
    }

    /// Current progress state
    pub fn state(&self) -> ProgressState {
        let total_bytes = self.total_bytes.load(Ordering::Relaxed);
        let processed_bytes = self.processed_bytes.load(Ordering::Relaxed);
        let elapsed_time = self.start_time.elapsed();

        // Calculate speed in MB/s
        let speed_mbps = if elapsed_time.as_secs_f32() > 0.0 {
            let mb_processed = processed_bytes as f32 / (1024.0 * 1024.0);
            mb_processed / elapsed_time.as_secs_f32()
        } else {
            0.0
        };

        let progress_percent = if total_bytes > 0 {
            ((processed_bytes as f32 / total_bytes as f32) * 100.0).min(100.0)
        } else {
            0.0
        };

        ProgressState { total_bytes, processed_bytes, elapsed_time, speed_mbps, progress_percent }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
