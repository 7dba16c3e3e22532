//! Instantaneous-throughput accounting shared by all upload workers.
//!
//! Every poll of an upload body records `(timestamp, bytes)` into a bounded
//! FIFO with a maintained running sum; the dispatcher's reporter divides the
//! sum by the window's time span. The clock has one-second resolution, so
//! the window is sized to span tens of seconds at saturation and rounding
//! amortizes over thousands of samples.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum number of `(timestamp, bytes)` samples kept in the window.
pub const MAX_WINDOW: usize = 5000;

struct MeterWindow {
    samples: VecDeque<(u64, u64)>,
    sum: u64,
}

/// Bounded time series of recent byte deltas.
///
/// Mutated from any worker via [`record`](TransferMeter::record) and read by
/// the reporter; one mutex guards both, held only for the O(1) update. The
/// meter is handed through the dispatcher rather than living in a global.
pub struct TransferMeter {
    inner: Mutex<MeterWindow>,
}

impl TransferMeter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MeterWindow {
                samples: VecDeque::with_capacity(MAX_WINDOW),
                sum: 0,
            }),
        }
    }

    /// Record `bytes` sent now.
    pub fn record(&self, bytes: u64) {
        self.record_at(now_secs(), bytes);
    }

    /// Record `bytes` sent at `timestamp` (seconds since the epoch).
    pub fn record_at(&self, timestamp: u64, bytes: u64) {
        let mut window = self.inner.lock().expect("transfer meter poisoned");
        if window.samples.len() >= MAX_WINDOW {
            if let Some((_, evicted)) = window.samples.pop_front() {
                window.sum -= evicted;
            }
        }
        window.samples.push_back((timestamp, bytes));
        window.sum += bytes;
    }

    /// Instantaneous throughput in bytes per second over the current window.
    /// Returns 0 when no samples have been recorded.
    pub fn throughput(&self) -> u64 {
        let window = self.inner.lock().expect("transfer meter poisoned");
        let (oldest, newest) = match (window.samples.front(), window.samples.back()) {
            (Some((oldest, _)), Some((newest, _))) => (*oldest, *newest),
            _ => return 0,
        };
        // The clock only ticks in whole seconds; a burst inside one tick
        // must not divide by zero.
        let span = newest.saturating_sub(oldest).max(1);
        window.sum / span
    }

    /// Total bytes currently represented by the window.
    pub fn window_sum(&self) -> u64 {
        self.inner.lock().expect("transfer meter poisoned").sum
    }

    /// Number of samples currently in the window.
    pub fn window_len(&self) -> usize {
        self.inner
            .lock()
            .expect("transfer meter poisoned")
            .samples
            .len()
    }
}

impl Default for TransferMeter {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Format bytes into human-readable string (e.g., "10.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format speed into human-readable string (e.g., "10.5 MB/s")
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}
