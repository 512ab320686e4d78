//! RAII timing for tool invocations and provider round-trips.
//!
//! ```rust,ignore
//! let _timing = TimingGuard::tool("read_file");
//! // duration is logged when the guard drops
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Logs the elapsed time of an operation when dropped.
pub struct TimingGuard {
    kind: &'static str,
    name: String,
    start: Instant,
    slow_after: Duration,
}

impl TimingGuard {
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(kind, name = %name, "Starting operation");
        Self {
            kind,
            name,
            start: Instant::now(),
            slow_after: Duration::from_secs(5),
        }
    }

    pub fn tool(name: impl Into<String>) -> Self {
        Self::new("tool", name)
    }

    pub fn provider(name: impl Into<String>) -> Self {
        Self::new("provider", name)
    }

    /// Durations at or above this are logged as slow.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_after = threshold;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let duration_ms = elapsed.as_millis() as u64;

        if elapsed >= self.slow_after {
            warn!(kind = self.kind, name = %self.name, duration_ms, "Slow operation completed");
        } else if duration_ms >= 100 {
            info!(kind = self.kind, name = %self.name, duration_ms, "Operation completed");
        } else {
            debug!(kind = self.kind, name = %self.name, duration_ms, "Operation completed");
        }
    }
}
