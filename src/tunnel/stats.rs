//! Relay byte counters and the periodic report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::timer::Timer;

/// Bytes relayed in each direction since the session started. Never reset.
#[derive(Debug, Default)]
pub struct RelayCounters {
    /// Bytes read from the upstream stream, delivered or not.
    from_upstream: AtomicU64,
    /// Bytes received on the downstream connection.
    from_downstream: AtomicU64,
}

/// Point-in-time copy of [`RelayCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub from_upstream: u64,
    pub from_downstream: u64,
}

impl RelayCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_from_upstream(&self, bytes: usize) {
        self.from_upstream.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_from_downstream(&self, bytes: usize) {
        self.from_downstream.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            from_upstream: self.from_upstream.load(Ordering::Relaxed),
            from_downstream: self.from_downstream.load(Ordering::Relaxed),
        }
    }
}

/// Logs the counters every `interval` while running, skipping unchanged ones.
pub struct StatsReporter {
    interval: Duration,
    timer: Timer,
    last: RelayStats,
}

impl StatsReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timer: Timer::new(),
            last: RelayStats::default(),
        }
    }

    pub fn start(&mut self) {
        self.timer.schedule(self.interval);
    }

    pub fn stop(&mut self) {
        self.timer.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_armed()
    }

    pub async fn due(&mut self) {
        self.timer.fired().await;
    }

    /// Report if anything changed and schedule the next report.
    /// Returns the stats that were logged.
    pub fn report(&mut self, counters: &RelayCounters) -> Option<RelayStats> {
        self.timer.schedule(self.interval);
        let now = counters.snapshot();
        if now == self.last {
            return None;
        }
        debug!(
            from_upstream = now.from_upstream,
            from_downstream = now.from_downstream,
            "Relayed bytes"
        );
        self.last = now;
        Some(now)
    }
}
