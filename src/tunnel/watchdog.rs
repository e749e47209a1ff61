//! Inactivity watchdog for the upstream stream.
//!
//! Armed when the upstream stream opens and re-armed on every upstream write
//! attempt. Downstream-bound traffic does not count as activity. On expiry the
//! session notifies the downstream peer and closes the upstream stream.

use std::time::Duration;

use tokio::time::Instant;

use crate::timer::Timer;

pub struct InactivityWatchdog {
    ttl_secs: f64,
    ttl: Duration,
    timer: Timer,
}

impl InactivityWatchdog {
    pub fn new(ttl_secs: f64) -> Self {
        Self {
            ttl_secs,
            ttl: Duration::try_from_secs_f64(ttl_secs).unwrap_or(Duration::MAX),
            timer: Timer::new(),
        }
    }

    /// Restart the countdown from now.
    pub fn arm(&mut self) {
        self.timer.schedule(self.ttl);
    }

    pub fn disarm(&mut self) {
        self.timer.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub async fn expired(&mut self) {
        self.timer.fired().await;
    }

    /// Message sent downstream when the watchdog closes the upstream stream.
    pub fn notice(&self) -> String {
        format!(
            "ACTIVELY CLOSED SSH CONNECTION (inactivity for {}s)",
            self.ttl_secs
        )
    }
}
