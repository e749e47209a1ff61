//! Cancellable one-shot timer for use inside a `select!` loop.
//!
//! A [`Timer`] holds at most one outstanding deadline. Scheduling replaces any
//! previous deadline, and [`Timer::fired`] pends forever while nothing is
//! scheduled, so a disarmed timer simply never wins a `select!` branch.
//! Dropping the `fired()` future (because another branch won) leaves the
//! deadline armed.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep_until, Instant, Sleep};

/// Deadline used when `now + after` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Default)]
pub struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire `after` from now, replacing any pending deadline.
    pub fn schedule(&mut self, after: Duration) {
        let now = Instant::now();
        let deadline = now.checked_add(after).unwrap_or(now + FAR_FUTURE);
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// When the pending deadline is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|s| s.deadline())
    }

    /// Resolve once the pending deadline passes, disarming the timer.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay_and_disarms() {
        let mut timer = Timer::new();
        let start = Instant::now();
        timer.schedule(Duration::from_millis(200));
        assert!(timer.is_armed());

        timer.fired().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_pushes_deadline_back() {
        let mut timer = Timer::new();
        let start = Instant::now();
        timer.schedule(Duration::from_millis(200));
        tokio::time::advance(Duration::from_millis(150)).await;
        timer.schedule(Duration::from_millis(200));
        assert_eq!(timer.deadline(), Some(start + Duration::from_millis(350)));

        timer.fired().await;
        assert!(start.elapsed() >= Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_does_not_overflow() {
        let mut timer = Timer::new();
        let start = Instant::now();
        timer.schedule(Duration::MAX);
        assert!(timer.deadline().unwrap() > start + Duration::from_secs(86_400 * 365));

        let fired = tokio::time::timeout(Duration::from_secs(3600), timer.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let mut timer = Timer::new();
        timer.schedule(Duration::from_millis(10));
        timer.cancel();
        assert!(timer.deadline().is_none());

        let fired = tokio::time::timeout(Duration::from_secs(60), timer.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_losing_select_branch_keeps_deadline() {
        let mut timer = Timer::new();
        timer.schedule(Duration::from_secs(5));
        tokio::select! {
            () = timer.fired() => panic!("timer should not win"),
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        assert!(timer.is_armed());
        timer.fired().await;
        assert!(!timer.is_armed());
    }
}
