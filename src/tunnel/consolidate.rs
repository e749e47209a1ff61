//! Output consolidation for FTP mode.
//!
//! Line-oriented upstream reads split one logical transfer into many small
//! chunks. In FTP mode they are appended here and written downstream in one
//! piece once no new chunk has arrived for the quiet period. Each append
//! pushes the flush back (debounce).

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::timer::Timer;

pub struct ConsolidationBuffer {
    pending: BytesMut,
    quiet: Duration,
    timer: Timer,
}

impl ConsolidationBuffer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            pending: BytesMut::new(),
            quiet,
            timer: Timer::new(),
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        self.timer.schedule(self.quiet);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait until the quiet period after the last append has passed.
    pub async fn flush_due(&mut self) {
        self.timer.fired().await;
    }

    /// Take everything accumulated so far and cancel the pending flush.
    pub fn take(&mut self) -> Bytes {
        self.timer.cancel();
        self.pending.split().freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_appends_within_quiet_period_flush_once() {
        let mut buffer = ConsolidationBuffer::new(Duration::from_millis(200));
        let start = Instant::now();
        buffer.append(b"first ");
        tokio::time::advance(Duration::from_millis(150)).await;
        buffer.append(b"second");

        buffer.flush_due().await;
        assert!(start.elapsed() >= Duration::from_millis(350));
        assert_eq!(buffer.take(), &b"first second"[..]);
        assert!(buffer.is_empty());

        let again = tokio::time::timeout(Duration::from_secs(1), buffer.flush_due()).await;
        assert!(again.is_err(), "no second flush without new data");
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_cancels_flush() {
        let mut buffer = ConsolidationBuffer::new(Duration::from_millis(200));
        buffer.append(b"abc");
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.take(), &b"abc"[..]);
        let fired = tokio::time::timeout(Duration::from_secs(1), buffer.flush_due()).await;
        assert!(fired.is_err());
    }
}
