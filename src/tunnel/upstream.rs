//! The upstream (remote shell) side of the tunnel.
//!
//! The stream is opened eagerly when the session starts and lazily on the next
//! write after any close. Reads are polled: a line read that yields data makes
//! the next read due straight away (no timer involved), an empty read arms the
//! read timer for the poll interval, and a closed stream stops the loop until
//! the next open.
//!
//! Write failures are counted from the last open. Successful writes do not
//! reset the count; only reopening does.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::address::HostPort;
use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::shell::{UpstreamConnector, UpstreamIo};
use crate::timer::Timer;

/// Result of a single upstream write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The write failed or was partial. `recreate` is set once the failure
    /// count reaches the configured threshold.
    Failed { failures: u32, recreate: bool },
}

pub struct UpstreamStream<C> {
    connector: C,
    address: String,
    connect_timeout: Duration,
    poll_interval: Duration,
    max_write_failures: u32,
    io: Option<Box<dyn UpstreamIo>>,
    write_failures: u32,
    /// Next read is due without waiting.
    read_ready: bool,
    read_timer: Timer,
}

impl<C: UpstreamConnector> UpstreamStream<C> {
    pub fn new(connector: C, config: &TunnelConfig) -> Self {
        Self {
            connector,
            address: config.source.clone(),
            connect_timeout: config.upstream_connect_timeout(),
            poll_interval: config.read_poll_interval(),
            max_write_failures: config.max_write_failures,
            io: None,
            write_failures: 0,
            read_ready: false,
            read_timer: Timer::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    pub fn write_failures(&self) -> u32 {
        self.write_failures
    }

    /// Whether a read attempt is scheduled.
    pub fn read_pending(&self) -> bool {
        self.read_ready || self.read_timer.is_armed()
    }

    /// Open the stream to the source address and start the read loop.
    ///
    /// A still-open previous stream is closed first.
    pub async fn open(&mut self) -> Result<()> {
        let addr = HostPort::parse(&self.address)?;
        self.close();

        let io = timeout(self.connect_timeout, self.connector.open(&addr))
            .await
            .map_err(|_| TunnelError::connect(addr.to_string(), "timed out"))??;

        self.io = Some(io);
        self.write_failures = 0;
        self.read_now();
        info!("Upstream stream opened to {addr}");
        Ok(())
    }

    /// Close and reopen the stream.
    pub async fn recreate(&mut self) -> Result<()> {
        info!("Recreating upstream stream");
        self.close();
        self.open().await
    }

    /// Close the stream if open. Returns whether anything was closed.
    ///
    /// A failing close is logged and the stream is still considered closed.
    pub fn close(&mut self) -> bool {
        let Some(mut io) = self.io.take() else {
            return false;
        };
        self.read_ready = false;
        self.read_timer.cancel();
        if let Err(e) = io.close() {
            error!("CRITICAL: {}", TunnelError::Close(e));
        }
        info!("Upstream stream closed");
        true
    }

    /// Make one attempt to write all of `data`.
    pub fn write(&mut self, data: &[u8]) -> WriteOutcome {
        let result = match self.io.as_mut() {
            Some(io) => io.try_write(data),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "upstream stream is not open",
            )),
        };

        let reason = match result {
            Ok(n) if n == data.len() => return WriteOutcome::Written,
            Ok(n) => format!("partial write ({n} of {} bytes)", data.len()),
            Err(e) => e.to_string(),
        };

        self.write_failures += 1;
        let failures = self.write_failures;
        warn!(failures, "{}", TunnelError::Write(reason));
        WriteOutcome::Failed {
            failures,
            recreate: failures == self.max_write_failures,
        }
    }

    /// Wait for the next read attempt. Resolves immediately while the last
    /// read returned data.
    pub async fn read_due(&mut self) {
        if self.read_ready {
            return;
        }
        self.read_timer.fired().await;
    }

    /// One iteration of the read loop. Returns the line read, if any, and
    /// schedules the next iteration.
    pub fn read_step(&mut self) -> Option<Bytes> {
        self.read_ready = false;
        let io = self.io.as_mut()?;
        match io.try_read_line() {
            Ok(Some(line)) if !line.is_empty() => {
                self.read_now();
                Some(line)
            }
            Ok(_) => {
                self.read_timer.schedule(self.poll_interval);
                None
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("Upstream stream reached end of file");
                self.close();
                None
            }
            Err(e) => {
                warn!("Upstream read failed: {e}");
                self.read_timer.schedule(self.poll_interval);
                None
            }
        }
    }

    fn read_now(&mut self) {
        self.read_timer.cancel();
        self.read_ready = true;
    }
}
