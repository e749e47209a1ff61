//! The downstream (local TCP server) side of the tunnel.
//!
//! Connecting runs in a background task that reports back through the session
//! event queue. Once connected, a reader task forwards incoming chunks as
//! events and a writer task drains an outbound channel into the socket, so the
//! session never waits on the network.
//!
//! Every attempt gets a fresh id. At most one attempt is in flight and at most
//! one connection is live; events carrying any other id are ignored. After a
//! failed attempt or a lost connection a single retry is scheduled.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::Event;
use crate::address::HostPort;
use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::timer::Timer;

const READ_CHUNK: usize = 16 * 1024;

/// Reconnect delay that doubles after each failure, capped at `max`.
///
/// With `max == base` the delay is constant.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// A live connection: the outbound channel and the two I/O tasks.
struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct DownstreamConnection {
    address: String,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<Event>,
    link: Option<Link>,
    attempt: Option<(u64, JoinHandle<()>)>,
    next_id: u64,
    retry: Timer,
    backoff: Backoff,
}

impl DownstreamConnection {
    pub(crate) fn new(config: &TunnelConfig, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            address: config.destination.clone(),
            connect_timeout: config.downstream_connect_timeout(),
            events,
            link: None,
            attempt: None,
            next_id: 0,
            retry: Timer::new(),
            backoff: Backoff::new(config.reconnect_delay(), config.reconnect_max_delay()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.attempt.is_some()
    }

    /// When the pending reconnect fires, if one is scheduled.
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry.deadline()
    }

    /// Start a connection attempt unless one is live or in flight.
    pub fn connect(&mut self) {
        if self.link.is_some() || self.attempt.is_some() {
            debug!("Downstream connect skipped: already connected or connecting");
            return;
        }
        self.retry.cancel();
        self.next_id += 1;
        let id = self.next_id;

        info!("Connecting to downstream {} ...", self.address);
        let address = self.address.clone();
        let connect_timeout = self.connect_timeout;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let event = match dial(&address, connect_timeout).await {
                Ok(stream) => Event::DownstreamConnected { id, stream },
                Err(error) => Event::DownstreamConnectFailed { id, error },
            };
            let _ = events.send(event);
        });
        self.attempt = Some((id, task));
    }

    /// Adopt a connected socket. Returns `false` if the attempt was stale.
    pub fn on_connected(&mut self, id: u64, stream: TcpStream) -> bool {
        if !self.is_current_attempt(id) {
            debug!(id, "Dropping socket from stale connect attempt");
            return false;
        }
        self.attempt = None;
        self.backoff.reset();
        self.link = Some(spawn_link(id, stream, self.events.clone()));
        info!("Downstream connected to {}", self.address);
        true
    }

    pub fn on_connect_failed(&mut self, id: u64, error: &TunnelError) {
        if !self.is_current_attempt(id) {
            return;
        }
        self.attempt = None;
        let delay = self.schedule_retry();
        warn!(
            "Downstream connect failed: {error}, retrying in {:.1}s",
            delay.as_secs_f64()
        );
    }

    /// Retire the live connection. Returns `false` if `id` is not live.
    pub fn on_closed(&mut self, id: u64) -> bool {
        if self.link.as_ref().map(|l| l.id) != Some(id) {
            return false;
        }
        self.link = None;
        let delay = self.schedule_retry();
        warn!(
            "Downstream {}: {}, reconnecting in {:.1}s",
            self.address,
            TunnelError::PeerClosed,
            delay.as_secs_f64()
        );
        true
    }

    /// Whether `id` names the live connection.
    pub fn is_live(&self, id: u64) -> bool {
        self.link.as_ref().is_some_and(|l| l.id == id)
    }

    /// Queue `data` on the live connection. Returns `false` if there is none.
    pub fn send(&mut self, data: Bytes) -> bool {
        match self.link.as_ref() {
            Some(link) => link.tx.send(data).is_ok(),
            None => false,
        }
    }

    /// Wait for the scheduled reconnect.
    pub async fn retry_due(&mut self) {
        self.retry.fired().await;
    }

    /// Drop the connection and any attempt or retry, without rescheduling.
    pub fn shutdown(&mut self) {
        self.link = None;
        if let Some((_, task)) = self.attempt.take() {
            task.abort();
        }
        self.retry.cancel();
    }

    fn is_current_attempt(&self, id: u64) -> bool {
        self.attempt.as_ref().is_some_and(|(current, _)| *current == id)
    }

    fn schedule_retry(&mut self) -> Duration {
        let delay = self.backoff.next_delay();
        self.retry.schedule(delay);
        delay
    }

    #[cfg(test)]
    pub(crate) fn attach_test_link(&mut self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_id += 1;
        self.link = Some(Link {
            id: self.next_id,
            tx,
            tasks: Vec::new(),
        });
        rx
    }
}

async fn dial(address: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let addr = HostPort::parse(address)?;
    let stream = timeout(
        connect_timeout,
        TcpStream::connect((addr.host.as_str(), addr.port)),
    )
    .await
    .map_err(|_| TunnelError::connect(address, "timed out"))?
    .map_err(|e| TunnelError::connect(address, e))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

fn spawn_link(id: u64, stream: TcpStream, events: mpsc::UnboundedSender<Event>) -> Link {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let read_events = events.clone();
    let reader_task = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let data = Bytes::copy_from_slice(&buf[..n]);
                    if read_events.send(Event::DownstreamData { id, data }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!("Downstream read error: {e}");
                    break;
                }
            }
        }
        let _ = read_events.send(Event::DownstreamClosed { id });
    });

    let writer_task = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                debug!("Downstream write error: {e}");
                let _ = events.send(Event::DownstreamClosed { id });
                return;
            }
        }
    });

    Link {
        id,
        tx,
        tasks: vec![reader_task, writer_task],
    }
}
