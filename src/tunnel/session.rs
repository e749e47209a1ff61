//! Tunnel session: the single owner of all relay state.
//!
//! ```text
//!   downstream socket ──DownstreamData──▶ session ──write──▶ upstream stream
//!   upstream stream ◀──read poll──────── session ──send───▶ downstream socket
//!                                          │                 (or consolidation
//!                                          │                  buffer in FTP mode)
//!                         watchdog / flush / reconnect / stats timers
//! ```
//!
//! [`TunnelSession::run`] processes one event at a time until the shutdown
//! token is cancelled. No error escapes it: every failure is logged and either
//! retried (downstream), retried on the next write (upstream), or dropped.

use std::future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::consolidate::ConsolidationBuffer;
use super::downstream::DownstreamConnection;
use super::stats::{RelayCounters, StatsReporter};
use super::upstream::{UpstreamStream, WriteOutcome};
use super::watchdog::InactivityWatchdog;
use super::Event;
use crate::config::TunnelConfig;
use crate::shell::UpstreamConnector;

pub struct TunnelSession<C> {
    source: String,
    destination: String,
    upstream: UpstreamStream<C>,
    downstream: DownstreamConnection,
    watchdog: InactivityWatchdog,
    /// Present only in FTP mode.
    consolidation: Option<ConsolidationBuffer>,
    counters: Arc<RelayCounters>,
    reporter: StatsReporter,
    events: mpsc::UnboundedReceiver<Event>,
}

impl<C: UpstreamConnector> TunnelSession<C> {
    pub fn new(config: &TunnelConfig, connector: C) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            source: config.source.clone(),
            destination: config.destination.clone(),
            upstream: UpstreamStream::new(connector, config),
            downstream: DownstreamConnection::new(config, events_tx),
            watchdog: InactivityWatchdog::new(config.time_to_live_secs),
            consolidation: config
                .ftp_mode
                .then(|| ConsolidationBuffer::new(config.flush_quiet())),
            counters: Arc::new(RelayCounters::new()),
            reporter: StatsReporter::new(config.stats_interval()),
            events,
        }
    }

    /// Shared handle to the byte counters.
    pub fn counters(&self) -> Arc<RelayCounters> {
        Arc::clone(&self.counters)
    }

    /// Start both sides and relay until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            source = %self.source,
            destination = %self.destination,
            ftp_mode = self.consolidation.is_some(),
            "Tunnel session starting"
        );

        self.open_upstream().await;
        self.downstream.connect();

        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                Some(event) = self.events.recv() => event,
                () = self.upstream.read_due() => Event::UpstreamReadDue,
                () = self.watchdog.expired() => Event::WatchdogExpired,
                () = flush_due(&mut self.consolidation) => Event::FlushDue,
                () = self.downstream.retry_due() => Event::ReconnectDue,
                () = self.reporter.due() => Event::ReportDue,
            };
            self.handle(event).await;
        }

        self.stop();
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::DownstreamConnected { id, stream } => {
                if self.downstream.on_connected(id, stream) {
                    self.reporter.start();
                }
            }
            Event::DownstreamConnectFailed { id, error } => {
                self.downstream.on_connect_failed(id, &error);
            }
            Event::DownstreamData { id, data } => {
                if self.downstream.is_live(id) {
                    self.on_downstream_data(&data).await;
                }
            }
            Event::DownstreamClosed { id } => {
                if self.downstream.on_closed(id) {
                    self.reporter.stop();
                }
            }
            Event::UpstreamReadDue => {
                if let Some(line) = self.upstream.read_step() {
                    self.on_upstream_data(line);
                }
            }
            Event::WatchdogExpired => self.on_watchdog_expired(),
            Event::FlushDue => self.flush_consolidated(),
            Event::ReconnectDue => self.downstream.connect(),
            Event::ReportDue => {
                if self.downstream.is_connected() {
                    self.reporter.report(&self.counters);
                }
            }
        }
    }

    async fn on_downstream_data(&mut self, data: &[u8]) {
        self.counters.add_from_downstream(data.len());
        debug!(len = data.len(), "Downstream -> upstream");
        self.write_upstream(data).await;
    }

    /// Write to the upstream stream, opening it first if needed.
    ///
    /// Any attempt counts as activity for the watchdog, whether or not the
    /// stream could be opened or the write succeeded.
    async fn write_upstream(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if !self.upstream.is_open() {
            self.open_upstream().await;
        }
        self.watchdog.arm();

        if let WriteOutcome::Failed {
            failures,
            recreate: true,
        } = self.upstream.write(data)
        {
            warn!(failures, "Too many upstream write failures");
            // Still unopened: the open above already failed for this write.
            if !self.upstream.is_open() {
                return;
            }
            match self.upstream.recreate().await {
                Ok(()) => self.watchdog.arm(),
                Err(e) => warn!("Upstream reopen failed: {e}"),
            }
        }
    }

    async fn open_upstream(&mut self) {
        match self.upstream.open().await {
            Ok(()) => self.watchdog.arm(),
            Err(e) => warn!("Upstream open failed: {e}"),
        }
    }

    /// Forward a chunk read from upstream. Counted even when it cannot be
    /// delivered; not buffered when no downstream connection is live.
    fn on_upstream_data(&mut self, data: Bytes) {
        self.counters.add_from_upstream(data.len());
        if !self.downstream.is_connected() {
            debug!(len = data.len(), "No downstream connection, dropping upstream output");
            return;
        }
        match self.consolidation.as_mut() {
            Some(buffer) => buffer.append(&data),
            None => {
                self.downstream.send(data);
            }
        }
    }

    fn flush_consolidated(&mut self) {
        let Some(buffer) = self.consolidation.as_mut() else {
            return;
        };
        let data = buffer.take();
        if data.is_empty() {
            return;
        }
        let len = data.len();
        if !self.downstream.send(data) {
            warn!(len, "Downstream connection gone, dropping consolidated output");
        }
    }

    fn on_watchdog_expired(&mut self) {
        let notice = self.watchdog.notice();
        if self.downstream.is_connected() {
            self.downstream.send(Bytes::from(notice.clone()));
        }
        info!("{notice}");
        self.upstream.close();
    }

    fn stop(&mut self) {
        info!("Tunnel session stopping");
        self.upstream.close();
        self.watchdog.disarm();
        if let Some(buffer) = self.consolidation.as_mut() {
            let dropped = buffer.take();
            if !dropped.is_empty() {
                debug!(len = dropped.len(), "Discarding unflushed output");
            }
        }
        self.downstream.shutdown();
        self.reporter.stop();
        let stats = self.counters.snapshot();
        info!(
            from_upstream = stats.from_upstream,
            from_downstream = stats.from_downstream,
            "Tunnel session stopped"
        );
    }
}

async fn flush_due(buffer: &mut Option<ConsolidationBuffer>) {
    match buffer {
        Some(buffer) => buffer.flush_due().await,
        None => future::pending().await,
    }
}
