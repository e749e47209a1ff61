//! The relay core.
//!
//! A [`TunnelSession`] owns one upstream stream (remote shell) and one
//! downstream connection (local TCP server) and pumps bytes between them.
//! All state lives in a single task: downstream I/O tasks report to it over an
//! event queue, and every timer (upstream read poll, inactivity watchdog,
//! consolidation flush, reconnect, stats) is a deadline the session selects on.
//!
//! - `upstream.rs`    — open/write/read-poll/close of the remote shell stream
//! - `downstream.rs`  — TCP connection, I/O tasks, reconnect with backoff
//! - `watchdog.rs`    — inactivity countdown on upstream writes
//! - `consolidate.rs` — debounced output coalescing for FTP mode
//! - `stats.rs`       — byte counters and periodic report
//! - `session.rs`     — the orchestrator and its event loop

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::error::TunnelError;

pub mod consolidate;
pub mod downstream;
pub mod session;
pub mod stats;
pub mod upstream;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use session::TunnelSession;
pub use stats::{RelayCounters, RelayStats};

/// Everything the session reacts to, in arrival order.
///
/// Downstream events carry the id of the connection (or connection attempt)
/// they belong to. Events for a retired id are ignored.
#[derive(Debug)]
pub(crate) enum Event {
    DownstreamConnected { id: u64, stream: TcpStream },
    DownstreamConnectFailed { id: u64, error: TunnelError },
    DownstreamData { id: u64, data: Bytes },
    DownstreamClosed { id: u64 },
    UpstreamReadDue,
    WatchdogExpired,
    FlushDue,
    ReconnectDue,
    ReportDue,
}
