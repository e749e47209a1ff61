#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! sshrelay library: the building blocks of the relay binary.
//!
//! - `tunnel` — the relay session and its two sides
//! - `shell` — upstream transports (SSH shell, raw TCP)
//! - `config` — configuration loading
//! - `address` — `host:port` parsing
//! - `timer` — cancellable one-shot deadline
//! - `error` — error taxonomy
//! - `supervisor` — restart-on-crash wrapper

pub mod address;
pub mod config;
pub mod error;
pub mod shell;
pub mod supervisor;
pub mod timer;
pub mod tunnel;

pub use address::HostPort;
pub use config::Config;
pub use error::{Result, TunnelError};
pub use tunnel::{RelayCounters, RelayStats, TunnelSession};
