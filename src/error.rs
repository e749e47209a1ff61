//! Error taxonomy for the relay.
//!
//! Every variant except [`TunnelError::Config`] is handled inside the component
//! that produced it (log, retry, or self-heal). Only configuration problems
//! reach `main`.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    /// Address string is not `host:port`.
    #[error("malformed address {0:?}: expected host:port")]
    AddressFormat(String),

    /// Opening the upstream stream or the downstream connection failed.
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// A write to the upstream stream failed or was partial.
    #[error("upstream write failed: {0}")]
    Write(String),

    /// The downstream peer closed the connection.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Closing a handle failed. The handle is still considered closed.
    #[error("failed to close stream: {0}")]
    Close(#[source] io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    pub(crate) fn connect(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<toml::de::Error> for TunnelError {
    fn from(err: toml::de::Error) -> Self {
        TunnelError::Config(format!("TOML parse error: {err}"))
    }
}
