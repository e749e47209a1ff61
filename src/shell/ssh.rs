//! Interactive shell over SSH (russh).
//!
//! Opens a session, authenticates with the configured password, requests a PTY
//! and a shell, and exposes the channel as a [`LineIo`]. Host keys are not
//! verified.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use russh::client::{self, Handle, Msg};
use russh::keys::ssh_key;
use russh::{ChannelStream, Disconnect};
use tracing::{debug, warn};

use super::{LineIo, UpstreamConnector, UpstreamIo};
use crate::address::HostPort;
use crate::config::UpstreamConfig;
use crate::error::{Result, TunnelError};

const PTY_COLS: u32 = 80;
const PTY_ROWS: u32 = 24;

struct ShellClient;

impl client::Handler for ShellClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens password-authenticated shell channels.
pub struct SshShellConnector {
    username: String,
    password: String,
    term: String,
    config: Arc<client::Config>,
}

impl SshShellConnector {
    pub fn new(upstream: &UpstreamConfig) -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            nodelay: true,
            ..Default::default()
        };
        Self {
            username: upstream.username.clone(),
            password: upstream.password.clone(),
            term: upstream.term.clone(),
            config: Arc::new(config),
        }
    }
}

impl UpstreamConnector for SshShellConnector {
    async fn open(&self, addr: &HostPort) -> Result<Box<dyn UpstreamIo>> {
        let target = addr.to_string();
        let fail = |e: russh::Error| TunnelError::connect(target.clone(), e);

        let mut session = client::connect(
            Arc::clone(&self.config),
            (addr.host.as_str(), addr.port),
            ShellClient,
        )
        .await
        .map_err(fail)?;

        let auth = session
            .authenticate_password(self.username.clone(), self.password.clone())
            .await
            .map_err(fail)?;
        if !auth.success() {
            return Err(TunnelError::connect(
                target.clone(),
                format!("password authentication rejected for {}", self.username),
            ));
        }

        let channel = session.channel_open_session().await.map_err(fail)?;
        channel
            .request_pty(false, &self.term, PTY_COLS, PTY_ROWS, 0, 0, &[])
            .await
            .map_err(fail)?;
        channel.request_shell(false).await.map_err(fail)?;
        debug!("SSH shell opened on {target} as {}", self.username);

        Ok(Box::new(SshShell {
            io: LineIo::new(channel.into_stream()),
            session: Some(session),
        }))
    }
}

/// An open shell channel plus the session that carries it.
struct SshShell {
    io: LineIo<ChannelStream<Msg>>,
    session: Option<Handle<ShellClient>>,
}

impl UpstreamIo for SshShell {
    fn try_read_line(&mut self) -> io::Result<Option<Bytes>> {
        self.io.try_read_line()
    }

    fn try_write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.io.try_write(data)
    }

    fn close(&mut self) -> io::Result<()> {
        let result = self.io.close();
        if let Some(session) = self.session.take() {
            tokio::spawn(async move {
                if let Err(e) = session
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await
                {
                    warn!("SSH disconnect failed: {e}");
                }
            });
        }
        result
    }
}
