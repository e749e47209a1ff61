//! Upstream transports.
//!
//! The tunnel core only sees two seams:
//!
//! - [`UpstreamConnector`] — open a byte stream to a `host:port`.
//! - [`UpstreamIo`] — non-blocking line reads, single write attempts, close.
//!
//! Two connectors are provided: [`ssh::SshShellConnector`] (interactive shell
//! over SSH) and [`tcp::TcpConnector`] (plain socket, used in FTP mode). Both
//! hand back a [`LineIo`] wrapped around their async stream.
//!
//! All [`UpstreamIo`] methods are synchronous: each one polls the underlying
//! stream exactly once and reports "would block" instead of waiting, so the
//! owning task never stalls on upstream I/O.

use std::future::Future;
use std::io;

use bytes::Bytes;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::address::HostPort;
use crate::config::{TransportKind, UpstreamConfig};
use crate::error::Result;

pub mod ssh;
pub mod tcp;

/// Longest chunk handed out by a single line read when no newline is buffered.
const MAX_LINE: usize = 8192;

/// An open upstream stream.
pub trait UpstreamIo: Send {
    /// Read at most one line (including its `\n`).
    ///
    /// Returns `Ok(None)` when nothing is available yet. A partially received
    /// line is returned as-is rather than held back. End of stream is reported
    /// as [`io::ErrorKind::UnexpectedEof`].
    fn try_read_line(&mut self) -> io::Result<Option<Bytes>>;

    /// Attempt one write of `data`, returning how many bytes were accepted.
    /// `Ok(0)` means the stream would block.
    fn try_write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Best-effort close. The handle must not be used afterwards.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens upstream streams.
pub trait UpstreamConnector: Send {
    fn open(&self, addr: &HostPort)
        -> impl Future<Output = Result<Box<dyn UpstreamIo>>> + Send;
}

/// Line-oriented [`UpstreamIo`] over any async byte stream.
pub struct LineIo<S> {
    inner: BufReader<S>,
}

impl<S> LineIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }
}

impl<S> UpstreamIo for LineIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn try_read_line(&mut self) -> io::Result<Option<Bytes>> {
        let line = {
            let buf = match self.inner.fill_buf().now_or_never() {
                None => return Ok(None),
                Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Some(result) => result?,
            };
            if buf.is_empty() {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let end = buf
                .iter()
                .position(|b| *b == b'\n')
                .map_or(buf.len().min(MAX_LINE), |i| i + 1);
            Bytes::copy_from_slice(&buf[..end])
        };
        self.inner.consume(line.len());
        Ok(Some(line))
    }

    fn try_write(&mut self, data: &[u8]) -> io::Result<usize> {
        let written = match self.inner.write(data).now_or_never() {
            None => return Ok(0),
            Some(result) => result?,
        };
        if let Some(Err(e)) = self.inner.flush().now_or_never() {
            return Err(e);
        }
        Ok(written)
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().now_or_never().unwrap_or(Ok(()))
    }
}

/// The connector selected by configuration.
pub enum Connector {
    Ssh(ssh::SshShellConnector),
    Tcp(tcp::TcpConnector),
}

impl Connector {
    pub fn from_config(config: &UpstreamConfig, ftp_mode: bool) -> Self {
        match config.transport_for(ftp_mode) {
            TransportKind::Ssh => Self::Ssh(ssh::SshShellConnector::new(config)),
            TransportKind::Tcp => Self::Tcp(tcp::TcpConnector),
        }
    }
}

impl UpstreamConnector for Connector {
    async fn open(&self, addr: &HostPort) -> Result<Box<dyn UpstreamIo>> {
        match self {
            Self::Ssh(c) => c.open(addr).await,
            Self::Tcp(c) => c.open(addr).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_read_line_would_block_when_empty() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut io = LineIo::new(local);
        assert!(io.try_read_line().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_line_splits_on_newline() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut io = LineIo::new(local);
        remote.write_all(b"total 8\ndrwx .\n$ ").await.unwrap();

        assert_eq!(io.try_read_line().unwrap().unwrap(), &b"total 8\n"[..]);
        assert_eq!(io.try_read_line().unwrap().unwrap(), &b"drwx .\n"[..]);
        // Prompt without a trailing newline is still delivered.
        assert_eq!(io.try_read_line().unwrap().unwrap(), &b"$ "[..]);
        assert!(io.try_read_line().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_line_reports_eof() {
        let (local, remote) = tokio::io::duplex(64);
        let mut io = LineIo::new(local);
        drop(remote);
        let err = io.try_read_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut io = LineIo::new(local);
        assert_eq!(io.try_write(b"ls -la\n").unwrap(), 7);

        let mut buf = [0u8; 7];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ls -la\n");
    }

    #[tokio::test]
    async fn test_write_is_partial_when_peer_full() {
        let (local, _remote) = tokio::io::duplex(4);
        let mut io = LineIo::new(local);
        assert_eq!(io.try_write(b"abcdefgh").unwrap(), 4);
        assert_eq!(io.try_write(b"more").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_signals_eof_to_peer() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut io = LineIo::new(local);
        io.close().unwrap();
        let mut buf = Vec::new();
        assert_eq!(remote.read_to_end(&mut buf).await.unwrap(), 0);
    }
}
