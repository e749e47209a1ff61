//! Plain TCP upstream, used when the remote end speaks raw bytes (FTP mode).

use tokio::net::TcpStream;
use tracing::debug;

use super::{LineIo, UpstreamConnector, UpstreamIo};
use crate::address::HostPort;
use crate::error::{Result, TunnelError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl UpstreamConnector for TcpConnector {
    async fn open(&self, addr: &HostPort) -> Result<Box<dyn UpstreamIo>> {
        let stream = TcpStream::connect((addr.host.as_str(), addr.port))
            .await
            .map_err(|e| TunnelError::connect(addr.to_string(), e))?;
        let _ = stream.set_nodelay(true);
        debug!("Upstream TCP socket connected to {addr}");
        Ok(Box::new(LineIo::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_and_exchange_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(b"pong\n").await.unwrap();
            buf
        });

        let addr = HostPort {
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut io = TcpConnector.open(&addr).await.unwrap();
        assert_eq!(io.try_write(b"ping").unwrap(), 4);
        assert_eq!(&server.await.unwrap(), b"ping");

        let line = loop {
            if let Some(line) = io.try_read_line().unwrap() {
                break line;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };
        assert_eq!(line, &b"pong\n"[..]);
        io.close().unwrap();
    }

    #[tokio::test]
    async fn test_open_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let addr = HostPort {
            host: "127.0.0.1".to_string(),
            port,
        };
        let err = TcpConnector.open(&addr).await.err().unwrap();
        assert!(matches!(err, TunnelError::Connect { .. }));
    }
}
