//! `host:port` endpoint parsing.

use std::fmt;

use crate::error::{Result, TunnelError};

/// A parsed `host:port` endpoint.
///
/// The port is taken from the last `:`-separated component, so bracketed IPv6
/// literals (`[::1]:22`) work. Brackets are stripped from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| TunnelError::AddressFormat(raw.to_string()))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(TunnelError::AddressFormat(raw.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TunnelError::AddressFormat(raw.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let hp = HostPort::parse("127.0.0.1:2222").unwrap();
        assert_eq!(hp.host, "127.0.0.1");
        assert_eq!(hp.port, 2222);
        assert_eq!(hp.to_string(), "127.0.0.1:2222");
    }

    #[test]
    fn test_parse_hostname_trims_whitespace() {
        let hp = HostPort::parse("  relay.local:20000\n").unwrap();
        assert_eq!(hp.host, "relay.local");
        assert_eq!(hp.port, 20000);
    }

    #[test]
    fn test_parse_ipv6_brackets() {
        let hp = HostPort::parse("[::1]:22").unwrap();
        assert_eq!(hp.host, "::1");
        assert_eq!(hp.to_string(), "[::1]:22");
    }

    #[test]
    fn test_missing_colon_rejected() {
        let err = HostPort::parse("127.0.0.1").unwrap_err();
        assert!(matches!(err, TunnelError::AddressFormat(_)));
    }

    #[test]
    fn test_bad_port_rejected() {
        assert!(matches!(
            HostPort::parse("host:notaport"),
            Err(TunnelError::AddressFormat(_))
        ));
        assert!(matches!(
            HostPort::parse("host:70000"),
            Err(TunnelError::AddressFormat(_))
        ));
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(matches!(
            HostPort::parse(":22"),
            Err(TunnelError::AddressFormat(_))
        ));
    }
}
