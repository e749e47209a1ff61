//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Command-line flags** — `-s`, `-d`, `-t`, `-f`, `-v` (see `main.rs`),
//!    applied by the caller through [`Overrides`]
//! 2. **Environment variables** — `SSHRELAY_SOURCE`, `SSHRELAY_DESTINATION`,
//!    `SSHRELAY_USERNAME`, `SSHRELAY_PASSWORD`
//! 3. **Config file** — path via `--config <path>`, or `sshrelay.toml` in CWD
//! 4. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [tunnel]
//! source = "127.0.0.1:22"
//! destination = "192.168.7.1:20000"
//! time_to_live_secs = 300.0
//! ftp_mode = false
//! read_poll_interval_ms = 500
//! flush_quiet_ms = 200
//! max_write_failures = 5
//! upstream_connect_timeout_secs = 30
//! downstream_connect_timeout_secs = 15
//! reconnect_delay_secs = 5
//! reconnect_max_delay_secs = 5      # > reconnect_delay_secs enables backoff
//! stats_interval_ms = 1000
//!
//! [upstream]
//! transport = "ssh"                 # or "tcp"; defaults to tcp in ftp mode
//! username = "debian"
//! password = "temppwd"
//! term = "xterm"
//!
//! [logging]
//! level = "info"
//!
//! [supervisor]
//! max_backoff = 60
//! stable_threshold = 60
//! ```
//!
//! Addresses are kept as raw strings. A malformed one is reported where it is
//! used (upstream open, downstream connect), not here.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TunnelError};

/// Longest accepted inactivity timeout (one year).
const MAX_TIME_TO_LIVE_SECS: f64 = 365.0 * 86_400.0;
/// Longest accepted reconnect delay or backoff cap (one day).
const MAX_RECONNECT_DELAY_SECS: u64 = 86_400;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Relay endpoints and timing.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Upstream (remote shell) `host:port` (default `127.0.0.1:22`).
    #[serde(default = "default_source")]
    pub source: String,
    /// Downstream (TCP server) `host:port` (default `192.168.7.1:20000`).
    #[serde(default = "default_destination")]
    pub destination: String,
    /// Seconds without upstream writes before the upstream stream is closed (default 300).
    #[serde(default = "default_time_to_live")]
    pub time_to_live_secs: f64,
    /// Coalesce upstream output before writing it downstream (default false).
    #[serde(default)]
    pub ftp_mode: bool,
    /// Upstream read poll interval when nothing is buffered (default 500 ms).
    #[serde(default = "default_read_poll_interval")]
    pub read_poll_interval_ms: u64,
    /// Quiet period before consolidated output is flushed (default 200 ms).
    #[serde(default = "default_flush_quiet")]
    pub flush_quiet_ms: u64,
    /// Upstream write failures tolerated before the stream is recreated (default 5).
    #[serde(default = "default_max_write_failures")]
    pub max_write_failures: u32,
    /// Upper bound on opening the upstream stream (default 30 s).
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout_secs: u64,
    /// Downstream TCP connect timeout (default 15 s).
    #[serde(default = "default_downstream_connect_timeout")]
    pub downstream_connect_timeout_secs: u64,
    /// Seconds before retrying the downstream connection (default 5).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Max seconds between downstream retries (default 5, i.e. no backoff growth).
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_secs: u64,
    /// Byte counter report period while downstream is connected (default 1000 ms).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,
}

/// Which transport carries the upstream stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Interactive shell over SSH.
    Ssh,
    /// Plain TCP byte stream.
    Tcp,
}

/// Upstream transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Transport override. When unset, `tcp` in FTP mode and `ssh` otherwise.
    #[serde(default)]
    pub transport: Option<TransportKind>,
    /// SSH login user. Override with `SSHRELAY_USERNAME`.
    #[serde(default = "default_username")]
    pub username: String,
    /// SSH password. Override with `SSHRELAY_PASSWORD`.
    #[serde(default = "default_password")]
    pub password: String,
    /// Terminal type requested for the shell PTY (default `xterm`).
    #[serde(default = "default_term")]
    pub term: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Supervisor settings for `sshrelay supervise`.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum seconds between restart attempts (default 60).
    #[serde(default = "default_supervisor_max_backoff")]
    pub max_backoff: u64,
    /// Seconds of uptime before resetting backoff (default 60).
    #[serde(default = "default_supervisor_stable_threshold")]
    pub stable_threshold: u64,
}

/// Values given on the command line. `None` leaves the loaded value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub time_to_live_secs: Option<f64>,
    pub ftp_mode: bool,
    pub verbose: bool,
}

fn default_source() -> String {
    "127.0.0.1:22".to_string()
}
fn default_destination() -> String {
    "192.168.7.1:20000".to_string()
}
fn default_time_to_live() -> f64 {
    300.0
}
fn default_read_poll_interval() -> u64 {
    500
}
fn default_flush_quiet() -> u64 {
    200
}
fn default_max_write_failures() -> u32 {
    5
}
fn default_upstream_connect_timeout() -> u64 {
    30
}
fn default_downstream_connect_timeout() -> u64 {
    15
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_reconnect_max_delay() -> u64 {
    5
}
fn default_stats_interval() -> u64 {
    1000
}
fn default_username() -> String {
    "debian".to_string()
}
fn default_password() -> String {
    "temppwd".to_string()
}
fn default_term() -> String {
    "xterm".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_supervisor_max_backoff() -> u64 {
    60
}
fn default_supervisor_stable_threshold() -> u64 {
    60
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            destination: default_destination(),
            time_to_live_secs: default_time_to_live(),
            ftp_mode: false,
            read_poll_interval_ms: default_read_poll_interval(),
            flush_quiet_ms: default_flush_quiet(),
            max_write_failures: default_max_write_failures(),
            upstream_connect_timeout_secs: default_upstream_connect_timeout(),
            downstream_connect_timeout_secs: default_downstream_connect_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            reconnect_max_delay_secs: default_reconnect_max_delay(),
            stats_interval_ms: default_stats_interval(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            transport: None,
            username: default_username(),
            password: default_password(),
            term: default_term(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_backoff: default_supervisor_max_backoff(),
            stable_threshold: default_supervisor_stable_threshold(),
        }
    }
}

impl TunnelConfig {
    pub fn time_to_live(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_to_live_secs).unwrap_or(Duration::MAX)
    }

    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms)
    }

    pub fn flush_quiet(&self) -> Duration {
        Duration::from_millis(self.flush_quiet_ms)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout_secs)
    }

    pub fn downstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.downstream_connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

impl UpstreamConfig {
    /// The transport actually used, resolving the FTP-mode default.
    pub fn transport_for(&self, ftp_mode: bool) -> TransportKind {
        self.transport.unwrap_or(if ftp_mode {
            TransportKind::Tcp
        } else {
            TransportKind::Ssh
        })
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist and parse. Otherwise looks for
    /// `sshrelay.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = if let Some(p) = path {
            Self::from_file(Path::new(p))?
        } else if Path::new("sshrelay.toml").exists() {
            Self::from_file(Path::new("sshrelay.toml"))?
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(source) = std::env::var("SSHRELAY_SOURCE") {
            config.tunnel.source = source;
        }
        if let Ok(destination) = std::env::var("SSHRELAY_DESTINATION") {
            config.tunnel.destination = destination;
        }
        if let Ok(username) = std::env::var("SSHRELAY_USERNAME") {
            config.upstream.username = username;
        }
        if let Ok(password) = std::env::var("SSHRELAY_PASSWORD") {
            config.upstream.password = password;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply command-line values on top of the loaded configuration.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(ref source) = overrides.source {
            self.tunnel.source = source.trim().to_string();
        }
        if let Some(ref destination) = overrides.destination {
            self.tunnel.destination = destination.trim().to_string();
        }
        if let Some(ttl) = overrides.time_to_live_secs {
            self.tunnel.time_to_live_secs = ttl;
        }
        if overrides.ftp_mode {
            self.tunnel.ftp_mode = true;
        }
        if overrides.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Reject values the relay cannot run with. A backoff cap below the base
    /// delay is raised to the base delay.
    pub fn validate(&mut self) -> Result<()> {
        let ttl = self.tunnel.time_to_live_secs;
        if !ttl.is_finite() || ttl <= 0.0 || ttl > MAX_TIME_TO_LIVE_SECS {
            return Err(TunnelError::Config(format!(
                "time_to_live_secs must be a positive number of at most {MAX_TIME_TO_LIVE_SECS}, got {ttl}"
            )));
        }
        if self.tunnel.max_write_failures == 0 {
            return Err(TunnelError::Config(
                "max_write_failures must be at least 1".to_string(),
            ));
        }
        for (name, secs) in [
            ("reconnect_delay_secs", self.tunnel.reconnect_delay_secs),
            ("reconnect_max_delay_secs", self.tunnel.reconnect_max_delay_secs),
        ] {
            if secs > MAX_RECONNECT_DELAY_SECS {
                return Err(TunnelError::Config(format!(
                    "{name} must be at most {MAX_RECONNECT_DELAY_SECS}, got {secs}"
                )));
            }
        }
        if self.tunnel.reconnect_max_delay_secs < self.tunnel.reconnect_delay_secs {
            self.tunnel.reconnect_max_delay_secs = self.tunnel.reconnect_delay_secs;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.tunnel.source, "127.0.0.1:22");
        assert_eq!(config.tunnel.destination, "192.168.7.1:20000");
        assert_eq!(config.tunnel.time_to_live(), Duration::from_secs(300));
        assert_eq!(config.tunnel.read_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.tunnel.flush_quiet(), Duration::from_millis(200));
        assert_eq!(config.tunnel.max_write_failures, 5);
        assert_eq!(config.tunnel.downstream_connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.tunnel.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.tunnel.reconnect_max_delay(), Duration::from_secs(5));
        assert!(!config.tunnel.ftp_mode);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[tunnel]\nsource = \"10.0.0.2:2222\"\ntime_to_live_secs = 12.5\nftp_mode = true\n\n[upstream]\nusername = \"root\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.tunnel.source, "10.0.0.2:2222");
        assert_eq!(config.tunnel.destination, "192.168.7.1:20000");
        assert!((config.tunnel.time_to_live_secs - 12.5).abs() < f64::EPSILON);
        assert!(config.tunnel.ftp_mode);
        assert_eq!(config.upstream.username, "root");
        assert_eq!(config.upstream.password, "temppwd");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load(Some("/nonexistent/sshrelay.toml")).unwrap_err();
        assert!(matches!(err, TunnelError::Config(_)));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tunnel\nsource = 1").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, TunnelError::Config(_)));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let err = toml::from_str::<Config>("[upstream]\ntransport = \"telnet\"").unwrap_err();
        assert!(err.to_string().contains("telnet"));
    }

    #[test]
    fn test_overrides_win() {
        let mut config = Config::default();
        config.apply(&Overrides {
            source: Some(" 127.0.0.1:2222 ".to_string()),
            destination: Some("localhost:9000".to_string()),
            time_to_live_secs: Some(0.5),
            ftp_mode: true,
            verbose: true,
        });
        assert_eq!(config.tunnel.source, "127.0.0.1:2222");
        assert_eq!(config.tunnel.destination, "localhost:9000");
        assert_eq!(config.tunnel.time_to_live(), Duration::from_millis(500));
        assert!(config.tunnel.ftp_mode);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_overrides_change_nothing() {
        let mut config = Config::default();
        config.tunnel.ftp_mode = true;
        config.apply(&Overrides::default());
        assert!(config.tunnel.ftp_mode);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_transport_follows_ftp_mode() {
        let upstream = UpstreamConfig::default();
        assert_eq!(upstream.transport_for(false), TransportKind::Ssh);
        assert_eq!(upstream.transport_for(true), TransportKind::Tcp);

        let pinned = UpstreamConfig {
            transport: Some(TransportKind::Ssh),
            ..UpstreamConfig::default()
        };
        assert_eq!(pinned.transport_for(true), TransportKind::Ssh);
    }

    #[test]
    fn test_validate_rejects_bad_ttl() {
        for ttl in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e19, MAX_TIME_TO_LIVE_SECS + 1.0] {
            let mut config = Config::default();
            config.tunnel.time_to_live_secs = ttl;
            assert!(config.validate().is_err(), "ttl {ttl} should be rejected");
        }
    }

    #[test]
    fn test_validate_accepts_ttl_up_to_limit() {
        let mut config = Config::default();
        config.tunnel.time_to_live_secs = MAX_TIME_TO_LIVE_SECS;
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_huge_reconnect_delays() {
        let mut config = Config::default();
        config.tunnel.reconnect_max_delay_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_max_delay_secs"));

        let mut config = Config::default();
        config.tunnel.reconnect_delay_secs = MAX_RECONNECT_DELAY_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_write_failures() {
        let mut config = Config::default();
        config.tunnel.max_write_failures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_raises_backoff_cap() {
        let mut config = Config::default();
        config.tunnel.reconnect_delay_secs = 10;
        config.tunnel.reconnect_max_delay_secs = 2;
        config.validate().unwrap();
        assert_eq!(config.tunnel.reconnect_max_delay_secs, 10);
    }
}
