use clap::Parser;
use goro_common::types::SERVER_ID_SIZE;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI arguments for the router.
#[derive(Parser, Debug, Clone)]
#[command(name = "goros")]
#[command(about = "goro message router")]
#[command(version)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "GOROS_CONFIG")]
    pub config: Option<PathBuf>,
    /// Log level override (trace, debug, info, warn, error).
    #[arg(long, env = "GOROS_LOG_LEVEL")]
    pub log_level: Option<String>,
    /// Expose Prometheus metrics and health probes on this address.
    #[arg(long, env = "GOROS_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Full router configuration, loaded from the TOML file with per-section
/// defaults.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerSection,
    /// TLS certificate settings.
    pub tls: TlsSection,
    /// Broker endpoint settings.
    pub nats: NatsSection,
    /// Admission and rate limits.
    pub limits: LimitsSection,
    /// Logging settings.
    pub log: LogSection,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Textual server identifier, at most 32 bytes; zero-padded into the
    /// handshake field.
    pub server_id: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            server_id: "goro-1".to_string(),
        }
    }
}

impl ServerSection {
    /// Returns the listen address as `host:port`.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the server identifier zero-padded to the handshake width.
    #[must_use]
    pub fn server_id_bytes(&self) -> [u8; SERVER_ID_SIZE] {
        let mut id = [0u8; SERVER_ID_SIZE];
        let src = self.server_id.as_bytes();
        let n = src.len().min(SERVER_ID_SIZE);
        id[..n].copy_from_slice(&src[..n]);
        id
    }
}

/// `[tls]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    /// PEM certificate chain path.
    pub cert_file: PathBuf,
    /// PEM private key path.
    pub key_file: PathBuf,
    /// Minimum accepted TLS version: "1.2" or "1.3".
    pub min_version: String,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            cert_file: PathBuf::new(),
            key_file: PathBuf::new(),
            min_version: "1.2".to_string(),
        }
    }
}

/// `[nats]` section: broker endpoints and reconnection policy.
///
/// Consumed by whichever broker adapter is wired at startup; the bundled
/// in-process adapter ignores the URLs but the section is validated so a
/// NATS-backed deployment fails fast on a bad config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsSection {
    /// Broker endpoint URLs.
    pub urls: Vec<String>,
    /// Seconds to wait between reconnect attempts.
    #[serde(rename = "reconnect_wait")]
    pub reconnect_wait_secs: u64,
    /// Maximum reconnect attempts; negative means unlimited.
    pub max_reconnects: i32,
}

impl Default for NatsSection {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            reconnect_wait_secs: 2,
            max_reconnects: -1,
        }
    }
}

/// `[limits]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Credit-pool size; bounds connections and concurrent handshakes.
    pub max_connections: usize,
    /// Upper bound on a client message body, bytes.
    pub max_message_size: usize,
    /// Sustained per-peer message rate, messages per second.
    pub rate_limit_per_sec: f64,
    /// Per-peer burst allowance.
    pub rate_limit_burst: u32,
    /// Whole-handshake deadline, seconds.
    #[serde(rename = "auth_timeout")]
    pub auth_timeout_secs: u64,
    /// Maximum accepted age of a server-issued challenge, seconds.
    #[serde(rename = "challenge_ttl")]
    pub challenge_ttl_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_message_size: 65_536,
            rate_limit_per_sec: 100.0,
            rate_limit_burst: 10,
            auth_timeout_secs: 10,
            challenge_ttl_secs: 60,
        }
    }
}

impl LimitsSection {
    /// Handshake deadline as a [`Duration`].
    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Challenge TTL as a [`Duration`].
    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Output format: "json" or "text".
    pub format: String,
    /// Log file path; empty means stdout.
    pub file: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            file: String::new(),
        }
    }
}

impl Config {
    /// Loads configuration from the given TOML file over the built-in
    /// defaults. A missing path (or a `None`) yields pure defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
            }
        }
        let cfg: Self = builder.build()?.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates configuration values before startup.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".to_string());
        }
        if self.server.server_id.is_empty() {
            return Err("server.server_id is required".to_string());
        }
        if self.server.server_id.len() > SERVER_ID_SIZE {
            return Err(format!(
                "server.server_id too long: max {} bytes, got {}",
                SERVER_ID_SIZE,
                self.server.server_id.len()
            ));
        }

        if self.tls.cert_file.as_os_str().is_empty() {
            return Err("tls.cert_file is required".to_string());
        }
        if self.tls.key_file.as_os_str().is_empty() {
            return Err("tls.key_file is required".to_string());
        }
        if self.tls.min_version != "1.2" && self.tls.min_version != "1.3" {
            return Err(format!(
                "tls.min_version must be \"1.2\" or \"1.3\", got {:?}",
                self.tls.min_version
            ));
        }

        if self.nats.urls.is_empty() {
            return Err("nats.urls is required".to_string());
        }

        if self.limits.max_connections == 0 {
            return Err("limits.max_connections must be positive".to_string());
        }
        if self.limits.max_message_size < goro_common::types::MIN_MESSAGE_SIZE {
            return Err(format!(
                "limits.max_message_size must be at least {}",
                goro_common::types::MIN_MESSAGE_SIZE
            ));
        }
        if self.limits.max_message_size > goro_common::types::MAX_MESSAGE_SIZE {
            return Err(format!(
                "limits.max_message_size exceeds protocol maximum ({})",
                goro_common::types::MAX_MESSAGE_SIZE
            ));
        }
        if self.limits.rate_limit_per_sec <= 0.0 {
            return Err("limits.rate_limit_per_sec must be positive".to_string());
        }
        if self.limits.rate_limit_burst == 0 {
            return Err("limits.rate_limit_burst must be positive".to_string());
        }
        if self.limits.auth_timeout_secs == 0 {
            return Err("limits.auth_timeout_secs must be positive".to_string());
        }
        if self.limits.challenge_ttl_secs == 0 {
            return Err("limits.challenge_ttl_secs must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut cfg = Config::default();
        cfg.tls.cert_file = PathBuf::from("/tmp/cert.pem");
        cfg.tls.key_file = PathBuf::from("/tmp/key.pem");
        cfg
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.addr(), "0.0.0.0:8443");
        assert_eq!(cfg.server.server_id, "goro-1");
        assert_eq!(cfg.tls.min_version, "1.2");
        assert_eq!(cfg.limits.max_connections, 10_000);
        assert_eq!(cfg.limits.max_message_size, 65_536);
        assert_eq!(cfg.limits.auth_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.limits.challenge_ttl(), Duration::from_secs(60));
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.format, "json");
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_server_id_rejected() {
        let mut cfg = valid_config();
        cfg.server.server_id = String::new();
        assert!(cfg.validate().unwrap_err().contains("server_id"));
    }

    #[test]
    fn oversize_server_id_rejected() {
        let mut cfg = valid_config();
        cfg.server.server_id = "x".repeat(SERVER_ID_SIZE + 1);
        assert!(cfg.validate().unwrap_err().contains("server_id"));
    }

    #[test]
    fn server_id_is_zero_padded() {
        let cfg = valid_config();
        let id = cfg.server.server_id_bytes();
        assert_eq!(&id[..6], b"goro-1");
        assert!(id[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn missing_tls_paths_rejected() {
        let mut cfg = valid_config();
        cfg.tls.cert_file = PathBuf::new();
        assert!(cfg.validate().unwrap_err().contains("cert_file"));

        let mut cfg = valid_config();
        cfg.tls.key_file = PathBuf::new();
        assert!(cfg.validate().unwrap_err().contains("key_file"));
    }

    #[test]
    fn bad_min_version_rejected() {
        let mut cfg = valid_config();
        cfg.tls.min_version = "1.1".to_string();
        assert!(cfg.validate().unwrap_err().contains("min_version"));
    }

    #[test]
    fn empty_broker_urls_rejected() {
        let mut cfg = valid_config();
        cfg.nats.urls.clear();
        assert!(cfg.validate().unwrap_err().contains("nats.urls"));
    }

    #[test]
    fn zero_limits_rejected() {
        let mut cfg = valid_config();
        cfg.limits.max_connections = 0;
        assert!(cfg.validate().unwrap_err().contains("max_connections"));

        let mut cfg = valid_config();
        cfg.limits.rate_limit_per_sec = 0.0;
        assert!(cfg.validate().unwrap_err().contains("rate_limit_per_sec"));

        let mut cfg = valid_config();
        cfg.limits.rate_limit_burst = 0;
        assert!(cfg.validate().unwrap_err().contains("rate_limit_burst"));

        let mut cfg = valid_config();
        cfg.limits.auth_timeout_secs = 0;
        assert!(cfg.validate().unwrap_err().contains("auth_timeout"));

        let mut cfg = valid_config();
        cfg.limits.challenge_ttl_secs = 0;
        assert!(cfg.validate().unwrap_err().contains("challenge_ttl"));
    }

    #[test]
    fn message_size_bounds_enforced() {
        let mut cfg = valid_config();
        cfg.limits.max_message_size = 10;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.limits.max_message_size = goro_common::types::MAX_MESSAGE_SIZE + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_parses_toml_sections() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[server]
host = "127.0.0.1"
port = 9000
server_id = "router-a"

[tls]
cert_file = "/etc/goro/cert.pem"
key_file = "/etc/goro/key.pem"
min_version = "1.3"

[nats]
urls = ["nats://10.0.0.1:4222", "nats://10.0.0.2:4222"]
reconnect_wait = 5

[limits]
max_connections = 50
rate_limit_per_sec = 5.0
auth_timeout = 3
challenge_ttl = 120

[log]
level = "debug"
format = "text"
"#
        )
        .unwrap();

        let cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.server.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.server.server_id, "router-a");
        assert_eq!(cfg.tls.min_version, "1.3");
        assert_eq!(cfg.nats.urls.len(), 2);
        assert_eq!(cfg.nats.reconnect_wait_secs, 5);
        assert_eq!(cfg.limits.max_connections, 50);
        assert_eq!(cfg.limits.auth_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.limits.challenge_ttl(), Duration::from_secs(120));
        // Unset keys keep their defaults.
        assert_eq!(cfg.limits.rate_limit_burst, 10);
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn load_without_file_yields_defaults() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.server.port, 8443);
        let cfg = Config::load(Some(Path::new("/nonexistent/goros.toml"))).unwrap();
        assert_eq!(cfg.server.port, 8443);
    }
}
