//! Server configuration and constants.
//!
//! `ServerConfig` is the immutable value object handed to the server factory.
//! Every listener rebuild during certificate rotation works from a fresh copy
//! derived from this original configuration; only the TLS material differs
//! across rebuilds.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Serving timeouts
// =============================================================================

/// Per-request read timeout in seconds
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Per-request write timeout in seconds
pub const WRITE_TIMEOUT_SECS: u64 = 60;

/// Keep-alive idle timeout in seconds
pub const IDLE_TIMEOUT_SECS: u64 = 120;

/// Default graceful-shutdown drain duration in seconds
pub const DEFAULT_GRACEFUL_TIMEOUT_SECS: u64 = 15;

/// Extra scheduling slack granted on top of the graceful deadline before the
/// supervisor stops waiting for the serve task
pub const SHUTDOWN_SLACK_SECS: u64 = 2;

// =============================================================================
// Listener rebind retry
// =============================================================================
// During a hot-swap the replacement listener may race the outgoing listener
// for the port. Bind is retried with doubling backoff instead of failing
// the rotation.

/// Maximum bind attempts before the rotation is abandoned
pub const BIND_RETRY_ATTEMPTS: u32 = 5;

/// Initial delay between bind attempts in milliseconds (doubles per attempt)
pub const BIND_RETRY_INITIAL_DELAY_MS: u64 = 100;

// =============================================================================
// Ports and paths
// =============================================================================

/// The only port TLS mode may listen on
pub const HTTPS_PORT: u16 = 443;

/// Port for the plain-HTTP redirect listener in ACME mode
pub const REDIRECT_PORT: u16 = 80;

/// Index document served when a request path resolves to no static asset
pub const DEFAULT_INDEX_FILE: &str = "index.html";

/// Default log filter when neither --log-level nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "skiff=info,tower_http=info";

/// Immutable server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Directory the SPA is served from, usually where index.html lives
    pub root_dir: PathBuf,
    /// Index document relative to `root_dir`
    pub index_file: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    /// How long in-flight connections may drain on shutdown or hot-swap
    pub graceful_timeout: Duration,
    pub tls: TlsMode,
}

/// How the server obtains TLS material, if at all.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Plain HTTP
    None,
    /// Automatic issuance and renewal through the ACME collaborator
    Acme(AcmeSettings),
    /// User-provided certificate chain and key, no renewal coordination
    Manual { cert_path: PathBuf, key_path: PathBuf },
}

impl TlsMode {
    /// Derive the TLS mode from CLI flags, rejecting incomplete or
    /// contradictory combinations before any listener is bound.
    pub fn from_flags(
        ssl: bool,
        domain: Option<String>,
        email: Option<String>,
        cert_cache: Option<PathBuf>,
        production: bool,
        cert_file: Option<PathBuf>,
        key_file: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if !ssl {
            return Ok(TlsMode::None);
        }

        let has_acme = domain.is_some() || email.is_some() || cert_cache.is_some();
        let has_manual = cert_file.is_some() || key_file.is_some();

        if has_acme && has_manual {
            return Err(ConfigError::ConflictingCertModes);
        }

        if has_manual {
            return match (cert_file, key_file) {
                (Some(cert_path), Some(key_path)) => Ok(TlsMode::Manual { cert_path, key_path }),
                (None, _) => Err(ConfigError::MissingTlsFlag("--cert-file")),
                (_, None) => Err(ConfigError::MissingTlsFlag("--key-file")),
            };
        }

        if has_acme {
            let domain = domain.ok_or(ConfigError::MissingTlsFlag("--domain"))?;
            let email = email.ok_or(ConfigError::MissingTlsFlag("--ssl-email"))?;
            let cache_dir = cert_cache.ok_or(ConfigError::MissingTlsFlag("--cert-cache"))?;
            return Ok(TlsMode::Acme(AcmeSettings {
                domain,
                email,
                cache_dir,
                production,
            }));
        }

        Err(ConfigError::NoCertSource)
    }
}

/// Parameters for the automatic certificate-management collaborator.
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    /// Public domain name of the site
    pub domain: String,
    /// Contact email registered with the ACME directory
    pub email: String,
    /// Where issued certificates and the account are cached
    pub cache_dir: PathBuf,
    /// Use the production directory instead of staging
    pub production: bool,
}

impl ServerConfig {
    /// Build a validated configuration. Fatal configuration errors are
    /// reported here, before any listener binds.
    pub fn new(
        host: String,
        port: u16,
        root_dir: PathBuf,
        graceful_timeout: Duration,
        tls: TlsMode,
    ) -> Result<Self, ConfigError> {
        // TLS on a non-standard port is rejected rather than silently
        // rewritten to 443.
        if !matches!(tls, TlsMode::None) && port != HTTPS_PORT {
            return Err(ConfigError::SslPortMismatch(port));
        }

        let config = Self {
            host,
            port,
            root_dir,
            index_file: DEFAULT_INDEX_FILE.to_string(),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(WRITE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
            graceful_timeout,
            tls,
        };
        config.socket_addr()?;
        Ok(config)
    }

    /// The address the server binds.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.host.clone(), self.port))
    }

    pub fn tls_enabled(&self) -> bool {
        !matches!(self.tls, TlsMode::None)
    }

    /// Absolute path of the index document.
    pub fn index_path(&self) -> PathBuf {
        self.root_dir.join(&self.index_file)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid bind address {0}:{1}")]
    InvalidAddress(String, u16),

    #[error("SSL requires port {HTTPS_PORT}, got {0}")]
    SslPortMismatch(u16),

    #[error("{0} is required when SSL is enabled")]
    MissingTlsFlag(&'static str),

    #[error("Choose either ACME flags (--domain/--ssl-email/--cert-cache) or static certificate flags (--cert-file/--key-file), not both")]
    ConflictingCertModes,

    #[error("SSL enabled but no certificate source given; pass ACME flags or --cert-file/--key-file")]
    NoCertSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme_flags() -> (Option<String>, Option<String>, Option<PathBuf>) {
        (
            Some("example.com".into()),
            Some("ops@example.com".into()),
            Some(PathBuf::from("/var/cache/certs")),
        )
    }

    #[test]
    fn plain_mode_ignores_cert_flags() {
        let mode = TlsMode::from_flags(false, None, None, None, false, None, None).unwrap();
        assert!(matches!(mode, TlsMode::None));
    }

    #[test]
    fn acme_mode_requires_all_three_flags() {
        let (domain, email, cache) = acme_flags();
        let mode = TlsMode::from_flags(
            true,
            domain.clone(),
            email.clone(),
            cache.clone(),
            true,
            None,
            None,
        )
        .unwrap();
        assert!(matches!(mode, TlsMode::Acme(_)));

        let err = TlsMode::from_flags(true, domain, None, cache, true, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTlsFlag("--ssl-email")));
    }

    #[test]
    fn manual_mode_requires_cert_and_key() {
        let mode = TlsMode::from_flags(
            true,
            None,
            None,
            None,
            false,
            Some("cert.pem".into()),
            Some("key.pem".into()),
        )
        .unwrap();
        assert!(matches!(mode, TlsMode::Manual { .. }));

        let err = TlsMode::from_flags(true, None, None, None, false, Some("cert.pem".into()), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingTlsFlag("--key-file")));
    }

    #[test]
    fn mixing_cert_modes_is_rejected() {
        let (domain, email, cache) = acme_flags();
        let err = TlsMode::from_flags(
            true,
            domain,
            email,
            cache,
            false,
            Some("cert.pem".into()),
            Some("key.pem".into()),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingCertModes));
    }

    #[test]
    fn ssl_without_cert_source_is_fatal() {
        let err = TlsMode::from_flags(true, None, None, None, false, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::NoCertSource));
    }

    #[test]
    fn ssl_on_non_443_port_is_fatal() {
        let tls = TlsMode::Manual {
            cert_path: "cert.pem".into(),
            key_path: "key.pem".into(),
        };
        let err = ServerConfig::new(
            "0.0.0.0".into(),
            5000,
            PathBuf::from("./"),
            Duration::from_secs(15),
            tls,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SslPortMismatch(5000)));
    }

    #[test]
    fn plain_config_on_any_port_is_accepted() {
        let config = ServerConfig::new(
            "127.0.0.1".into(),
            5000,
            PathBuf::from("./"),
            Duration::from_secs(15),
            TlsMode::None,
        )
        .unwrap();
        assert_eq!(config.socket_addr().unwrap().port(), 5000);
        assert_eq!(config.index_file, DEFAULT_INDEX_FILE);
    }

    #[test]
    fn invalid_host_is_rejected() {
        let err = ServerConfig::new(
            "not a host".into(),
            5000,
            PathBuf::from("./"),
            Duration::from_secs(15),
            TlsMode::None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_, _)));
    }
}
