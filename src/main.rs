//! skiff: a small HTTP/HTTPS server for single-page applications.
//!
//! This is the application entry point. It initializes tracing, parses and
//! validates command-line flags into a `ServerConfig`, and hands control to
//! the lifecycle supervisor, which serves until a termination signal and
//! then drains within the configured graceful timeout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skiff::config::{ConfigError, ServerConfig, TlsMode, DEFAULT_GRACEFUL_TIMEOUT_SECS, DEFAULT_LOG_FILTER};
use skiff::supervisor;

/// skiff: serve a single-page application over HTTP/HTTPS
#[derive(Parser, Debug)]
#[command(name = "skiff", version, about)]
struct Args {
    /// Host this service binds
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port this service listens on
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Folder the SPA is served from, usually where index.html is located
    #[arg(long, default_value = "./")]
    root_dir: PathBuf,

    /// Seconds to wait for existing connections to finish on shutdown
    #[arg(long, default_value_t = DEFAULT_GRACEFUL_TIMEOUT_SECS)]
    graceful_timeout: u64,

    /// Run in SSL mode
    #[arg(long)]
    ssl: bool,

    /// Public domain name of the site (ACME mode)
    #[arg(long)]
    domain: Option<String>,

    /// Contact email for certificate issuance (ACME mode)
    #[arg(long)]
    ssl_email: Option<String>,

    /// Certificate cache directory (ACME mode)
    #[arg(long)]
    cert_cache: Option<PathBuf>,

    /// Use the Let's Encrypt production directory instead of staging
    #[arg(long)]
    acme_production: bool,

    /// Path to an existing full certificate chain (static mode)
    #[arg(long)]
    cert_file: Option<PathBuf>,

    /// Path to the matching private key (static mode)
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Log level filter (e.g. "skiff=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let tls = TlsMode::from_flags(
            self.ssl,
            self.domain,
            self.ssl_email,
            self.cert_cache,
            self.acme_production,
            self.cert_file,
            self.key_file,
        )?;
        ServerConfig::new(
            self.host,
            self.port,
            self.root_dir,
            Duration::from_secs(self.graceful_timeout),
            tls,
        )
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Log filter priority: CLI > env > default
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        host = %config.host,
        port = config.port,
        root = %config.root_dir.display(),
        tls = config.tls_enabled(),
        "starting skiff"
    );

    supervisor::run(config).await
}
