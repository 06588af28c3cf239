//! Lifecycle supervisor.
//!
//! Top-level orchestration: `Starting -> Running -> ShuttingDown -> Stopped`.
//! Servers are launched on background tasks, the supervisor blocks on a
//! termination signal, then drives exactly one bounded drain. The graceful
//! deadline is the only timeout in the design; once it elapses remaining
//! connections are force-closed so process exit is never blocked.

use std::fmt::Display;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::task::JoinHandle;

use crate::config::{ServerConfig, TlsMode, SHUTDOWN_SLACK_SECS};
use crate::http::coordinator::{self, TlsRenewalCoordinator};
use crate::http::{redirect, shutdown, ServerFactory, TlsBackend};
use crate::routes::create_router;
use crate::state::AppState;

/// Run the server to completion. Returns the process exit code: success on
/// clean shutdown, failure on configuration, listener or shutdown errors.
pub async fn run(config: ServerConfig) -> ExitCode {
    let config = Arc::new(config);
    let state = AppState::new(config.clone());
    let router = create_router(state);
    let factory = ServerFactory::new(config.clone(), router);

    match config.tls.clone() {
        TlsMode::None => serve_until_signal(factory, TlsBackend::Plain, &config).await,
        TlsMode::Manual { cert_path, key_path } => {
            let rustls = match RustlsConfig::from_pem_file(&cert_path, &key_path).await {
                Ok(rustls) => rustls,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "failed to load certificates"
                    );
                    return ExitCode::FAILURE;
                }
            };
            tracing::info!(
                cert = %cert_path.display(),
                key = %key_path.display(),
                "starting HTTPS server with static certificates"
            );
            serve_until_signal(factory, TlsBackend::Rustls(rustls), &config).await
        }
        TlsMode::Acme(settings) => serve_with_renewal(factory, &settings, &config).await,
    }
}

/// Plain-HTTP and static-certificate modes: one server, started once, never
/// hot-swapped. The supervisor owns the active server directly.
async fn serve_until_signal(
    factory: ServerFactory,
    backend: TlsBackend,
    config: &ServerConfig,
) -> ExitCode {
    enum Step {
        Signal(&'static str),
        Finished(Result<(), String>),
    }

    let mut active = match start_initial(&factory, &backend).await {
        Ok(active) => active,
        Err(code) => return code,
    };

    let step = tokio::select! {
        signal = shutdown::wait_for_signal() => Step::Signal(signal),
        result = &mut active.task => Step::Finished(flatten_serve(result)),
    };

    match step {
        Step::Signal(signal) => {
            tracing::info!(signal, "termination signal received, shutting down");
            let handle = active.handle();
            drain(handle, active.task, config.graceful_timeout).await
        }
        Step::Finished(result) => report_unexpected_exit(result),
    }
}

/// ACME mode: the renewal coordinator owns the active server; the supervisor
/// reads it only through the coordinator's accessors. The redirect listener
/// is supervised separately and its failure is non-fatal.
async fn serve_with_renewal(
    factory: ServerFactory,
    settings: &crate::config::AcmeSettings,
    config: &ServerConfig,
) -> ExitCode {
    enum Step {
        Signal(&'static str),
        Finished(Result<(), String>),
    }

    let (events_tx, events_rx) = coordinator::renewal_channel();
    let backend = match coordinator::init_acme(settings, events_tx) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, "certificate management initialization failed");
            return ExitCode::FAILURE;
        }
    };

    redirect::spawn_redirect_server(config.host.clone(), config.port);

    let active = match start_initial(&factory, &backend).await {
        Ok(active) => active,
        Err(code) => return code,
    };

    let coordinator =
        TlsRenewalCoordinator::new(factory, backend, active, config.graceful_timeout);
    let mut coordinator = coordinator.spawn(events_rx);

    // Surface readiness transitions: the server stops counting as ready
    // while a renewal drains the active listener.
    let mut ready = coordinator.ready_watch();
    tokio::spawn(async move {
        while ready.changed().await.is_ok() {
            if *ready.borrow_and_update() {
                tracing::info!("server ready");
            } else {
                tracing::info!("certificate renewal in progress, server draining");
            }
        }
    });

    let step = tokio::select! {
        signal = shutdown::wait_for_signal() => Step::Signal(signal),
        result = &mut coordinator.task => Step::Finished(flatten_serve(result)),
    };

    match step {
        Step::Signal(signal) => {
            tracing::info!(signal, "termination signal received, shutting down");
            let handle = coordinator.server_handle();
            drain(handle, coordinator.task, config.graceful_timeout).await
        }
        Step::Finished(result) => report_unexpected_exit(result),
    }
}

/// `Starting -> Running`: launch the initial server, fatal on failure.
async fn start_initial(
    factory: &ServerFactory,
    backend: &TlsBackend,
) -> Result<crate::http::ActiveServer, ExitCode> {
    let prepared = match factory.prepare() {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!(error = %e, "failed to prepare server");
            return Err(ExitCode::FAILURE);
        }
    };
    match prepared.start(backend).await {
        Ok(active) => Ok(active),
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            Err(ExitCode::FAILURE)
        }
    }
}

/// `ShuttingDown -> Stopped`: one bounded drain.
///
/// Clean completion is success; deadline expiry force-closes remaining
/// connections and is treated as a forced-but-acceptable termination; any
/// other error exits non-zero.
async fn drain<E: Display>(
    handle: Handle,
    task: JoinHandle<Result<(), E>>,
    grace: Duration,
) -> ExitCode {
    handle.graceful_shutdown(Some(grace));
    tracing::info!(
        grace_secs = grace.as_secs(),
        "draining in-flight connections"
    );

    let deadline = grace + Duration::from_secs(SHUTDOWN_SLACK_SECS);
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!("server exited properly");
            ExitCode::SUCCESS
        }
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "unexpected error on exit");
            ExitCode::FAILURE
        }
        Ok(Err(_)) => {
            tracing::error!("server task panicked during shutdown");
            ExitCode::FAILURE
        }
        Err(_) => {
            tracing::warn!("graceful deadline exceeded, forcing close");
            handle.shutdown();
            ExitCode::SUCCESS
        }
    }
}

/// A listener terminating without a signal is fatal.
fn report_unexpected_exit(result: Result<(), String>) -> ExitCode {
    match result {
        Ok(()) => tracing::error!("server terminated unexpectedly"),
        Err(e) => tracing::error!(error = %e, "server terminated unexpectedly"),
    }
    ExitCode::FAILURE
}

/// Collapse join and serve errors into one displayable result.
fn flatten_serve<E: Display>(
    result: Result<Result<(), E>, tokio::task::JoinError>,
) -> Result<(), String> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join) => Err(join.to_string()),
    }
}
