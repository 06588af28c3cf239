//! Termination-signal handling.
//!
//! The supervisor blocks on [`wait_for_signal`] and then runs exactly one
//! bounded drain; repeated signals during shutdown are not re-entered.

/// Block until a termination signal arrives. Returns the signal name for
/// logging.
#[cfg(unix)]
pub async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
    let mut hangup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");
    let mut quit = signal(SignalKind::quit()).expect("Failed to install SIGQUIT handler");

    tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = hangup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    }
}

/// Block until Ctrl+C on platforms without Unix signals.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> &'static str {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    "ctrl-c"
}
