//! TLS renewal coordination.
//!
//! The coordinator owns the active server while automatic certificate
//! renewal is enabled. Renewal lifecycle notifications arrive as explicit
//! events on a channel (never as callbacks mutating shared state) and drive
//! a small state machine:
//!
//! ```text
//! Idle -> Serving -> Draining -> Replacing -> Serving -> ...
//! ```
//!
//! On `WillRenew` the readiness flag drops but the listener keeps serving.
//! On `DidRenew` a replacement listener is built from a fresh configuration
//! snapshot and started while the outgoing one drains; in-flight connections
//! on the old listener are given the configured grace period to complete, so
//! a rotation is never observable as dropped requests.

use std::time::Duration;

use axum_server::Handle;
use futures::StreamExt;
use rustls_acme::caches::DirCache;
use rustls_acme::{AcmeConfig, EventOk};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::AcmeSettings;

use super::server::{ActiveServer, ServerError, ServerFactory, TlsBackend};

/// Capacity of the renewal event channel. Renewal events are serialized by
/// the certificate-management collaborator, so depth is never an issue.
const RENEWAL_EVENT_CAPACITY: usize = 16;

/// Certificate renewal lifecycle notification.
///
/// `DidRenew` carries no raw key material: the shared certificate supplier
/// (the ACME resolver consulted per handshake) has already been refreshed by
/// the time the event is delivered. The event tells the coordinator that a
/// listener rebuild should pick the new material up at the listener level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalEvent {
    /// Certificate replacement is imminent; begin draining.
    WillRenew,
    /// Fresh certificate material has been deployed to the supplier.
    DidRenew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinatorState {
    Idle,
    Serving,
    Draining,
    Replacing,
}

/// Owns the active server and replaces it across certificate renewals.
pub struct TlsRenewalCoordinator {
    factory: ServerFactory,
    backend: TlsBackend,
    active: Option<ActiveServer>,
    state: CoordinatorState,
    grace: Duration,
    ready_tx: watch::Sender<bool>,
    handle_tx: watch::Sender<Handle>,
    /// Total completed renewals, for observability only.
    renewals: u64,
}

/// Supervisor-facing view of a running coordinator.
///
/// The active server is mutated only by the coordinator's own transitions;
/// the supervisor reads it exclusively through these accessors.
pub struct CoordinatorHandle {
    handle_rx: watch::Receiver<Handle>,
    ready_rx: watch::Receiver<bool>,
    pub(crate) task: JoinHandle<Result<(), ServerError>>,
}

impl CoordinatorHandle {
    /// The shutdown handle of whichever server is currently active.
    pub fn server_handle(&self) -> Handle {
        self.handle_rx.borrow().clone()
    }

    /// Whether the coordinator considers the server ready. Drops during a
    /// renewal and comes back once the replacement is accepting.
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Watch readiness transitions. The supervisor observes this so a
    /// draining server stops being treated as ready.
    pub fn ready_watch(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }
}

impl TlsRenewalCoordinator {
    /// Take ownership of an already-started server: `Idle -> Serving`.
    pub fn new(
        factory: ServerFactory,
        backend: TlsBackend,
        initial: ActiveServer,
        grace: Duration,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        let (handle_tx, _) = watch::channel(initial.handle());
        let mut coordinator = Self {
            factory,
            backend,
            active: None,
            state: CoordinatorState::Idle,
            grace,
            ready_tx,
            handle_tx,
            renewals: 0,
        };
        coordinator.adopt(initial);
        coordinator
    }

    /// `Idle -> Serving`: begin tracking a server that is accepting
    /// connections.
    fn adopt(&mut self, server: ActiveServer) {
        self.handle_tx.send_replace(server.handle());
        self.active = Some(server);
        self.state = CoordinatorState::Serving;
        self.ready_tx.send_replace(true);
    }

    /// Run the coordinator on a background task.
    pub fn spawn(self, events: mpsc::Receiver<RenewalEvent>) -> CoordinatorHandle {
        let handle_rx = self.handle_tx.subscribe();
        let ready_rx = self.ready_tx.subscribe();
        let task = tokio::spawn(self.run(events));
        CoordinatorHandle {
            handle_rx,
            ready_rx,
            task,
        }
    }

    /// Event loop: react to renewal events until the active serve task ends.
    ///
    /// Returns the serve task's outcome; an unexpected listener termination
    /// is fatal to the process, a requested shutdown resolves cleanly.
    pub async fn run(mut self, mut events: mpsc::Receiver<RenewalEvent>) -> Result<(), ServerError> {
        enum Step {
            Event(RenewalEvent),
            EventsClosed,
            ServeFinished(Result<(), ServerError>),
        }

        loop {
            let step = {
                let task = &mut self
                    .active
                    .as_mut()
                    .expect("coordinator always holds a server")
                    .task;
                tokio::select! {
                    maybe_event = events.recv() => match maybe_event {
                        Some(event) => Step::Event(event),
                        None => Step::EventsClosed,
                    },
                    result = task => Step::ServeFinished(
                        result
                            .map_err(|_| ServerError::Panicked)
                            .and_then(|r| r.map_err(ServerError::from)),
                    ),
                }
            };

            match step {
                Step::Event(event) => self.handle_event(event).await?,
                Step::EventsClosed => {
                    // Collaborator gone; keep serving until shutdown.
                    let active = self.active.take().expect("server present");
                    let result = active.task.await.map_err(|_| ServerError::Panicked)?;
                    return result.map_err(ServerError::from);
                }
                Step::ServeFinished(result) => return result,
            }
        }
    }

    async fn handle_event(&mut self, event: RenewalEvent) -> Result<(), ServerError> {
        match event {
            RenewalEvent::WillRenew => {
                // Serving -> Draining: stop reporting ready, keep serving.
                tracing::info!(state = ?self.state, "certificate renewal imminent, draining");
                self.state = CoordinatorState::Draining;
                self.ready_tx.send_replace(false);
            }
            RenewalEvent::DidRenew => {
                self.state = CoordinatorState::Replacing;
                self.replace_active().await?;
                self.state = CoordinatorState::Serving;
                self.ready_tx.send_replace(true);
                self.renewals += 1;
                tracing::info!(renewals = self.renewals, "certificate renewal complete");
            }
        }
        Ok(())
    }

    /// `Replacing`: start a replacement listener and drain the outgoing one.
    ///
    /// The outgoing listener releases the port as soon as its drain begins,
    /// while its in-flight connections continue; the replacement's bind
    /// retries with backoff until the port is free, so the bind is
    /// sequential, never concurrent.
    async fn replace_active(&mut self) -> Result<(), ServerError> {
        let old = self.active.take().expect("coordinator always holds a server");
        let old_handle = old.handle();
        old_handle.graceful_shutdown(Some(self.grace));

        let replacement = self.factory.prepare()?.start(&self.backend).await?;
        self.handle_tx.send_replace(replacement.handle());
        self.active = Some(replacement);

        // Reap the outgoing serve task off the hot path.
        let grace = self.grace;
        tokio::spawn(async move {
            match tokio::time::timeout(grace + Duration::from_secs(1), old.task).await {
                Ok(Ok(Ok(()))) => tracing::debug!("outgoing server drained"),
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "outgoing server exited with error"),
                Ok(Err(_)) => tracing::warn!("outgoing server task panicked"),
                Err(_) => {
                    tracing::warn!("outgoing server exceeded drain deadline, forcing close");
                    old_handle.shutdown();
                }
            }
        });
        Ok(())
    }
}

/// Initialize the certificate-management collaborator.
///
/// Returns the TLS backend for listeners (the acceptor consults the shared
/// certificate resolver per handshake, so most renewals need no listener
/// restart at all) and spawns the driver task that translates collaborator
/// events into [`RenewalEvent`]s. Initialization failure here is fatal; the
/// server cannot safely start without its certificate subsystem.
pub fn init_acme(
    settings: &AcmeSettings,
    events_tx: mpsc::Sender<RenewalEvent>,
) -> Result<TlsBackend, ServerError> {
    std::fs::create_dir_all(&settings.cache_dir).map_err(|e| {
        ServerError::TlsConfig(format!(
            "Failed to create certificate cache directory '{}': {}",
            settings.cache_dir.display(),
            e
        ))
    })?;

    let env_name = if settings.production { "production" } else { "staging" };
    tracing::info!(
        domain = %settings.domain,
        email = %settings.email,
        cache = %settings.cache_dir.display(),
        environment = %env_name,
        "initializing automatic certificate management"
    );
    if !settings.production {
        tracing::warn!(
            "Using the Let's Encrypt staging environment - certificates will NOT be trusted \
             by browsers. Pass --acme-production for production use."
        );
    }

    let mut acme_state = AcmeConfig::new([settings.domain.clone()])
        .contact_push(format!("mailto:{}", settings.email))
        .cache(DirCache::new(settings.cache_dir.clone()))
        .directory_lets_encrypt(settings.production)
        .state();

    let acceptor = acme_state.axum_acceptor(acme_state.default_rustls_config());

    tokio::spawn(async move {
        loop {
            match acme_state.next().await {
                // A freshly issued certificate was stored; deployment follows.
                Some(Ok(EventOk::CertCacheStore)) => {
                    tracing::info!("new certificate obtained");
                    if events_tx.send(RenewalEvent::WillRenew).await.is_err() {
                        break;
                    }
                }
                Some(Ok(EventOk::DeployedNewCert)) => {
                    tracing::info!("new certificate deployed");
                    if events_tx.send(RenewalEvent::DidRenew).await.is_err() {
                        break;
                    }
                }
                Some(Ok(event)) => {
                    tracing::debug!(event = ?event, "acme event");
                }
                Some(Err(err)) => {
                    tracing::error!(error = %err, "acme error");
                }
                None => {
                    tracing::debug!("acme state stream ended");
                    break;
                }
            }
        }
    });

    Ok(TlsBackend::Acme(acceptor))
}

/// Channel for renewal events, collaborator side first.
pub fn renewal_channel() -> (mpsc::Sender<RenewalEvent>, mpsc::Receiver<RenewalEvent>) {
    mpsc::channel(RENEWAL_EVENT_CAPACITY)
}
