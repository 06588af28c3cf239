//! HTTP server lifecycle: factory, TLS renewal coordination, redirect
//! listener and signal-driven shutdown.
//!
//! Three TLS modes are supported:
//! - **None**: plain HTTP
//! - **Acme**: automatic certificate provisioning and renewal; the renewal
//!   coordinator hot-swaps the listener when fresh material is deployed
//! - **Manual**: user-provided certificate files, started once

pub mod coordinator;
pub mod redirect;
pub mod server;
pub mod shutdown;

pub use coordinator::{RenewalEvent, TlsRenewalCoordinator};
pub use server::{ActiveServer, ServerError, ServerFactory, TlsBackend};
