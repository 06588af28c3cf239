//! skiff - an HTTP/HTTPS server for single-page applications.
//!
//! Serves a SPA's static assets with index fallback for client-side routing,
//! and keeps serving across TLS certificate issuance and renewal without
//! dropping in-flight connections.

pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod supervisor;
