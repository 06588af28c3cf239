//! Plain-HTTP redirect listener.
//!
//! In ACME mode a lightweight HTTP server runs on port 80 and redirects
//! every request to HTTPS. It is a supervised background task: a failure to
//! bind or serve is captured and logged, never fatal to the main server.

use std::net::SocketAddr;

use axum::http::{StatusCode, Uri};
use axum::response::Redirect;
use axum::routing::any;
use axum::Router;
use axum_extra::extract::Host;
use tokio::task::JoinHandle;

use crate::config::REDIRECT_PORT;

/// Spawn the redirect listener. Does not block.
pub fn spawn_redirect_server(host: String, https_port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr: SocketAddr = match format!("{}:{}", host, REDIRECT_PORT).parse() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::error!(error = %e, %host, "invalid redirect listener address");
                return;
            }
        };

        tracing::info!(%addr, https_port, "starting HTTP->HTTPS redirect listener");

        let app = Router::new().fallback(any(move |Host(host): Host, uri: Uri| async move {
            redirect_to_https(host, uri, https_port)
        }));

        if let Err(e) = axum_server::bind(addr).serve(app.into_make_service()).await {
            tracing::error!(error = %e, "HTTP redirect listener failed");
        }
    })
}

/// Build a permanent redirect from HTTP to the HTTPS equivalent.
fn redirect_to_https(host: String, uri: Uri, https_port: u16) -> Result<Redirect, StatusCode> {
    let host_without_port = host.split(':').next().unwrap_or(&host);
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let https_url = if https_port == 443 {
        format!("https://{}{}", host_without_port, path_and_query)
    } else {
        format!("https://{}:{}{}", host_without_port, https_port, path_and_query)
    };

    tracing::debug!(from = %uri, to = %https_url, "redirecting to HTTPS");
    Ok(Redirect::permanent(&https_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_drops_the_source_port() {
        let uri: Uri = "/app/route?x=1".parse().unwrap();
        let redirect = redirect_to_https("example.com:80".into(), uri, 443);
        assert!(redirect.is_ok());
    }
}
