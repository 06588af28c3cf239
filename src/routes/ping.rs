//! Liveness endpoint.
//!
//! Returns a fixed payload so load balancers and orchestrators can verify the
//! process is alive and responding to HTTP.

use axum::http::header;
use axum::response::IntoResponse;

/// The literal liveness payload. Kept byte-for-byte stable; callers may
/// compare against it directly.
pub const PING_BODY: &str = r#"{"response": "pong"}"#;

/// `GET /ping` handler.
pub async fn ping() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], PING_BODY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_the_expected_literal() {
        assert_eq!(PING_BODY, "{\"response\": \"pong\"}");
    }
}
