//! Pre-shared API key authentication.
//!
//! Every control endpoint except `/api/health` requires
//! `Authorization: Bearer <key>`. The WebSocket upgrade authenticates with a
//! `?token=` query parameter instead, since browsers cannot attach headers
//! to upgrade requests — see [`crate::ws`].

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Extension carrying the expected key, injected at router build time so
/// the middleware does not need the full app state.
#[derive(Clone)]
pub struct ApiKey(pub String);

/// Middleware guarding the authenticated route group.
///
/// - `401 Unauthorized` — header missing or not `Bearer`
/// - `403 Forbidden` — key present but wrong
/// - `500 Internal Server Error` — [`ApiKey`] extension missing (misconfiguration)
pub async fn require_api_key(request: Request, next: Next) -> Response {
    let api_key = match request.extensions().get::<ApiKey>() {
        Some(key) => key.0.clone(),
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Server configuration error"})),
            )
                .into_response();
        }
    };

    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    let provided = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Missing or invalid Authorization header"})),
            )
                .into_response();
        }
    };

    if !constant_time_eq(api_key.as_bytes(), provided.as_bytes()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid API key"})),
        )
            .into_response();
    }

    next.run(request).await
}

/// Constant-time byte comparison.
///
/// Always walks the full expected length, so response timing reveals
/// neither the key contents nor its length.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for i in 0..expected.len() {
        let p = if i < provided.len() {
            provided[i]
        } else {
            0xff
        };
        diff |= expected[i] ^ p;
    }
    diff == 0
}
