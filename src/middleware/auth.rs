use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::AuthMode;
use crate::server::AppState;

/// Bearer-token auth for the Data-Entry write surface (SPEC_FULL §H).
/// Checked against the single `global.auth.keys` list; no-op when
/// `global.auth.mode` is `none`.
pub async fn data_entry_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let config = state.config.read().unwrap();
    if config.global.auth.mode == AuthMode::None {
        drop(config);
        return next.run(req).await;
    }

    let (api_key, source) = extract_api_key_with_source(req.headers());
    let keys = config.global.auth.keys.clone().unwrap_or_default();
    drop(config);

    let authorized = api_key.as_deref().map(|k| keys.iter().any(|allowed| allowed == k)).unwrap_or(false);

    if !authorized {
        tracing::warn!(source = %source.unwrap_or_else(|| "none".to_string()), "data-entry auth rejected");
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"type":"about:blank","title":"Unauthorized","status":401,"detail":"missing or invalid bearer token"}"#))
            .unwrap();
    }

    next.run(req).await
}

fn extract_api_key_with_source(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    if let Some(auth_val) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(stripped) = auth_val.strip_prefix("Bearer ") {
            return (Some(stripped.to_string()), Some("Authorization (Bearer)".to_string()));
        }
        return (Some(auth_val.to_string()), Some("Authorization".to_string()));
    }
    if let Some(key_val) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return (Some(key_val.to_string()), Some("x-api-key".to_string()));
    }
    (None, None)
}
