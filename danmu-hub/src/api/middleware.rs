//! Bearer token authentication for the control API.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::error::ApiError;
use crate::api::server::AppState;

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Reject requests without the configured token. A no-op when no token is set.
pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };
    match bearer_token(&request) {
        Some(token) if token == expected => next.run(request).await,
        Some(_) => {
            tracing::warn!("Invalid bearer token provided");
            ApiError::unauthorized("invalid token").into_response()
        }
        None => {
            tracing::warn!("Missing bearer token in request");
            ApiError::unauthorized("missing bearer token").into_response()
        }
    }
}
