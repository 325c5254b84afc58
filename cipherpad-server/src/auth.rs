//! Bearer-token auth middleware.

use crate::error::ApiError;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;

/// Resolve the `Authorization` header to a [`cipherpad_core::models::User`]
/// and stash it in request extensions for the handler.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let user = state.auth.authenticate(&header)?;
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
