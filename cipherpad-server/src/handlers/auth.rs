//! Registration, sign-in, and credential management handlers.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use cipherpad_core::auth::RegisterParams;
use cipherpad_core::models::{PasswordChange, PwHash, User};
use cipherpad_core::Error;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct SignInParams {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct ParamsQuery {
    #[serde(default)]
    pub email: String,
}

/// POST /auth
pub async fn register(
    State(state): State<AppState>,
    Json(params): Json<RegisterParams>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.registration_enabled {
        return Err(Error::auth("registration is disabled").into());
    }

    let (user, token) = state.auth.register(params)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "token": token, "user": user.make_safer_copy() })),
    ))
}

/// POST /auth/sign_in
pub async fn sign_in(
    State(state): State<AppState>,
    Json(params): Json<SignInParams>,
) -> Result<impl IntoResponse, ApiError> {
    let mut password = PwHash::new(params.password);
    let (user, token) = state
        .auth
        .login(&params.email, &mut password)
        .map_err(ApiError::auth_shaped)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "token": token, "user": user.make_safer_copy() })),
    ))
}

/// GET /auth/params?email=...
pub async fn params(
    State(state): State<AppState>,
    Query(query): Query<ParamsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let params = state
        .auth
        .make_auth_params(&query.email)
        .map_err(ApiError::auth_shaped)?;
    Ok(Json(params))
}

/// POST /auth/change_pw
pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(change): Json<PasswordChange>,
) -> Result<impl IntoResponse, ApiError> {
    let mut user = user;
    let token = state
        .auth
        .change_password(&mut user, change)
        .map_err(ApiError::auth_shaped)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "token": token, "user": user.make_safer_copy() })),
    ))
}

/// POST /auth/update
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(updates): Json<User>,
) -> Result<impl IntoResponse, ApiError> {
    let mut user = user;
    state.auth.update_params(&mut user, updates)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "user": user.make_safer_copy() })),
    ))
}
