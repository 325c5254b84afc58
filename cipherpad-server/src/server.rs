//! Axum router setup.

use crate::auth::auth_middleware;
use crate::config::ServerConfig;
use crate::handlers::{auth, items};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use cipherpad_core::auth::AuthService;
use cipherpad_core::jobs::{HttpJobDispatcher, JobDispatcher};
use cipherpad_core::models::{ItemStore, SigningKey, UserStore};
use cipherpad_core::sync::SyncEngine;
use cipherpad_core::Db;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state: the stores, the auth flows, and the sync engine,
/// all over one database handle.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub engine: SyncEngine,
    pub items: ItemStore,
    pub registration_enabled: bool,
}

impl AppState {
    pub fn new(db: Db, signing_key: SigningKey, config: &ServerConfig) -> Self {
        let dispatcher: Arc<dyn JobDispatcher> = Arc::new(HttpJobDispatcher::new(db.clone()));
        let users = UserStore::new(db.clone());
        let items = ItemStore::new(db);

        Self {
            auth: AuthService::new(users, signing_key, dispatcher.clone()),
            engine: SyncEngine::new(items.clone(), dispatcher),
            items,
            registration_enabled: !config.no_registration,
        }
    }
}

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    // Authenticated routes
    let authenticated = Router::new()
        .route("/auth/change_pw", post(auth::change_password))
        .route("/auth/update", post(auth::update))
        .route("/items/sync", post(items::sync))
        .route("/items/backup", post(items::backup))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Unauthenticated routes
    let public = Router::new()
        .route("/", get(banner))
        .route("/auth", post(auth::register))
        .route("/auth/sign_in", post(auth::sign_in))
        .route("/auth/sign_in.json", post(auth::sign_in))
        .route("/auth/params", get(auth::params));

    let mut router = Router::new()
        .merge(authenticated)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_request_size));

    if config.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

async fn banner() -> String {
    format!("Cipherpad server {}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app(no_registration: bool) -> Router {
        let cfg = ServerConfig {
            debug: true,
            no_registration,
            ..ServerConfig::default()
        };
        let db = Db::open_in_memory().unwrap();
        let key = SigningKey::from_secret("router test secret".as_bytes().to_vec());
        build_router(AppState::new(db, key, &cfg), &cfg)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        };
        (status, value)
    }

    fn register_body() -> Value {
        json!({
            "email": "router@local.test",
            "password": "a-client-derived-hash-of-decent-length",
            "pw_cost": 110000,
            "pw_nonce": "router-nonce",
            "version": "003"
        })
    }

    #[tokio::test]
    async fn banner_names_the_server() {
        let app = test_app(false);
        let (status, body) = send(&app, "GET", "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().starts_with("Cipherpad server"));
    }

    #[tokio::test]
    async fn register_sign_in_and_sync() {
        let app = test_app(false);

        let (status, body) = send(&app, "POST", "/auth", None, Some(register_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        let token = body["token"].as_str().unwrap().to_string();
        assert!(body["user"]["password"].is_null());

        let (status, body) = send(
            &app,
            "POST",
            "/auth/sign_in",
            None,
            Some(json!({
                "email": "router@local.test",
                "password": "a-client-derived-hash-of-decent-length"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["token"].is_string());

        let item_uuid = "7b1a41dd-615a-42b8-a17f-7a1a611b9e40";
        let (status, body) = send(
            &app,
            "POST",
            "/items/sync",
            Some(&token),
            Some(json!({
                "items": [{
                    "uuid": item_uuid,
                    "content": "ciphertext",
                    "content_type": "Note",
                    "enc_item_key": "key"
                }],
                "compute_integrity": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["saved_items"][0]["uuid"], item_uuid);
        assert_eq!(body["conflicts"].as_array().unwrap().len(), 0);
        assert!(body["sync_token"].is_string());
        assert_eq!(body["integrity_hash"].as_str().unwrap().len(), 64);
        assert!(body.get("cursor_token").is_none());
    }

    #[tokio::test]
    async fn auth_params_follow_registration() {
        let app = test_app(false);
        send(&app, "POST", "/auth", None, Some(register_body())).await;

        let (status, body) = send(
            &app,
            "GET",
            "/auth/params?email=router@local.test",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], "003");
        assert_eq!(body["identifier"], "router@local.test");

        let (status, _) = send(&app, "GET", "/auth/params?email=ghost@local.test", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let app = test_app(false);
        let (status, body) = send(&app, "POST", "/items/sync", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"]["message"].is_string());

        let (status, _) = send(
            &app,
            "POST",
            "/items/sync",
            Some("not-a-real-token"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn password_change_rotates_tokens_over_http() {
        let app = test_app(false);
        let (_, body) = send(&app, "POST", "/auth", None, Some(register_body())).await;
        let old_token = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            "/auth/change_pw",
            Some(&old_token),
            Some(json!({
                "current_password": "a-client-derived-hash-of-decent-length",
                "new_password": "an-even-better-client-derived-hash",
                "pw_nonce": "rotated-nonce"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let new_token = body["token"].as_str().unwrap().to_string();

        let (status, _) = send(&app, "POST", "/items/sync", Some(&old_token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "POST", "/items/sync", Some(&new_token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn closed_deployments_refuse_registration() {
        let app = test_app(true);
        let (status, body) = send(&app, "POST", "/auth", None, Some(register_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "registration is disabled");
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let app = test_app(false);
        send(&app, "POST", "/auth", None, Some(register_body())).await;
        let (status, _) = send(&app, "POST", "/auth", None, Some(register_body())).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn wrong_credentials_answer_uniformly() {
        let app = test_app(false);
        send(&app, "POST", "/auth", None, Some(register_body())).await;

        let (status, body) = send(
            &app,
            "POST",
            "/auth/sign_in",
            None,
            Some(json!({
                "email": "router@local.test",
                "password": "definitely-not-the-right-client-hash"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "invalid email or password");
    }
}
