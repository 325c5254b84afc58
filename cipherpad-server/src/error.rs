//! HTTP mapping for the core error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cipherpad_core::Error;

/// Core error adapted to an HTTP response. Capability tags pick the status;
/// internal messages are obfuscated and only logged server-side.
#[derive(Debug)]
pub struct ApiError(Error);

impl ApiError {
    /// Map lookup and validation failures on authentication paths to 401,
    /// keeping the message. Sign-in style endpoints answer every credential
    /// problem the same way.
    pub fn auth_shaped(err: Error) -> Self {
        if err.is_internal() {
            Self(err)
        } else {
            Self(Error::auth(err.to_string()))
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::Validation(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            Error::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Error::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            Error::Auth(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            Error::Internal(m) => {
                tracing::error!(error = %m, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": { "message": message, "code": status.as_u16() }
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_capability_tags() {
        let cases = [
            (Error::validation("v"), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::not_found("n"), StatusCode::NOT_FOUND),
            (Error::conflict("c"), StatusCode::CONFLICT),
            (Error::auth("a"), StatusCode::UNAUTHORIZED),
            (Error::internal("i"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[test]
    fn auth_shaped_downgrades_everything_but_internal() {
        let resp = ApiError::auth_shaped(Error::not_found("no row")).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = ApiError::auth_shaped(Error::validation("bad email")).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = ApiError::auth_shaped(Error::internal("db down")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
