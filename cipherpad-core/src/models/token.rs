//! HMAC-signed bearer tokens binding a user to its password hash.

use crate::error::{Error, Result};
use crate::models::User;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

// Ships so the service starts in development. Production deployments must
// override SECRET_KEY_BASE; the server refuses to boot on this literal
// outside debug mode.
const DEVELOPMENT_KEY: &str = "qA6irmDikU6RkCM4V0cJiUJEROuCsqTa1esexI4aWedSv405v8lw4g1KB1nQVsSdCrcyRlKFdws4XPlsArWwv9y5Xr5Jtkb11w1NxKZabOUa7mxjeENuCs31Y1Ce49XH9kGMPe0ms7iV7e9F6WgnsPFGOlIA3CwfGyr12okas2EsDd71SbSnA0zJYjyxeCVCZJWISmLB";

/// Process-wide token signing secret, loaded once at startup.
#[derive(Clone)]
pub struct SigningKey {
    secret: Vec<u8>,
    development_fallback: bool,
}

impl SigningKey {
    /// Read `SECRET_KEY_BASE`, falling back to the built-in development key
    /// when it is unset, empty, or equal to the development literal.
    pub fn from_env() -> Self {
        match std::env::var("SECRET_KEY_BASE") {
            Ok(key) if !key.is_empty() && key != DEVELOPMENT_KEY => Self {
                secret: key.into_bytes(),
                development_fallback: false,
            },
            _ => Self {
                secret: DEVELOPMENT_KEY.as_bytes().to_vec(),
                development_fallback: true,
            },
        }
    }

    pub fn from_secret(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            development_fallback: false,
        }
    }

    pub fn is_development_fallback(&self) -> bool {
        self.development_fallback
    }
}

/// The token payload: which user, and the password hash it was issued
/// against. A password change makes outstanding tokens stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub pw_hash: String,
    pub iat: i64,
}

/// Sign a bearer token for the user.
pub fn encode_token(key: &SigningKey, user: &User) -> Result<String> {
    let claims = Claims {
        user_id: user.uuid.clone(),
        pw_hash: user.password.clone(),
        iat: Utc::now().timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&key.secret),
    )
    .map_err(|e| Error::internal(format!("could not sign token: {e}")))
}

/// Parse and verify a bearer token. Only HMAC-SHA256 is accepted; tokens
/// carry no expiry, they are invalidated by password change instead.
pub fn decode_token(key: &SigningKey, token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.set_required_spec_claims::<&str>(&[]);

    decode::<Claims>(token, &DecodingKey::from_secret(&key.secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => Error::auth("invalid token signature"),
            _ => Error::validation(format!("invalid token: {e}")),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let mut u = User::new();
        u.uuid = "4f2af612-6577-4cf2-a7d7-50b463f46f80".to_string();
        u.password = crate::crypto::hash("a-hashed-password");
        u
    }

    fn key() -> SigningKey {
        SigningKey::from_secret("a test signing secret".as_bytes().to_vec())
    }

    #[test]
    fn roundtrip_preserves_claims() {
        let user = sample_user();
        let token = encode_token(&key(), &user).unwrap();
        let claims = decode_token(&key(), &token).unwrap();
        assert_eq!(claims.user_id, user.uuid);
        assert_eq!(claims.pw_hash, user.password);
        assert!(claims.iat > 0);
    }

    #[test]
    fn wrong_key_is_an_auth_error() {
        let token = encode_token(&key(), &sample_user()).unwrap();
        let other = SigningKey::from_secret("a different secret".as_bytes().to_vec());
        let err = decode_token(&other, &token).unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn garbage_is_a_validation_error() {
        let err = decode_token(&key(), "not.a.jwt").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn non_hmac_algorithm_is_rejected() {
        // HS384 parses as a JWT but fails the HS256-only validation.
        let claims = Claims {
            user_id: "u".to_string(),
            pw_hash: "p".to_string(),
            iat: 0,
        };
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"a test signing secret"),
        )
        .unwrap();
        assert!(decode_token(&key(), &token).is_err());
    }
}
