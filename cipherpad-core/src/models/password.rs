//! Client key-derivation parameters and password plumbing.

use crate::crypto;
use crate::error::{Error, Result};
use crate::models::User;
use serde::{Deserialize, Serialize};

// The backend never sees a plaintext password, only a client-side derived
// hash, so this floor is a sanity check rather than a strength policy.
const MIN_PASSWORD_LENGTH: usize = 24;

/// Reject passwords shorter than the client derivation could produce.
pub fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(Error::validation(format!(
            "password length must be >= {MIN_PASSWORD_LENGTH}"
        )));
    }
    Ok(())
}

/// Key-derivation parameters handed to a client so it can regenerate its
/// encryption and authentication keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwGenParams {
    pub pw_func: String,
    pub pw_alg: String,
    pub pw_cost: i64,
    pub pw_key_size: i64,
    pub pw_salt: String,
    pub pw_nonce: String,
    pub version: String,
    /// The account email.
    pub identifier: String,
}

// Accounts predating nonce storage get their salt derived from this fixed
// nonce; changing it would lock those clients out.
const FALLBACK_NONCE: &str = "a04a8fe6bcb19ba61c5c0873d391e987982fbbd4";

/// Assemble `PwGenParams` from User fields. Users carry different parameter
/// sets depending on which client version registered them: v1 users have the
/// pw_func block, v2 users need a derived salt, v3 users carry a nonce.
pub fn make_pw_gen_params(user: &User) -> PwGenParams {
    let mut params = PwGenParams::default();

    if user.email.is_empty() {
        return params;
    }

    params.version = "003".to_string();
    params.pw_cost = user.pw_cost;
    params.identifier = user.email.clone();

    if !user.pw_func.is_empty() {
        // v1 only
        params.pw_func = user.pw_func.clone();
        params.pw_alg = user.pw_alg.clone();
        params.pw_key_size = user.pw_key_size;
    }

    let mut pw_salt = user.pw_salt.clone();
    if pw_salt.is_empty() {
        // v2 only
        let nonce = if user.pw_nonce.is_empty() {
            FALLBACK_NONCE
        } else {
            &user.pw_nonce
        };
        pw_salt = crypto::salt(&user.email, nonce);
    }
    if !user.pw_nonce.is_empty() {
        // v3 only
        params.pw_nonce = user.pw_nonce.clone();
    }

    params.pw_salt = pw_salt;

    params
}

/// A password string that knows whether it has been through [`crypto::hash`]
/// already, so composite flows (register, sign in, change password) never
/// hash twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PwHash {
    pub value: String,
    pub hashed: bool,
}

impl PwHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            hashed: false,
        }
    }

    /// Hash the value in place, once.
    pub fn hash(&mut self) -> &str {
        if !self.hashed {
            self.value = crypto::hash(&self.value);
            self.hashed = true;
        }
        &self.value
    }
}

/// Request body for the composite password-change operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordChange {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub pw_nonce: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v3_user() -> User {
        let mut u = User::new();
        u.email = "v3@local.test".to_string();
        u.pw_func = String::new();
        u.pw_alg = String::new();
        u.pw_key_size = 0;
        u.pw_nonce = "nonce-v3".to_string();
        u
    }

    #[test]
    fn empty_email_yields_zero_params() {
        let user = User::new();
        assert_eq!(make_pw_gen_params(&user), PwGenParams::default());
    }

    #[test]
    fn v3_user_gets_nonce_and_derived_salt() {
        let user = v3_user();
        let params = make_pw_gen_params(&user);
        assert_eq!(params.version, "003");
        assert_eq!(params.identifier, user.email);
        assert_eq!(params.pw_nonce, "nonce-v3");
        assert_eq!(params.pw_salt, crypto::salt(&user.email, "nonce-v3"));
        assert!(params.pw_func.is_empty());
    }

    #[test]
    fn v1_user_keeps_kdf_block() {
        let mut user = v3_user();
        user.pw_func = "pbkdf2".to_string();
        user.pw_alg = "sha512".to_string();
        user.pw_key_size = 512;
        let params = make_pw_gen_params(&user);
        assert_eq!(params.pw_func, "pbkdf2");
        assert_eq!(params.pw_alg, "sha512");
        assert_eq!(params.pw_key_size, 512);
    }

    #[test]
    fn missing_nonce_falls_back_to_fixed_literal() {
        let mut user = v3_user();
        user.pw_nonce = String::new();
        let params = make_pw_gen_params(&user);
        assert_eq!(params.pw_salt, crypto::salt(&user.email, FALLBACK_NONCE));
        assert!(params.pw_nonce.is_empty());
    }

    #[test]
    fn stored_salt_wins_over_derivation() {
        let mut user = v3_user();
        user.pw_salt = "stored-salt".to_string();
        let params = make_pw_gen_params(&user);
        assert_eq!(params.pw_salt, "stored-salt");
    }

    #[test]
    fn pw_hash_never_hashes_twice() {
        let mut pw = PwHash::new("a-client-side-derived-secret");
        let once = pw.hash().to_string();
        let twice = pw.hash().to_string();
        assert_eq!(once, twice);
        assert_eq!(once, crypto::hash("a-client-side-derived-secret"));
    }

    #[test]
    fn short_passwords_rejected() {
        assert!(validate_password("short").is_err());
        assert!(validate_password(&"x".repeat(24)).is_ok());
    }
}
