//! Authentication flows: registration, sign-in, password change, and
//! bearer-token verification.

use crate::error::{Error, Result};
use crate::jobs::{JobDispatcher, RegistrationJobParams};
use crate::models::{
    decode_token, encode_token, make_pw_gen_params, validate_email, PasswordChange, PwGenParams,
    PwHash, SigningKey, User, UserStore,
};
use serde::Deserialize;
use std::sync::Arc;

/// Request body for account registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterParams {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub pw_cost: i64,
    #[serde(default)]
    pub pw_nonce: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub api: String,
}

/// User-facing authentication operations over a [`UserStore`].
#[derive(Clone)]
pub struct AuthService {
    users: UserStore,
    signing_key: SigningKey,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl AuthService {
    pub fn new(users: UserStore, signing_key: SigningKey, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            users,
            signing_key,
            dispatcher,
        }
    }

    /// The key-derivation parameters a client needs before it can sign in.
    pub fn make_auth_params(&self, email: &str) -> Result<PwGenParams> {
        validate_email(email)?;
        let user = self.users.load_by_email(email).map_err(obscure_lookup)?;
        Ok(make_pw_gen_params(&user))
    }

    /// Create the account and sign the first token.
    pub fn register(&self, params: RegisterParams) -> Result<(User, String)> {
        let mut user = User::new();
        user.email = params.email;
        user.password = params.password;
        user.pw_cost = params.pw_cost;
        user.pw_nonce = params.pw_nonce;
        self.users.create(&mut user)?;

        let mut password = PwHash {
            value: user.password.clone(),
            hashed: true,
        };
        let (user, token) = self
            .login(&user.email, &mut password)
            .map_err(|e| Error::internal(format!("registration failed; {e}")))?;

        let job = RegistrationJobParams {
            email: user.email.clone(),
            created_at: user.created_at,
        };
        if let Err(e) = self.dispatcher.perform_registration_job(job) {
            tracing::error!(error = %e, "could not perform registration job");
        }

        Ok((user, token))
    }

    /// Sign the user in, returning a fresh bearer token.
    pub fn login(&self, email: &str, password: &mut PwHash) -> Result<(User, String)> {
        password.hash();
        let user = self
            .users
            .load_by_email_and_password(email, &password.value)
            .map_err(obscure_lookup)?;
        let token = encode_token(&self.signing_key, &user)?;
        Ok((user, token))
    }

    /// Composite password change: re-authenticate the current password,
    /// swap in the new block, and re-issue a token. Outstanding tokens die
    /// with the old password hash.
    pub fn change_password(&self, user: &mut User, change: PasswordChange) -> Result<String> {
        if change.current_password.is_empty() {
            return Err(Error::validation(
                "your current password is required to change your password, \
                 please update your application if you do not see this option",
            ));
        }
        if change.pw_nonce.is_empty() {
            return Err(Error::validation(
                "the change password request is missing new auth parameters, please try again",
            ));
        }

        let mut current = PwHash::new(change.current_password);
        if self.login(&user.email, &mut current).is_err() {
            return Err(Error::validation(
                "the current password you entered is incorrect, please try again",
            ));
        }

        let mut updates = user.make_safer_copy();
        let mut new_password = PwHash::new(change.new_password);
        updates.password = new_password.hash().to_string();
        updates.pw_nonce = change.pw_nonce;
        self.users.update(user, &updates)?;

        // The stored password was hashed before the update; don't rehash or
        // the re-login fails.
        let mut relogin = PwHash {
            value: user.password.clone(),
            hashed: true,
        };
        let (_, token) = self.login(&user.email, &mut relogin)?;
        Ok(token)
    }

    /// Replace the user's key-derivation parameter block. The stored
    /// password survives unless the request carries a new one.
    pub fn update_params(&self, user: &mut User, mut updates: User) -> Result<()> {
        if updates.password.is_empty() {
            updates.password = user.password.clone();
        }
        self.users.update(user, &updates)
    }

    /// Resolve an `Authorization` header to a user. The token must parse,
    /// verify, name a known user, and carry that user's current password
    /// hash; tokens outlive none of those.
    pub fn authenticate(&self, header: &str) -> Result<User> {
        let parts: Vec<&str> = header.split_whitespace().collect();
        if parts.len() != 2 || !parts[0].eq_ignore_ascii_case("bearer") {
            return Err(Error::auth("invalid authorization header"));
        }

        let claims = decode_token(&self.signing_key, parts[1])
            .map_err(|e| Error::auth(format!("invalid token: {e}")))?;

        let user = self.users.load_by_uuid(&claims.user_id).map_err(|e| {
            tracing::debug!(error = %e, "token named an unloadable user");
            Error::auth("unknown user")
        })?;

        if !user.validate_password_hash(&claims.pw_hash) {
            return Err(Error::auth("password does not match"));
        }
        Ok(user)
    }
}

// Lookup misses on auth paths must not leak which half was wrong, nor
// whether the account exists at all.
fn obscure_lookup(err: Error) -> Error {
    if err.is_not_found() {
        Error::auth("invalid email or password")
    } else {
        err
    }
}
