//! Data models and their persistent stores.

pub mod item;
pub mod password;
pub mod token;
pub mod user;

pub use item::{compute_hash_digest, Item, ItemStore, EXTENSION_CONTENT_TYPE};
pub use password::{make_pw_gen_params, validate_password, PasswordChange, PwGenParams, PwHash};
pub use token::{decode_token, encode_token, Claims, SigningKey};
pub use user::{User, UserStore};

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};

// The shortest externally-facing email is `a@b.cd`. Intranet addresses like
// x@y would be 3, but nobody has asked for those.
const MIN_EMAIL_LENGTH: usize = 6;
const MAX_EMAIL_LENGTH: usize = 255;

/// Lower length limit for a stringified v4 UUID,
/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
pub const MIN_ID_LENGTH: usize = 36;

/// Validate an email address: bounded length and `.+@.+`.
pub fn validate_email(email: &str) -> Result<()> {
    if email.len() < MIN_EMAIL_LENGTH {
        return Err(Error::validation(format!(
            "email invalid, length must be >= {MIN_EMAIL_LENGTH}"
        )));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(Error::validation(format!(
            "email invalid, length must be <= {MAX_EMAIL_LENGTH}"
        )));
    }
    match email.find('@') {
        Some(at) if at > 0 && at + 1 < email.len() => Ok(()),
        _ => Err(Error::validation("email invalid")),
    }
}

pub(crate) fn datetime_to_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(0)
}

pub(crate) fn datetime_from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// Serde helper rendering timestamps as `YYYY-MM-DDTHH:MM:SS.sssZ`, the
/// form the clients parse.
pub(crate) mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Default timestamp for incoming payloads that omit one.
pub(crate) fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(0)
}
