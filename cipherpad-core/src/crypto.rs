//! Hashing primitives shared by authentication and sync.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of the input. Stored passwords are the hash
/// of the client-supplied password hash; the plaintext never reaches us.
pub fn hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Derive the per-user password salt from email and nonce.
///
/// SHA-1 survives here only for wire compatibility with deployed clients;
/// it is not used anywhere else.
pub fn salt(email: &str, nonce: &str) -> String {
    hex::encode(Sha1::digest(format!("{email}SN{nonce}").as_bytes()))
}
