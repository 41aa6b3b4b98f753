/// Random token generation and digest handling.
///
/// Raw tokens exist only transiently: the caller receives them once and
/// only the SHA-256 digest is ever persisted.
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of verification and refresh token secrets.
pub const TOKEN_LENGTH: usize = 32;

/// Generate a random alphanumeric token of `len` characters.
pub fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate an opaque series identifier for a refresh token chain.
pub fn generate_series() -> String {
    Uuid::new_v4().simple().to_string()
}

/// SHA-256 digest, hex encoded.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented raw token against a stored digest.
///
/// The presented value is hashed first, so the comparison never runs on
/// attacker-controlled length differences of the secret itself.
pub fn digest_matches(presented: &str, stored_hash: &str) -> bool {
    let presented_hash = sha256_hex(presented);
    // Hex digests have equal length; fold keeps the comparison
    // independent of the position of the first mismatch.
    presented_hash.len() == stored_hash.len()
        && presented_hash
            .bytes()
            .zip(stored_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
