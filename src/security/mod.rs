/// Security module: password hashing and token generation.
pub mod password;
pub mod token;

pub use password::{hash_password, validate_password_strength, verify_password};
pub use token::{digest_matches, generate_series, generate_token, sha256_hex, TOKEN_LENGTH};
