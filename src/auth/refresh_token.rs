/// Refresh Secret Generation
///
/// Refresh tokens are opaque capabilities:
/// - 32 bytes from a cryptographically secure RNG, hex encoded (256 bits)
/// - No embedded claims, meaningful only through a repository lookup
/// - Stored as a SHA-256 fingerprint, never in plaintext

use rand::RngCore;
use sha2::{Digest, Sha256};

const SECRET_BYTES: usize = 32;

/// Generate a new refresh secret; this plaintext goes to the client only
pub fn generate_refresh_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 fingerprint (hex) under which a refresh secret is stored
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
