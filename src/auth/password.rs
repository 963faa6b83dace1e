/// Password Hashing and Verification
///
/// Salted, adaptive bcrypt hashing. The salt and cost are embedded in the
/// stored hash, so no separate salt column exists.

use bcrypt::{hash, verify, DEFAULT_COST};

/// Failure inside bcrypt (RNG or cost parameter)
#[derive(Debug, thiserror::Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(#[from] bcrypt::BcryptError);

/// Bcrypt hasher with a fixed work factor
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a plaintext password
    ///
    /// # Errors
    /// Returns error if bcrypt rejects the cost or fails internally
    pub fn hash(&self, password: &str) -> Result<String, HashError> {
        Ok(hash(password, self.cost)?)
    }

    /// Check a plaintext password against a stored hash.
    ///
    /// A mismatch is `false`, and so is a stored hash bcrypt cannot parse.
    pub fn verify(&self, password: &str, password_hash: &str) -> bool {
        match verify(password, password_hash) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash could not be verified");
                false
            }
        }
    }
}
