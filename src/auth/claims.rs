/// Access Token Claims
///
/// Payload of the signed access token: subject, email and the standard
/// RFC 7519 time and issuer claims.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// User email
    pub email: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn new(user_id: Uuid, email: &str, issued_at: i64, expires_at: i64, issuer: &str) -> Self {
        Self {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: issued_at,
            exp: expires_at,
            iss: issuer.to_string(),
        }
    }

    /// Extract user ID from claims
    ///
    /// # Errors
    /// Returns `InvalidToken` if the subject is not a UUID
    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_creation() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new(user_id, "test@example.com", 100, 1000, "test");

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(claims.user_id(), Ok(user_id));
    }

    #[test]
    fn test_invalid_user_id() {
        let mut claims = Claims::new(Uuid::new_v4(), "test@example.com", 0, 1, "test");
        claims.sub = "invalid-uuid".to_string();

        assert_eq!(claims.user_id(), Err(AuthError::InvalidToken));
    }
}
