/// Token Signer
///
/// Mints and verifies HS256 access tokens and mints refresh secrets. The
/// signing secret and TTLs come from `JwtSettings` injected at construction.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::auth::refresh_token::generate_refresh_secret;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenSigner {
    pub fn new(settings: &JwtSettings) -> Self {
        let secret = settings.secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: settings.issuer.clone(),
            access_ttl: Duration::seconds(settings.access_token_expiry),
            refresh_ttl: Duration::seconds(settings.refresh_token_expiry),
        }
    }

    /// Mint an access token for a user, returning the token and its expiry
    ///
    /// # Errors
    /// Returns error if token encoding fails
    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<(String, DateTime<Utc>), AppError> {
        self.issue_access_token_at(user_id, email, Utc::now())
    }

    /// Mint an access token as of `issued_at`.
    ///
    /// Identical claims, timestamp and secret yield an identical token.
    pub fn issue_access_token_at(
        &self,
        user_id: Uuid,
        email: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AppError> {
        let issued_at = Utc
            .timestamp_opt(issued_at.timestamp(), 0)
            .single()
            .ok_or_else(|| AppError::Internal("unrepresentable issue time".to_string()))?;
        let expires_at = issued_at + self.access_ttl;
        let claims = Claims::new(
            user_id,
            email,
            issued_at.timestamp(),
            expires_at.timestamp(),
            &self.issuer,
        );

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok((token, expires_at))
    }

    /// Verify signature, issuer and expiry of an access token.
    ///
    /// Every failure collapses into `InvalidToken`.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                AuthError::InvalidToken
            })
    }

    /// Mint a fresh refresh secret and its absolute expiry
    pub fn issue_refresh_secret(&self) -> (String, DateTime<Utc>) {
        (generate_refresh_secret(), Utc::now() + self.refresh_ttl)
    }
}
