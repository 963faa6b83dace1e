/// Third-party identity verification
///
/// Validates Google and Apple ID tokens against the providers' published
/// signing keys and extracts the stable subject plus profile claims.

use async_trait::async_trait;

mod apple;
mod google;
mod jwks;

pub use apple::AppleVerifier;
pub use google::GoogleVerifier;
pub use jwks::KeySource;

use crate::configuration::SocialSettings;

/// Identity asserted by a provider after signature and claim checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
    /// May be empty for Apple repeat logins
    pub email: String,
    /// May be empty
    pub name: String,
    pub picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The token itself failed a check
    #[error("identity token rejected: {0}")]
    Rejected(String),
    /// Provider keys could not be fetched
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SocialVerifier: Send + Sync {
    async fn verify_google(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError>;
    async fn verify_apple(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

/// The production verifier: Google and Apple, nothing else
pub struct CompositeVerifier {
    google: GoogleVerifier,
    apple: AppleVerifier,
}

impl CompositeVerifier {
    pub fn new(google: GoogleVerifier, apple: AppleVerifier) -> Self {
        Self { google, apple }
    }

    pub fn from_settings(settings: &SocialSettings) -> Result<Self, IdentityError> {
        if settings.google_client_id.is_empty() {
            tracing::warn!("Google client id not configured; Google login is disabled");
        }
        if settings.apple_client_id.is_empty() {
            tracing::warn!("Apple client id not configured; Apple login is disabled");
        }

        Ok(Self::new(
            GoogleVerifier::from_settings(settings)?,
            AppleVerifier::from_settings(settings)?,
        ))
    }
}

#[async_trait]
impl SocialVerifier for CompositeVerifier {
    async fn verify_google(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        self.google.verify(id_token).await
    }

    async fn verify_apple(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        self.apple.verify(id_token).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};

    use super::KeySource;

    pub const TEST_KID: &str = "test-key-1";

    const PRIVATE_PEM: &[u8] = include_bytes!("../../tests/fixtures/id_token_signing.pem");
    const PUBLIC_PEM: &[u8] = include_bytes!("../../tests/fixtures/id_token_signing.pub.pem");

    pub fn sign(claims: &serde_json::Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_pem(PRIVATE_PEM).expect("valid private key fixture");
        encode(&header, claims, &key).expect("failed to sign test token")
    }

    pub fn static_keys() -> KeySource {
        let key = DecodingKey::from_rsa_pem(PUBLIC_PEM).expect("valid public key fixture");
        KeySource::with_static_key(TEST_KID, key)
    }
}
