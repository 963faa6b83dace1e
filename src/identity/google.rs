use serde::Deserialize;

use super::jwks::{decode_identity_token, KeySource};
use super::{IdentityError, VerifiedIdentity};
use crate::configuration::SocialSettings;

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

/// Verifies Google Sign-In ID tokens issued for our client id
pub struct GoogleVerifier {
    client_id: String,
    keys: KeySource,
}

impl GoogleVerifier {
    pub fn new(client_id: impl Into<String>, keys: KeySource) -> Self {
        Self {
            client_id: client_id.into(),
            keys,
        }
    }

    pub fn from_settings(settings: &SocialSettings) -> Result<Self, IdentityError> {
        let keys = KeySource::remote(GOOGLE_JWKS_URL, settings)?;
        Ok(Self::new(settings.google_client_id.clone(), keys))
    }

    pub async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let claims: GoogleIdTokenClaims =
            decode_identity_token(id_token, &self.keys, &GOOGLE_ISSUERS, &self.client_id).await?;

        if claims.sub.is_empty() {
            return Err(IdentityError::Rejected("missing subject".to_string()));
        }

        let email = claims
            .email
            .filter(|email| !email.is_empty())
            .ok_or_else(|| IdentityError::Rejected("missing email claim".to_string()))?;

        if claims.email_verified == Some(false) {
            return Err(IdentityError::Rejected(
                "email_verified claim is false".to_string(),
            ));
        }

        Ok(VerifiedIdentity {
            subject: claims.sub,
            email,
            name: claims.name.unwrap_or_default(),
            picture: claims.picture.filter(|p| !p.is_empty()),
        })
    }
}
