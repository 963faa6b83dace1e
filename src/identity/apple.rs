use serde::Deserialize;

use super::jwks::{decode_identity_token, KeySource};
use super::{IdentityError, VerifiedIdentity};
use crate::configuration::SocialSettings;

const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Apple sends `email` only on the first authorization and never a name
#[derive(Debug, Deserialize)]
struct AppleIdTokenClaims {
    sub: String,
    email: Option<String>,
}

pub struct AppleVerifier {
    client_id: String,
    keys: KeySource,
}

impl AppleVerifier {
    pub fn new(client_id: impl Into<String>, keys: KeySource) -> Self {
        Self {
            client_id: client_id.into(),
            keys,
        }
    }

    pub fn from_settings(settings: &SocialSettings) -> Result<Self, IdentityError> {
        let keys = KeySource::remote(APPLE_JWKS_URL, settings)?;
        Ok(Self::new(settings.apple_client_id.clone(), keys))
    }

    pub async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let claims: AppleIdTokenClaims =
            decode_identity_token(id_token, &self.keys, &[APPLE_ISSUER], &self.client_id).await?;

        if claims.sub.is_empty() {
            return Err(IdentityError::Rejected("missing subject".to_string()));
        }

        Ok(VerifiedIdentity {
            subject: claims.sub,
            email: claims.email.unwrap_or_default(),
            name: String::new(),
            picture: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_support::{sign, static_keys, TEST_KID};
    use serde_json::{json, Value};

    const CLIENT_ID: &str = "com.example.app";

    fn verifier() -> AppleVerifier {
        AppleVerifier::new(CLIENT_ID, static_keys())
    }

    fn base_claims() -> Value {
        let now = chrono::Utc::now().timestamp();
        json!({
            "iss": APPLE_ISSUER,
            "aud": CLIENT_ID,
            "sub": "001234.abcd",
            "email": "relay@privaterelay.appleid.com",
            "iat": now,
            "exp": now + 600,
        })
    }

    #[tokio::test]
    async fn first_login_carries_email() {
        let identity = verifier()
            .verify(&sign(&base_claims(), TEST_KID))
            .await
            .expect("token should verify");

        assert_eq!(identity.subject, "001234.abcd");
        assert_eq!(identity.email, "relay@privaterelay.appleid.com");
        assert!(identity.name.is_empty());
    }

    #[tokio::test]
    async fn repeat_login_without_email_is_accepted() {
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("email");

        let identity = verifier().verify(&sign(&claims, TEST_KID)).await.unwrap();
        assert_eq!(identity.subject, "001234.abcd");
        assert!(identity.email.is_empty());
    }

    #[tokio::test]
    async fn empty_subject_is_rejected() {
        let mut claims = base_claims();
        claims["sub"] = json!("");

        let result = verifier().verify(&sign(&claims, TEST_KID)).await;
        assert!(matches!(result, Err(IdentityError::Rejected(_))));
    }

    #[tokio::test]
    async fn wrong_issuer_is_rejected() {
        let mut claims = base_claims();
        claims["iss"] = json!("https://accounts.google.com");

        let result = verifier().verify(&sign(&claims, TEST_KID)).await;
        assert!(matches!(result, Err(IdentityError::Rejected(_))));
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let mut claims = base_claims();
        claims["aud"] = json!("com.example.other");

        let result = verifier().verify(&sign(&claims, TEST_KID)).await;
        assert!(matches!(result, Err(IdentityError::Rejected(_))));
    }
}
