/// Account and session records
///
/// Users, provider links and refresh-token records are owned by the
/// repository; the session service re-reads them on every call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::fingerprint;

/// Login method backing a provider link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Email,
    Google,
    Apple,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Email => "email",
            AuthProvider::Google => "google",
            AuthProvider::Apple => "apple",
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(AuthProvider::Email),
            "google" => Ok(AuthProvider::Google),
            "apple" => Ok(AuthProvider::Apple),
            other => Err(format!("unknown auth provider: {}", other)),
        }
    }
}

/// Registered user.
///
/// `email` is unique across users; an empty email (Apple relay accounts that
/// never shared one) is exempt from uniqueness and never matched on lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, name: String, password_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Edge from a login method to a user; `(provider, provider_subject)` is unique
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthProviderLink {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: AuthProvider,
    pub provider_subject: String,
    pub created_at: DateTime<Utc>,
}

impl AuthProviderLink {
    pub fn new(user_id: Uuid, provider: AuthProvider, provider_subject: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            provider,
            provider_subject,
            created_at: Utc::now(),
        }
    }
}

/// Stored refresh credential.
///
/// Only the SHA-256 fingerprint of the secret is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(user_id: Uuid, secret: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash: fingerprint(secret),
            expires_at,
            revoked: false,
            created_at: Utc::now(),
        }
    }

    /// A record can mint a new session iff it is unrevoked and unexpired
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Credentials handed back after every successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token expiry, epoch seconds
    pub expires_at: i64,
}

/// Current user together with the login methods linked to it
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub providers: Vec<AuthProvider>,
}
