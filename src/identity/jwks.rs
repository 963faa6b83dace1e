/// Provider signing keys
///
/// Caches a provider's JWKS by `kid` for the `max-age` it advertises.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use super::IdentityError;
use crate::configuration::SocialSettings;

const CLOCK_SKEW_SECS: u64 = 60;

/// Minimum spacing between refetches triggered by an unknown `kid`
const FORCED_REFRESH_COOLDOWN: Duration = Duration::from_secs(60);

enum KeyMode {
    Remote {
        http_client: reqwest::Client,
        jwks_url: String,
        fallback_ttl: Duration,
    },
    Static {
        kid: String,
        decoding_key: Arc<DecodingKey>,
    },
}

struct JwksCacheEntry {
    keys_by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Resolves RSA verification keys for one identity provider.
///
/// Remote sources fetch the provider's JWKS, cache it for the `max-age` the
/// provider advertises (or the configured fallback) and refetch once when a
/// token names an unknown `kid`, at most once per cooldown window. Concurrent
/// refreshes are serialized.
pub struct KeySource {
    mode: KeyMode,
    cache: RwLock<Option<JwksCacheEntry>>,
    // Held for the duration of a refresh; stores when the last forced one ran
    last_forced_refresh: Mutex<Option<Instant>>,
}

impl KeySource {
    pub fn remote(jwks_url: &str, settings: &SocialSettings) -> Result<Self, IdentityError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_seconds))
            .build()
            .map_err(|e| {
                IdentityError::Unavailable(format!("failed building JWKS client: {}", e))
            })?;

        Ok(Self::with_mode(KeyMode::Remote {
            http_client,
            jwks_url: jwks_url.to_string(),
            fallback_ttl: Duration::from_secs(settings.jwks_cache_ttl_seconds),
        }))
    }

    /// A single fixed key, for deterministic local runs and tests
    pub fn with_static_key(kid: impl Into<String>, decoding_key: DecodingKey) -> Self {
        Self::with_mode(KeyMode::Static {
            kid: kid.into(),
            decoding_key: Arc::new(decoding_key),
        })
    }

    fn with_mode(mode: KeyMode) -> Self {
        Self {
            mode,
            cache: RwLock::new(None),
            last_forced_refresh: Mutex::new(None),
        }
    }

    pub async fn decoding_key(&self, kid: &str) -> Result<Arc<DecodingKey>, IdentityError> {
        let (http_client, jwks_url, fallback_ttl) = match &self.mode {
            KeyMode::Static {
                kid: static_kid,
                decoding_key,
            } => {
                if kid == static_kid {
                    return Ok(decoding_key.clone());
                }
                return Err(IdentityError::Rejected(format!(
                    "unknown signing key: {}",
                    kid
                )));
            }
            KeyMode::Remote {
                http_client,
                jwks_url,
                fallback_ttl,
            } => (http_client, jwks_url, *fallback_ttl),
        };

        if let Some(key) = self.cached_key(kid, true).await {
            return Ok(key);
        }

        let fetched = self
            .refresh(http_client, jwks_url, fallback_ttl, false)
            .await?;
        if let Some(key) = self.cached_key(kid, false).await {
            return Ok(key);
        }

        // The key set may have rotated since it was cached
        if !fetched {
            self.refresh(http_client, jwks_url, fallback_ttl, true)
                .await?;
            if let Some(key) = self.cached_key(kid, false).await {
                return Ok(key);
            }
        }

        Err(IdentityError::Rejected(format!(
            "signing key not found: {}",
            kid
        )))
    }

    async fn cached_key(&self, kid: &str, require_fresh: bool) -> Option<Arc<DecodingKey>> {
        let cache = self.cache.read().await;
        let now = Instant::now();
        cache
            .as_ref()
            .filter(|entry| !require_fresh || entry.expires_at > now)
            .and_then(|entry| entry.keys_by_kid.get(kid))
            .cloned()
    }

    /// Fetch the JWKS into the cache, returning whether a fetch happened.
    ///
    /// A plain refresh is skipped while the cache is fresh. A forced refresh
    /// is skipped inside `FORCED_REFRESH_COOLDOWN` of the previous one.
    async fn refresh(
        &self,
        http_client: &reqwest::Client,
        jwks_url: &str,
        fallback_ttl: Duration,
        force_refresh: bool,
    ) -> Result<bool, IdentityError> {
        let mut last_forced = self.last_forced_refresh.lock().await;
        let now = Instant::now();

        if force_refresh {
            if last_forced.map_or(false, |at| now.duration_since(at) < FORCED_REFRESH_COOLDOWN) {
                tracing::debug!(jwks_url = %jwks_url, "Skipping forced JWKS refresh during cooldown");
                return Ok(false);
            }
            *last_forced = Some(now);
        } else {
            // Another caller may have refreshed while we waited on the lock
            let cache = self.cache.read().await;
            if cache.as_ref().map_or(false, |entry| entry.expires_at > now) {
                return Ok(false);
            }
        }

        tracing::debug!(jwks_url = %jwks_url, force_refresh, "Refreshing JWKS cache");

        let response = http_client
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("JWKS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IdentityError::Unavailable(format!(
                "JWKS request returned status {}",
                response.status()
            )));
        }

        let ttl = cache_ttl_from_headers(response.headers(), fallback_ttl);

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("invalid JWKS JSON: {}", e)))?;

        let keys_by_kid = usable_keys(jwks);
        if keys_by_kid.is_empty() {
            return Err(IdentityError::Unavailable(
                "JWKS response did not include any usable RSA keys".to_string(),
            ));
        }

        *self.cache.write().await = Some(JwksCacheEntry {
            keys_by_kid,
            expires_at: Instant::now() + ttl,
        });

        tracing::debug!(ttl_secs = ttl.as_secs(), "JWKS cache refreshed");
        Ok(true)
    }
}

/// Verify an RS256 identity token against `keys` and decode its claims.
///
/// An empty `audience` means the provider is not configured; every token is
/// rejected.
pub(crate) async fn decode_identity_token<T: DeserializeOwned>(
    id_token: &str,
    keys: &KeySource,
    issuers: &[&str],
    audience: &str,
) -> Result<T, IdentityError> {
    if audience.is_empty() {
        return Err(IdentityError::Rejected(
            "provider client id not configured".to_string(),
        ));
    }

    let header = decode_header(id_token)
        .map_err(|e| IdentityError::Rejected(format!("invalid JWT header: {}", e)))?;

    if header.alg != Algorithm::RS256 {
        return Err(IdentityError::Rejected(format!(
            "unexpected JWT alg: {:?}",
            header.alg
        )));
    }

    let kid = header
        .kid
        .ok_or_else(|| IdentityError::Rejected("missing JWT kid".to_string()))?;

    let decoding_key = keys.decoding_key(&kid).await?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    validation.set_issuer(issuers);
    validation.set_audience(&[audience]);
    validation.leeway = CLOCK_SKEW_SECS;

    decode::<T>(id_token, decoding_key.as_ref(), &validation)
        .map(|data| data.claims)
        .map_err(|e| IdentityError::Rejected(format!("JWT validation failed: {}", e)))
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
    #[serde(rename = "use")]
    use_: Option<String>,
}

fn usable_keys(jwks: Jwks) -> HashMap<String, Arc<DecodingKey>> {
    let mut keys_by_kid = HashMap::new();

    for jwk in jwks.keys {
        if jwk.kty != "RSA" || jwk.kid.trim().is_empty() {
            continue;
        }
        if jwk.alg.as_deref().map_or(false, |alg| alg != "RS256") {
            continue;
        }
        if jwk.use_.as_deref().map_or(false, |use_| use_ != "sig") {
            continue;
        }

        match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(key) => {
                keys_by_kid.insert(jwk.kid, Arc::new(key));
            }
            Err(e) => {
                tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA JWKS key");
            }
        }
    }

    keys_by_kid
}

fn cache_ttl_from_headers(headers: &reqwest::header::HeaderMap, fallback: Duration) -> Duration {
    headers
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_cache_control_max_age)
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

fn parse_cache_control_max_age(value: &str) -> Option<u64> {
    value.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|raw| raw.trim_matches('"').parse::<u64>().ok())
    })
}
