//! Signing-key set retrieval and caching.
//!
//! The identity provider publishes its token-signing keys as a JSON Web Key
//! Set. [`JwksCache`] keeps the last fetched set for a fixed TTL, measured on
//! an injected [`Clock`], and can be invalidated explicitly when a token
//! names a key the cached set does not contain (the provider rotated keys).

use crate::clock::Clock;
use crate::error::MonogramError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// User-Agent sent with key-set requests.
pub const USER_AGENT: &str = "monogram-backend";

/// Minimum age of the cached set before an unknown `kid` may force a refetch.
pub const REFRESH_COOLDOWN_SECS: i64 = 30;

/// A single JSON Web Key. Only the RSA fields are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    /// Modulus, base64url without padding.
    #[serde(default)]
    pub n: Option<String>,
    /// Public exponent, base64url without padding.
    #[serde(default)]
    pub e: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// Where key sets come from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, MonogramError>;
}

/// Fetches the key set over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySetSource {
    pub fn new(url: impl Into<String>) -> Result<Self, MonogramError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MonogramError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<JwkSet, MonogramError> {
        info!("Fetching signing keys from {}", self.url);

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                MonogramError::IdentityProvider(format!("key set request to {} timed out", self.url))
            } else {
                MonogramError::IdentityProvider(format!("key set request failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(MonogramError::IdentityProvider(format!(
                "key set endpoint returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| MonogramError::IdentityProvider(format!("key set read failed: {e}")))?;

        serde_json::from_slice(&body)
            .map_err(|e| MonogramError::IdentityProvider(format!("key set is not valid JSON: {e}")))
    }
}

#[derive(Debug, Clone)]
struct Cached {
    keys: Arc<JwkSet>,
    fetched_at: DateTime<Utc>,
}

/// Time-boxed cache in front of a [`KeySetSource`].
pub struct JwksCache<S> {
    source: S,
    clock: Arc<dyn Clock>,
    ttl: ChronoDuration,
    refresh_cooldown: ChronoDuration,
    state: RwLock<Option<Cached>>,
}

impl<S: KeySetSource> JwksCache<S> {
    pub fn new(source: S, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            source,
            clock,
            ttl: ChronoDuration::seconds(ttl_secs as i64),
            refresh_cooldown: ChronoDuration::seconds(REFRESH_COOLDOWN_SECS),
            state: RwLock::new(None),
        }
    }

    /// The cached key set, fetching it when absent or older than the TTL.
    pub async fn keys(&self) -> Result<Arc<JwkSet>, MonogramError> {
        if let Some(keys) = self.fresh(&*self.state.read().await) {
            return Ok(keys);
        }

        let mut state = self.state.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(keys) = self.fresh(&state) {
            return Ok(keys);
        }
        self.fetch_into(&mut state).await
    }

    /// Fetch unconditionally, replacing whatever is cached.
    pub async fn refresh(&self) -> Result<Arc<JwkSet>, MonogramError> {
        let mut state = self.state.write().await;
        self.fetch_into(&mut state).await
    }

    /// Drop the cached set; the next lookup fetches again.
    pub async fn invalidate(&self) {
        *self.state.write().await = None;
    }

    /// Find the key with id `kid`.
    ///
    /// A miss against a cached set triggers one forced refresh before
    /// failing with "Unknown key id", unless the set was fetched less than
    /// [`REFRESH_COOLDOWN_SECS`] ago. Tokens with made-up key ids therefore
    /// cost at most one upstream fetch per cooldown window.
    pub async fn find_key(&self, kid: &str) -> Result<Jwk, MonogramError> {
        let keys = self.keys().await?;
        if let Some(key) = keys.find(kid) {
            return Ok(key.clone());
        }

        let keys = {
            let mut state = self.state.write().await;
            match self.recent(&state) {
                Some(keys) => {
                    debug!("Key id {} unknown; key set is too recent to refetch", kid);
                    keys
                }
                None => {
                    warn!("Key id {} not in cached key set; refreshing", kid);
                    self.fetch_into(&mut state).await?
                }
            }
        };
        keys.find(kid)
            .cloned()
            .ok_or_else(|| MonogramError::Auth("Unknown key id".into()))
    }

    /// The cached set when it is younger than the refresh cooldown.
    fn recent(&self, state: &Option<Cached>) -> Option<Arc<JwkSet>> {
        let cached = state.as_ref()?;
        (self.clock.now() - cached.fetched_at < self.refresh_cooldown)
            .then(|| Arc::clone(&cached.keys))
    }

    fn fresh(&self, state: &Option<Cached>) -> Option<Arc<JwkSet>> {
        let cached = state.as_ref()?;
        (self.clock.now() - cached.fetched_at < self.ttl).then(|| Arc::clone(&cached.keys))
    }

    async fn fetch_into(&self, state: &mut Option<Cached>) -> Result<Arc<JwkSet>, MonogramError> {
        let keys = Arc::new(self.source.fetch().await?);
        debug!("Cached {} signing keys", keys.keys.len());
        *state = Some(Cached {
            keys: Arc::clone(&keys),
            fetched_at: self.clock.now(),
        });
        Ok(keys)
    }
}
