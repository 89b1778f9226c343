//! RS256 session-token verification.
//!
//! Tokens are compact JWS strings (`header.payload.signature`, each part
//! base64url without padding). The signature is checked with `ring` against
//! the key named by the header's `kid`; issuer and audience are checked
//! against deployment configuration, never against values in the token.

use super::jwks::{Jwk, JwksCache, KeySetSource};
use super::{bearer_token, AuthRequest, Identity, IdentityVerifier};
use crate::clock::Clock;
use crate::config::{normalize_issuer, AuthConfig};
use crate::error::MonogramError;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::signature::{RsaPublicKeyComponents, RSA_PKCS1_2048_8192_SHA256};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(a) => a == expected,
            Audience::Many(all) => all.iter().any(|a| a == expected),
        }
    }
}

/// Claims read from a verified token.
#[derive(Debug, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default, alias = "image_url")]
    pub picture: Option<String>,
}

impl Claims {
    /// Display name: `name`, else given and family name joined.
    fn full_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_ref().filter(|n| !n.trim().is_empty()) {
            return Some(name.clone());
        }
        let parts: Vec<&str> = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// Verifies bearer tokens against the provider's published keys.
pub struct JwtVerifier<S> {
    issuer: String,
    audience: String,
    keys: JwksCache<S>,
    clock: Arc<dyn Clock>,
}

impl<S: KeySetSource> JwtVerifier<S> {
    pub fn new(config: &AuthConfig, source: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer: normalize_issuer(&config.issuer),
            audience: config.audience.clone(),
            keys: JwksCache::new(source, Arc::clone(&clock), config.jwks_ttl_secs),
            clock,
        }
    }

    pub fn key_cache(&self) -> &JwksCache<S> {
        &self.keys
    }

    /// Verify a compact token and return its claims.
    pub async fn verify(&self, token: &str) -> Result<Claims, MonogramError> {
        let invalid = || MonogramError::Auth("Invalid token".into());

        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let header: Header = decode_json(header_b64)
            .map_err(|_| MonogramError::Auth("Invalid JWT header".into()))?;
        if header.alg.as_deref() != Some("RS256") {
            return Err(invalid());
        }
        let kid = header
            .kid
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MonogramError::Auth("Missing key id in token header".into()))?;

        let key = self.keys.find_key(&kid).await?;
        let signature = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| invalid())?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        verify_signature(&key, signing_input.as_bytes(), &signature)?;

        let claims: Claims = decode_json(payload_b64).map_err(|_| invalid())?;
        self.check_claims(&claims)?;

        debug!("Verified token for subject {:?}", claims.sub);
        Ok(claims)
    }

    fn check_claims(&self, claims: &Claims) -> Result<(), MonogramError> {
        let now = self.clock.now().timestamp();

        if let Some(exp) = claims.exp {
            if now >= exp {
                return Err(MonogramError::Auth("Token expired".into()));
            }
        }
        if let Some(nbf) = claims.nbf {
            if now < nbf {
                return Err(MonogramError::Auth("Invalid token".into()));
            }
        }

        match claims.iss.as_deref() {
            Some(iss) if normalize_issuer(iss) == self.issuer => {}
            Some(_) => return Err(MonogramError::Auth("Invalid token issuer".into())),
            None => return Err(MonogramError::Auth("Missing required claims".into())),
        }

        if !claims.aud.as_ref().is_some_and(|aud| aud.contains(&self.audience)) {
            return Err(MonogramError::Auth("Invalid token audience".into()));
        }

        if claims.sub.as_deref().is_none_or(str::is_empty) {
            return Err(MonogramError::Auth("Missing required claims".into()));
        }

        Ok(())
    }
}

#[async_trait]
impl<S: KeySetSource> IdentityVerifier for JwtVerifier<S> {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, MonogramError> {
        let token = bearer_token(request.header("authorization"))?;
        let claims = match self.verify(token).await {
            Ok(claims) => claims,
            Err(e @ MonogramError::Auth(_)) => {
                debug!("Rejected token: {}", e);
                return Err(e);
            }
            Err(e) => {
                error!("Token verification failed: {}", e);
                return Err(e);
            }
        };
        let full_name = claims.full_name();
        Ok(Identity {
            user_id: claims.sub.unwrap_or_default(),
            email: claims.email,
            full_name,
            avatar_url: claims.picture,
        })
    }
}

fn decode_json<T: DeserializeOwned>(part: &str) -> Result<T, ()> {
    let bytes = URL_SAFE_NO_PAD.decode(part).map_err(|_| ())?;
    serde_json::from_slice(&bytes).map_err(|_| ())
}

fn verify_signature(key: &Jwk, message: &[u8], signature: &[u8]) -> Result<(), MonogramError> {
    let invalid = || MonogramError::Auth("Invalid token".into());

    if key.kty != "RSA" {
        return Err(invalid());
    }
    let (Some(n), Some(e)) = (key.n.as_deref(), key.e.as_deref()) else {
        return Err(invalid());
    };
    let n = URL_SAFE_NO_PAD.decode(n).map_err(|_| invalid())?;
    let e = URL_SAFE_NO_PAD.decode(e).map_err(|_| invalid())?;

    RsaPublicKeyComponents { n: &n, e: &e }
        .verify(&RSA_PKCS1_2048_8192_SHA256, message, signature)
        .map_err(|_| invalid())
}
