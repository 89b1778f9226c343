//! Identity verification for incoming requests.
//!
//! The routing layer hands over the request method, URL and headers as an
//! [`AuthRequest`] and gets back a normalised [`Identity`]. Everything that
//! depends on the identity provider's token format stays behind the
//! [`IdentityVerifier`] trait; [`JwtVerifier`] is the RS256 implementation.

pub mod jwks;
pub mod token;

pub use jwks::{HttpKeySetSource, Jwk, JwkSet, JwksCache, KeySetSource};
pub use token::{Claims, JwtVerifier};

use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::error::MonogramError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// The parts of an HTTP request needed to authenticate it.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl AuthRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Authenticates a request or rejects it.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, MonogramError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, MonogramError> {
    let value = authorization
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MonogramError::Auth("Missing Authorization header".into()))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(MonogramError::Auth("Invalid Authorization header".into())),
    }
}

/// Verifier for a deployment: keys fetched over HTTPS, real clock.
pub fn jwt_verifier(config: &AuthConfig) -> Result<JwtVerifier<HttpKeySetSource>, MonogramError> {
    let source = HttpKeySetSource::new(&config.jwks_url)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Ok(JwtVerifier::new(config, source, clock))
}
