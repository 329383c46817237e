//! Bearer-token verification
//!
//! Access tokens are Cognito-issued RS256 JWTs. Signing keys come from the user
//! pool's JWKS, fetched on first use and refetched when a token names an
//! unknown `kid`, at most once per `JWKS_REFETCH_INTERVAL`. The verified
//! identity is the `sub` claim.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::AuthConfig;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token verification is not configured")]
    NotConfigured,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    #[error("JWKS fetch failed: {0}")]
    Jwks(#[from] reqwest::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Resolves a bearer credential to a stable user identifier.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

/// Extract the credential from an `Authorization` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

/// Claims read from a Cognito access (or id) token.
#[derive(Debug, Deserialize)]
pub struct CognitoClaims {
    pub sub: String,
    pub iss: String,
    pub token_use: String,
    pub exp: u64,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Minimum spacing between two JWKS fetches. Unknown `kid`s seen inside the
/// window are rejected from the cache alone.
pub const JWKS_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    last_fetch: Option<Instant>,
}

enum KeySource {
    Jwks {
        client: reqwest::Client,
        url: String,
        cache: RwLock<JwksCache>,
        refetch_interval: Duration,
    },
    Static {
        key: DecodingKey,
    },
}

/// Verifies Cognito user-pool tokens.
pub struct CognitoVerifier {
    keys: KeySource,
    algorithm: Algorithm,
    issuer: String,
    client_id: String,
    token_use: String,
}

impl CognitoVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        if config.user_pool_id.is_empty() {
            return Err(AuthError::NotConfigured);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            keys: KeySource::Jwks {
                client,
                url: config.resolved_jwks_url(),
                cache: RwLock::new(JwksCache::default()),
                refetch_interval: JWKS_REFETCH_INTERVAL,
            },
            algorithm: Algorithm::RS256,
            issuer: config.issuer(),
            client_id: config.client_id.clone(),
            token_use: config.token_use.clone(),
        })
    }

    /// Verify against a single pre-shared key instead of a JWKS (local
    /// development and tests).
    pub fn with_static_key(config: &AuthConfig, key: DecodingKey, algorithm: Algorithm) -> Self {
        Self {
            keys: KeySource::Static { key },
            algorithm,
            issuer: config.issuer(),
            client_id: config.client_id.clone(),
            token_use: config.token_use.clone(),
        }
    }

    /// Override the minimum spacing between JWKS fetches.
    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        if let KeySource::Jwks {
            refetch_interval, ..
        } = &mut self.keys
        {
            *refetch_interval = interval;
        }
        self
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        match &self.keys {
            KeySource::Static { key } => Ok(key.clone()),
            KeySource::Jwks {
                client,
                url,
                cache,
                refetch_interval,
            } => {
                let kid = kid.ok_or_else(|| AuthError::InvalidToken("missing kid".to_string()))?;

                if let Some(key) = cache.read().await.keys.get(kid) {
                    return Ok(key.clone());
                }

                // Concurrent misses queue here; only one of them fetches.
                let mut cache = cache.write().await;
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(key.clone());
                }
                if let Some(last) = cache.last_fetch {
                    if last.elapsed() < *refetch_interval {
                        return Err(AuthError::UnknownKey(kid.to_string()));
                    }
                }
                // Stamped before fetching so failures are throttled too
                cache.last_fetch = Some(Instant::now());

                // Unknown kid: the pool may have rotated keys since the last fetch
                let jwks: JwkSet = client
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                tracing::debug!(keys = jwks.keys.len(), "Fetched JWKS");

                for jwk in &jwks.keys {
                    if let Some(id) = &jwk.common.key_id {
                        cache.keys.insert(id.clone(), DecodingKey::from_jwk(jwk)?);
                    }
                }
                cache
                    .keys
                    .get(kid)
                    .cloned()
                    .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
            }
        }
    }

    fn check_claims(&self, claims: &CognitoClaims) -> Result<(), AuthError> {
        if claims.token_use != self.token_use {
            return Err(AuthError::InvalidToken(format!(
                "unexpected token_use: {}",
                claims.token_use
            )));
        }
        if self.client_id.is_empty() {
            return Ok(());
        }
        // Access tokens carry `client_id`, id tokens carry `aud`
        let presented = claims.client_id.as_deref().or(claims.aud.as_deref());
        if presented != Some(self.client_id.as_str()) {
            return Err(AuthError::InvalidToken("client id mismatch".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for CognitoVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let header = decode_header(token)?;
        let key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.validate_aud = false;

        let data = decode::<CognitoClaims>(token, &key, &validation)?;
        self.check_claims(&data.claims)?;
        Ok(data.claims.sub)
    }
}

/// Used when no user pool is configured: every session is anonymous and
/// authenticated endpoints always answer 401.
#[derive(Debug, Default)]
pub struct DisabledVerifier;

#[async_trait]
impl TokenVerifier for DisabledVerifier {
    async fn verify(&self, _token: &str) -> Result<String, AuthError> {
        Err(AuthError::NotConfigured)
    }
}
