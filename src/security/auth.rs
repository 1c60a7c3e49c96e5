//! Bearer token verification.
//!
//! Two modes, chosen from config:
//! - JWKS: keys published by the identity provider (RS256 / ES256), cached for
//!   `jwks_cache_secs` and refetched on an unknown `kid`
//! - HS256: a shared secret, for self-hosted deployments

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::AuthConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("missing jwks url configuration")]
    MissingJwksConfig,
    #[error("jwt header missing kid")]
    MissingKid,
    #[error("unknown jwk key id {0}")]
    UnknownKey(String),
    #[error("unsupported jwt algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("jwt validation failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("jwks fetch failed: {0}")]
    JwksFetch(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token subject is empty")]
    EmptySubject,
    #[error("invalid service key")]
    InvalidServiceKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The user id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    pub exp: i64,
}

enum Verifier {
    Jwks {
        url: String,
        cache: RwLock<Option<JwksCache>>,
        client: reqwest::Client,
    },
    Shared(DecodingKey),
}

struct JwksCache {
    keys: HashMap<String, CachedDecodingKey>,
    fetched_at: Instant,
}

impl JwksCache {
    fn stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

#[derive(Clone)]
struct CachedDecodingKey {
    key: DecodingKey,
    algorithm: Algorithm,
}

#[derive(Clone)]
pub struct AuthContext {
    verifier: Arc<Verifier>,
    issuer: Option<String>,
    audience: Option<String>,
    cache_ttl: Duration,
}

impl AuthContext {
    /// Build from config. HS256 wins when both modes are configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let verifier = match (&config.hs256_secret, &config.jwks_url) {
            (Some(secret), _) => Verifier::Shared(DecodingKey::from_secret(secret.as_bytes())),
            (None, Some(url)) => Verifier::Jwks {
                url: url.clone(),
                cache: RwLock::new(None),
                client: reqwest::Client::new(),
            },
            (None, None) => return Err(AuthError::MissingJwksConfig),
        };
        Ok(Self {
            verifier: Arc::new(verifier),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            cache_ttl: config.jwks_cache_ttl(),
        })
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = match self.verifier.as_ref() {
            Verifier::Shared(key) => {
                decode::<Claims>(token, key, &self.validation(Algorithm::HS256))?.claims
            }
            Verifier::Jwks { .. } => {
                let header = decode_header(token)?;
                let kid = header.kid.ok_or(AuthError::MissingKid)?;
                let key = self.decoding_key(&kid).await?;
                let algorithm = select_algorithm(header.alg, key.algorithm)?;
                decode::<Claims>(token, &key.key, &self.validation(algorithm))?.claims
            }
        };

        if claims.sub.trim().is_empty() {
            return Err(AuthError::EmptySubject);
        }
        Ok(claims)
    }

    async fn decoding_key(&self, kid: &str) -> Result<CachedDecodingKey, AuthError> {
        let Verifier::Jwks { url, cache, client } = self.verifier.as_ref() else {
            return Err(AuthError::MissingJwksConfig);
        };

        {
            let cache = cache.read().await;
            if let Some(cache) = cache.as_ref() {
                if !cache.stale(self.cache_ttl) {
                    if let Some(key) = cache.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        let mut cache = cache.write().await;
        let needs_refresh = cache
            .as_ref()
            .map(|c| c.stale(self.cache_ttl) || !c.keys.contains_key(kid))
            .unwrap_or(true);
        if needs_refresh {
            tracing::debug!(kid = %kid, "Refreshing signing keys");
            *cache = Some(fetch_jwks(client, url).await?);
        }

        cache
            .as_ref()
            .and_then(|c| c.keys.get(kid).cloned())
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }
}

async fn fetch_jwks(client: &reqwest::Client, url: &str) -> Result<JwksCache, AuthError> {
    let resp = client.get(url).send().await?;
    let resp = resp.error_for_status().map_err(|err| {
        AuthError::JwksFetch(format!("status: {}", err.status().unwrap_or_default()))
    })?;
    let body: JwksResponse = resp.json().await?;

    let mut keys = HashMap::new();
    for Jwk {
        kid,
        kty,
        n,
        e,
        x,
        y,
        crv,
    } in body.keys
    {
        let cached = match kty.as_str() {
            "RSA" => {
                let (Some(n), Some(e)) = (n, e) else {
                    continue;
                };
                CachedDecodingKey {
                    key: DecodingKey::from_rsa_components(&n, &e)?,
                    algorithm: Algorithm::RS256,
                }
            }
            "EC" if crv.as_deref() == Some("P-256") => {
                let (Some(x), Some(y)) = (x, y) else {
                    continue;
                };
                CachedDecodingKey {
                    key: DecodingKey::from_ec_components(&x, &y)?,
                    algorithm: Algorithm::ES256,
                }
            }
            _ => continue,
        };
        keys.insert(kid, cached);
    }

    if keys.is_empty() {
        return Err(AuthError::JwksFetch("no usable keys returned".into()));
    }
    Ok(JwksCache {
        keys,
        fetched_at: Instant::now(),
    })
}

fn select_algorithm(header_alg: Algorithm, key_alg: Algorithm) -> Result<Algorithm, AuthError> {
    match header_alg {
        Algorithm::RS256 | Algorithm::ES256 if header_alg == key_alg => Ok(header_alg),
        Algorithm::RS256 | Algorithm::ES256 => Err(AuthError::UnsupportedAlgorithm(format!(
            "{header_alg:?} (expected {key_alg:?})"
        ))),
        other => Err(AuthError::UnsupportedAlgorithm(format!("{other:?}"))),
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
    y: Option<String>,
    crv: Option<String>,
}
