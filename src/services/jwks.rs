//! Signing key resolution from a remote JSON Web Key Set.
//!
//! Key sets are fetched over HTTP(S) and the raw `keys` array is cached in a
//! [`KeyCache`] under the key-set URL. Every lookup re-imports the cached
//! descriptors, so a rotated key set is picked up once the cache entry
//! expires.

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::services::key_cache::KeyCache;

/// Default lifetime of a cached key set.
pub const DEFAULT_KEY_SET_TTL: Duration = Duration::from_secs(180);

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A key descriptor exactly as published in the key set.
///
/// Unrecognised members are kept in `extra` so the cached copy matches the
/// published document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawJwk {
    #[serde(default)]
    pub kty: String,

    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Private exponent / scalar. Its presence means this is not a public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct KeySetDocument {
    #[serde(default)]
    keys: Vec<RawJwk>,
}

/// A public key ready for signature verification.
#[derive(Clone)]
pub struct SigningKey {
    kid: Option<String>,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

impl SigningKey {
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Resolves signing keys from remote key sets, using a cache to avoid
/// refetching on every request.
pub struct SigningKeyResolver {
    http: reqwest::Client,
    cache: Arc<dyn KeyCache>,
    cache_ttl: Duration,
}

impl SigningKeyResolver {
    pub fn new(cache: Arc<dyn KeyCache>, cache_ttl: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build JWKS HTTP client, using defaults");
                reqwest::Client::new()
            });

        Self {
            http,
            cache,
            cache_ttl,
        }
    }

    /// Return the raw key descriptors published at `uri`, from cache when possible.
    #[instrument(skip(self))]
    pub async fn get_keys(&self, uri: &str) -> Result<Vec<RawJwk>, JwksError> {
        match self.cache.get(uri).await {
            Ok(Some(cached)) => match serde_json::from_str::<Vec<RawJwk>>(&cached) {
                Ok(keys) => {
                    metrics::counter!("jwks_cache_hits_total").increment(1);
                    tracing::debug!(key_count = keys.len(), "Key set retrieved from cache");
                    return Ok(keys);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable cached key set");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Key cache read failed, fetching key set");
            }
        }

        metrics::counter!("jwks_cache_misses_total").increment(1);
        let keys = self.fetch_keys(uri).await?;

        match serde_json::to_string(&keys) {
            Ok(payload) => {
                if let Err(e) = self.cache.set(uri, &payload, self.cache_ttl).await {
                    tracing::warn!(error = %e, "Failed to cache key set");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize key set for caching"),
        }

        Ok(keys)
    }

    async fn fetch_keys(&self, uri: &str) -> Result<Vec<RawJwk>, JwksError> {
        tracing::debug!("Fetching key set from remote endpoint");

        let response = self.http.get(uri).send().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to fetch key set");
            JwksError::KeySetFetch(e.to_string())
        })?;

        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "Key set endpoint returned error");
            return Err(JwksError::KeySetFetch(format!(
                "endpoint returned HTTP {}",
                response.status()
            )));
        }

        let document: KeySetDocument = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse key set document");
            JwksError::KeySetFetch(e.to_string())
        })?;

        tracing::info!(key_count = document.keys.len(), "Key set fetched");
        Ok(document.keys)
    }

    /// Return every usable public signing key published at `uri`.
    pub async fn get_signing_keys(&self, uri: &str) -> Result<Vec<SigningKey>, JwksError> {
        let keys = self.get_keys(uri).await?;
        if keys.is_empty() {
            return Err(JwksError::KeySet(
                "the key set endpoint did not contain any keys".to_string(),
            ));
        }

        let signing_keys = select_signing_keys(keys);
        if signing_keys.is_empty() {
            return Err(JwksError::KeySet(
                "the key set endpoint did not contain any signing keys".to_string(),
            ));
        }

        Ok(signing_keys)
    }

    /// Pick the signing key identified by `kid`.
    ///
    /// Without a `kid` this only succeeds when the set holds exactly one key.
    #[instrument(skip(self))]
    pub async fn get_signing_key(
        &self,
        uri: &str,
        kid: Option<&str>,
    ) -> Result<SigningKey, JwksError> {
        let keys = self.get_signing_keys(uri).await?;
        pick_key(keys, kid)
    }
}

fn pick_key(keys: Vec<SigningKey>, kid: Option<&str>) -> Result<SigningKey, JwksError> {
    match kid {
        None if keys.len() > 1 => Err(JwksError::KeyNotFound(
            "no kid specified and the key set holds more than one key".to_string(),
        )),
        None => keys
            .into_iter()
            .next()
            .ok_or_else(|| JwksError::KeyNotFound("key set is empty".to_string())),
        Some(kid) => keys
            .into_iter()
            .find(|key| key.kid() == Some(kid))
            .ok_or_else(|| {
                tracing::debug!(kid = %kid, "No signing key matches kid");
                JwksError::KeyNotFound(format!("unable to find a signing key that matches '{kid}'"))
            }),
    }
}

/// Filter raw descriptors down to importable public signing keys.
///
/// Entries that cannot be used are logged and skipped; they never fail the set.
pub fn select_signing_keys(keys: Vec<RawJwk>) -> Vec<SigningKey> {
    keys.into_iter()
        .filter(|jwk| matches!(jwk.key_use.as_deref(), None | Some("sig")))
        .filter(|jwk| matches!(jwk.kty.as_str(), "RSA" | "EC" | "OKP"))
        .filter_map(|jwk| {
            let imported = resolve_algorithm(&jwk).and_then(|alg| import_key(&jwk, alg));
            match imported {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::error!(kid = ?jwk.kid, kty = %jwk.kty, error = %e, "Error importing JWK");
                    None
                }
            }
        })
        .collect()
}

/// Algorithm name for a key: explicit `alg`, otherwise derived from key type and curve.
pub fn resolve_algorithm(jwk: &RawJwk) -> Result<&str, JwksError> {
    if let Some(alg) = jwk.alg.as_deref() {
        return Ok(alg);
    }

    let derived = match (jwk.kty.as_str(), jwk.crv.as_deref()) {
        ("RSA", _) => "RS256",
        ("EC", Some("P-256")) => "ES256",
        ("EC", Some("secp256k1")) => "ES256K",
        ("EC", Some("P-384")) => "ES384",
        ("EC", Some("P-521")) => "ES512",
        ("OKP", Some("Ed25519" | "Ed448")) => "EdDSA",
        (kty, crv) => {
            return Err(JwksError::UnsupportedKey(format!(
                "cannot determine algorithm for kty {kty} with curve {}",
                crv.unwrap_or("none")
            )))
        }
    };
    Ok(derived)
}

fn import_key(jwk: &RawJwk, alg: &str) -> Result<SigningKey, JwksError> {
    if jwk.d.is_some() {
        return Err(JwksError::KeyImport("key carries private material".to_string()));
    }

    let algorithm = Algorithm::from_str(alg)
        .map_err(|_| JwksError::KeyImport(format!("algorithm {alg} is not supported")))?;

    let decoding_key = match (jwk.kty.as_str(), algorithm) {
        (
            "RSA",
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512,
        ) => {
            let n = required_component(&jwk.n, "n")?;
            let e = required_component(&jwk.e, "e")?;
            DecodingKey::from_rsa_components(n, e)
        }
        ("EC", Algorithm::ES256 | Algorithm::ES384) => {
            let expected_curve = if algorithm == Algorithm::ES256 {
                "P-256"
            } else {
                "P-384"
            };
            if jwk.crv.as_deref().is_some_and(|crv| crv != expected_curve) {
                return Err(JwksError::KeyImport(format!(
                    "curve does not match algorithm {alg}"
                )));
            }
            let x = required_component(&jwk.x, "x")?;
            let y = required_component(&jwk.y, "y")?;
            DecodingKey::from_ec_components(x, y)
        }
        ("OKP", Algorithm::EdDSA) => {
            if jwk.crv.as_deref() != Some("Ed25519") {
                return Err(JwksError::KeyImport(format!(
                    "curve {} is not supported for EdDSA",
                    jwk.crv.as_deref().unwrap_or("none")
                )));
            }
            let x = required_component(&jwk.x, "x")?;
            DecodingKey::from_ed_components(x)
        }
        (kty, _) => {
            return Err(JwksError::KeyImport(format!(
                "algorithm {alg} cannot be used with kty {kty}"
            )))
        }
    }
    .map_err(|e| JwksError::KeyImport(e.to_string()))?;

    Ok(SigningKey {
        kid: jwk.kid.clone().filter(|kid| !kid.is_empty()),
        algorithm,
        decoding_key,
    })
}

fn required_component<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, JwksError> {
    value
        .as_deref()
        .ok_or_else(|| JwksError::KeyImport(format!("missing key component {name}")))
}

#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("Failed to fetch key set: {0}")]
    KeySetFetch(String),

    #[error("Unusable key set: {0}")]
    KeySet(String),

    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("Failed to import key: {0}")]
    KeyImport(String),
}
