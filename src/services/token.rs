//! Bearer token verification.
//!
//! Tokens are RS256 JWTs issued per application. The `aud` claim names the
//! application, which selects the key set the token must be signed by. A
//! static admin token, when configured, bypasses verification entirely and
//! maps to a fixed privileged identity.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, decode_header, Algorithm, Header, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::models::auth::Identity;
use crate::services::jwks::{JwksError, SigningKeyResolver};
use crate::services::key_cache::{KeyCache, PrefixedKeyCache, PUBLIC_KEY_PREFIX};

/// Tokens larger than this are rejected before any parsing.
pub const MAX_TOKEN_SIZE: usize = 8192;

/// Placeholder in the key-set URL template replaced by the token audience.
pub const AUDIENCE_PLACEHOLDER: &str = "{aud}";

pub const DEFAULT_JWKS_URL_TEMPLATE: &str = "https://api.canva.com/rest/v1/apps/{aud}/jwks";

const AUDIENCE_CLAIM: &str = "aud";
const BRAND_CLAIM: &str = "brandId";
const USER_CLAIM: &str = "userId";

/// Verification policy.
#[derive(Debug, Clone)]
pub struct TokenVerifierConfig {
    /// Static token granting the admin identity. `None` disables the bypass.
    pub admin_token: Option<String>,
    pub allowed_audiences: Vec<String>,
    /// Key-set URL with an `{aud}` placeholder.
    pub jwks_url_template: String,
    pub accepted_algorithms: Vec<Algorithm>,
    pub key_set_ttl: Duration,
}

impl Default for TokenVerifierConfig {
    fn default() -> Self {
        Self {
            admin_token: None,
            allowed_audiences: Vec::new(),
            jwks_url_template: DEFAULT_JWKS_URL_TEMPLATE.to_string(),
            accepted_algorithms: vec![Algorithm::RS256],
            key_set_ttl: crate::services::jwks::DEFAULT_KEY_SET_TTL,
        }
    }
}

pub struct TokenVerifier {
    config: TokenVerifierConfig,
    resolver: SigningKeyResolver,
}

impl TokenVerifier {
    /// Key sets are cached in `cache` under the `PUB_KEY_` prefix.
    pub fn new(config: TokenVerifierConfig, cache: Arc<dyn KeyCache>) -> Self {
        let cache = Arc::new(PrefixedKeyCache::new(cache, PUBLIC_KEY_PREFIX));
        let resolver = SigningKeyResolver::new(cache, config.key_set_ttl);
        Self { config, resolver }
    }

    /// Verify `token` and return the caller identity.
    ///
    /// The error distinguishes failure causes for logging only; callers at
    /// the HTTP boundary must collapse every variant to one unauthorized
    /// response.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let result = self.verify_inner(token).await;
        match &result {
            Ok(identity) => {
                let kind = if identity.is_admin { "admin" } else { "jwt" };
                metrics::counter!("auth_tokens_verified_total", "kind" => kind).increment(1);
            }
            Err(e) => {
                metrics::counter!("auth_tokens_rejected_total", "reason" => e.reason())
                    .increment(1);
                tracing::debug!(error = %e, "Token rejected");
            }
        }
        result
    }

    async fn verify_inner(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        if let Some(admin_token) = self.config.admin_token.as_deref() {
            if !admin_token.is_empty() && constant_time_eq(token.as_bytes(), admin_token.as_bytes())
            {
                tracing::info!("Static admin token accepted");
                return Ok(Identity::admin());
            }
        }

        let (header, payload) = decode_unverified(token)?;

        if !self.config.accepted_algorithms.contains(&header.alg) {
            return Err(AuthError::AlgorithmNotAccepted(header.alg));
        }

        let audience = match payload.get(AUDIENCE_CLAIM) {
            Some(Value::String(aud)) if !aud.is_empty() => aud.as_str(),
            _ => return Err(AuthError::AudienceNotAllowed),
        };
        if !self.config.allowed_audiences.iter().any(|a| a == audience) {
            tracing::warn!(audience = %audience, "Token audience is not allow-listed");
            return Err(AuthError::AudienceNotAllowed);
        }

        let jwks_url = self.jwks_url(audience);
        let key = self
            .resolver
            .get_signing_key(&jwks_url, header.kid.as_deref())
            .await?;

        if key.algorithm() != header.alg {
            return Err(AuthError::AlgorithmMismatch {
                token: header.alg,
                key: key.algorithm(),
            });
        }

        let mut validation = Validation::new(header.alg);
        validation.algorithms = vec![header.alg];
        // Audience is checked against the allow-list above.
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.required_spec_claims = HashSet::new();

        let claims = decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(AuthError::InvalidSignature)?
            .claims;

        let audience = claim_id(&claims, AUDIENCE_CLAIM)?;
        let brand_id = claim_id(&claims, BRAND_CLAIM)?;
        let user_id = claim_id(&claims, USER_CLAIM)?;

        Ok(Identity {
            audience,
            brand_id,
            user_id,
            is_admin: false,
            claims,
        })
    }

    /// Key-set URL for tokens issued to `audience`.
    pub fn jwks_url(&self, audience: &str) -> String {
        self.config
            .jwks_url_template
            .replace(AUDIENCE_PLACEHOLDER, audience)
    }
}

/// Split a token into its header and payload without checking the signature.
fn decode_unverified(token: &str) -> Result<(Header, Map<String, Value>), AuthError> {
    if token.len() > MAX_TOKEN_SIZE {
        return Err(AuthError::MalformedToken);
    }

    let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;

    let payload_segment = token.split('.').nth(1).ok_or(AuthError::MalformedToken)?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_segment)
        .map_err(|_| AuthError::MalformedToken)?;
    let payload = serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::MalformedToken)?;

    Ok((header, payload))
}

/// Read a required identifier claim.
///
/// Non-empty strings and numbers (zero included) are accepted. Missing,
/// null, boolean, empty-string and structured values are rejected.
fn claim_id(claims: &Map<String, Value>, name: &'static str) -> Result<String, AuthError> {
    match claims.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AuthError::MissingClaim(name)),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Empty token")]
    EmptyToken,

    #[error("Malformed token")]
    MalformedToken,

    #[error("Token algorithm {0:?} is not accepted")]
    AlgorithmNotAccepted(Algorithm),

    #[error("Token algorithm {token:?} does not match key algorithm {key:?}")]
    AlgorithmMismatch { token: Algorithm, key: Algorithm },

    #[error("Token audience is missing or not allowed")]
    AudienceNotAllowed,

    #[error(transparent)]
    Jwks(#[from] JwksError),

    #[error("Signature or registered claim validation failed: {0}")]
    InvalidSignature(jsonwebtoken::errors::Error),

    #[error("Required claim {0} is missing")]
    MissingClaim(&'static str),
}

impl AuthError {
    /// Low-cardinality label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptyToken => "empty",
            Self::MalformedToken => "malformed",
            Self::AlgorithmNotAccepted(_) | Self::AlgorithmMismatch { .. } => "algorithm",
            Self::AudienceNotAllowed => "audience",
            Self::Jwks(JwksError::KeySetFetch(_)) => "key_set_fetch",
            Self::Jwks(JwksError::KeyNotFound(_)) => "key_not_found",
            Self::Jwks(_) => "key_set",
            Self::InvalidSignature(_) => "signature",
            Self::MissingClaim(_) => "claim",
        }
    }
}
