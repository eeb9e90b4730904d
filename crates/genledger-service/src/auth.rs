//! Authentication extractors.
//!
//! This module provides extractors for:
//! - `AuthUser` - End-user authentication via identity-provider JWT
//! - `AdminAuth` - Admin authentication for privileged endpoints
//!
//! Tokens are verified with a shared HS256 secret when `AUTH_JWT_SECRET` is
//! set, otherwise as RS256 against the keys published at `AUTH_JWKS_URL`.
//! The verified `sub` claim is the user's external id; the user record is
//! created with the signup grant on first sight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use genledger_core::User;

use crate::config::ServiceConfig;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Constants
// ============================================================================

/// How long to cache JWKS keys before refreshing.
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600);

/// Timeout for JWKS fetch requests.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// An authenticated user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user record, created on first sight.
    pub user: User,
    /// The verified subject claim.
    pub subject: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = validate_jwt(token, &state.config).await?;

        if claims.sub.trim().is_empty() {
            return Err(ApiError::Unauthorized);
        }

        let user = state.ledger.ensure_user(&claims.sub).await?;

        Ok(AuthUser {
            user,
            subject: claims.sub,
        })
    }
}

/// Admin authentication via API key.
///
/// Used for admin-only endpoints like granting credits manually.
/// Requires the `X-Admin-Key` header to match the configured admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_api_key.as_deref() else {
            tracing::warn!("Admin key not configured - rejecting admin request");
            return Err(ApiError::Unauthorized);
        };

        let presented = header_str(parts, "x-admin-key").ok_or(ApiError::Unauthorized)?;
        if !verify_admin_key(expected, presented) {
            tracing::warn!("Invalid admin key");
            return Err(ApiError::Unauthorized);
        }

        let admin_id = header_str(parts, "x-admin-id")
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(AdminAuth { admin_id })
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Constant-time admin key comparison.
fn verify_admin_key(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();
    expected.len() == presented.len()
        && expected
            .iter()
            .zip(presented)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    header_str(parts, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)
}

/// JWT claims the service reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (identity-provider user id).
    pub sub: String,
    /// Expiration time.
    pub exp: i64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience (string or array).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

/// Validate a token with whichever verifier is configured.
async fn validate_jwt(token: &str, config: &ServiceConfig) -> Result<JwtClaims, ApiError> {
    let (key, algorithm) = if let Some(secret) = &config.auth_jwt_secret {
        (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    } else if let Some(jwks_url) = &config.auth_jwks_url {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Failed to decode JWT header");
            ApiError::Unauthorized
        })?;
        (
            get_decoding_key(header.kid.as_deref(), jwks_url).await?,
            Algorithm::RS256,
        )
    } else {
        tracing::warn!("No token verifier configured - rejecting request");
        return Err(ApiError::Unauthorized);
    };

    let validation = build_validation(algorithm, config);

    let token_data = decode::<JwtClaims>(token, &key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

fn build_validation(algorithm: Algorithm, config: &ServiceConfig) -> Validation {
    let mut validation = Validation::new(algorithm);
    match &config.auth_audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if let Some(issuer) = &config.auth_issuer {
        validation.set_issuer(&[issuer]);
    }
    validation
}

// ============================================================================
// JWKS Client
// ============================================================================

/// JWKS (JSON Web Key Set) response structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    /// List of JWK keys.
    pub keys: Vec<Jwk>,
}

/// Single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// RSA public key modulus (base64url encoded).
    pub n: Option<String>,
    /// RSA public key exponent (base64url encoded).
    pub e: Option<String>,
}

/// JWKS cache entry.
struct JwksCache {
    client: reqwest::Client,
    /// Which endpoint the cached keys came from.
    source: Option<String>,
    keys: HashMap<String, DecodingKey>,
    /// Key for tokens without a `kid`.
    default_key: Option<DecodingKey>,
    last_updated: Instant,
}

impl JwksCache {
    fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            source: None,
            keys: HashMap::new(),
            default_key: None,
            last_updated: Instant::now(),
        }
    }

    fn is_fresh_for(&self, url: &str) -> bool {
        self.source.as_deref() == Some(url) && self.last_updated.elapsed() < JWKS_CACHE_DURATION
    }
}

/// Global JWKS cache (lazily initialized).
static JWKS_CACHE: std::sync::OnceLock<RwLock<JwksCache>> = std::sync::OnceLock::new();

fn get_jwks_cache() -> &'static RwLock<JwksCache> {
    JWKS_CACHE.get_or_init(|| RwLock::new(JwksCache::new()))
}

/// Get a decoding key from cache or fetch from the JWKS endpoint.
async fn get_decoding_key(kid: Option<&str>, jwks_url: &str) -> Result<DecodingKey, ApiError> {
    let cache = get_jwks_cache();

    {
        let cache_read = cache.read().await;
        if cache_read.is_fresh_for(jwks_url) {
            let cached = match kid {
                Some(kid) => cache_read.keys.get(kid),
                None => cache_read.default_key.as_ref(),
            };
            if let Some(key) = cached {
                return Ok(key.clone());
            }
        }
    }

    // Cache miss, expired, or an unknown kid after key rotation
    let client = cache.read().await.client.clone();
    let jwks = fetch_jwks(&client, jwks_url).await?;

    let mut cache_write = cache.write().await;
    cache_write.keys.clear();
    cache_write.default_key = None;
    cache_write.source = Some(jwks_url.to_string());
    cache_write.last_updated = Instant::now();

    for jwk in &jwks.keys {
        if let Some(decoding_key) = jwk_to_decoding_key(jwk) {
            if let Some(ref key_kid) = jwk.kid {
                cache_write.keys.insert(key_kid.clone(), decoding_key.clone());
            }
            if cache_write.default_key.is_none() {
                cache_write.default_key = Some(decoding_key);
            }
        }
    }

    let key = match kid {
        Some(kid) => cache_write.keys.get(kid).cloned(),
        None => cache_write.default_key.clone(),
    };
    key.ok_or(ApiError::Unauthorized)
}

async fn fetch_jwks(client: &reqwest::Client, jwks_url: &str) -> Result<Jwks, ApiError> {
    tracing::debug!(url = %jwks_url, "Fetching JWKS");

    let unavailable = |message: &str| ApiError::UpstreamUnavailable {
        message: message.to_string(),
        details: None,
    };

    let response = client.get(jwks_url).send().await.map_err(|e| {
        tracing::error!(error = %e, url = %jwks_url, "Failed to fetch JWKS");
        unavailable("Failed to fetch authentication keys")
    })?;

    if !response.status().is_success() {
        tracing::error!(
            status = %response.status(),
            url = %jwks_url,
            "JWKS fetch returned non-success status"
        );
        return Err(unavailable("Failed to fetch authentication keys"));
    }

    let jwks: Jwks = response.json().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to parse JWKS response");
        unavailable("Failed to parse authentication keys")
    })?;

    tracing::info!(keys_count = %jwks.keys.len(), "JWKS fetched successfully");

    Ok(jwks)
}

fn jwk_to_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    if jwk.kty != "RSA" {
        tracing::debug!(kty = %jwk.kty, "Skipping non-RSA JWK");
        return None;
    }

    let n = jwk.n.as_ref()?;
    let e = jwk.e.as_ref()?;

    DecodingKey::from_rsa_components(n, e).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config(secret: &str) -> ServiceConfig {
        ServiceConfig {
            auth_jwt_secret: Some(secret.into()),
            ..ServiceConfig::default()
        }
    }

    fn token(secret: &str, claims: &JwtClaims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: &str, exp_offset: i64) -> JwtClaims {
        JwtClaims {
            sub: sub.into(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
            iss: None,
            aud: None,
        }
    }

    #[tokio::test]
    async fn hs256_token_validates() {
        let t = token("s3cret", &claims("user_1", 3600));
        let claims = validate_jwt(&t, &config("s3cret")).await.unwrap();
        assert_eq!(claims.sub, "user_1");
    }

    #[tokio::test]
    async fn wrong_secret_or_expired_token_is_rejected() {
        let t = token("other", &claims("user_1", 3600));
        assert!(validate_jwt(&t, &config("s3cret")).await.is_err());

        let t = token("s3cret", &claims("user_1", -3600));
        assert!(validate_jwt(&t, &config("s3cret")).await.is_err());
    }

    #[tokio::test]
    async fn issuer_and_audience_are_checked_when_configured() {
        let mut config = config("s3cret");
        config.auth_issuer = Some("https://id.example.com".into());
        config.auth_audience = Some("genledger".into());

        let mut good = claims("user_1", 3600);
        good.iss = Some("https://id.example.com".into());
        good.aud = Some(serde_json::json!("genledger"));
        assert!(validate_jwt(&token("s3cret", &good), &config).await.is_ok());

        let mut wrong_aud = good.clone();
        wrong_aud.aud = Some(serde_json::json!("someone-else"));
        assert!(validate_jwt(&token("s3cret", &wrong_aud), &config).await.is_err());
    }

    #[tokio::test]
    async fn no_verifier_rejects() {
        let t = token("s3cret", &claims("user_1", 3600));
        assert!(validate_jwt(&t, &ServiceConfig::default()).await.is_err());
    }

    #[test]
    fn admin_key_comparison() {
        assert!(verify_admin_key("k3y", "k3y"));
        assert!(!verify_admin_key("k3y", "k3z"));
        assert!(!verify_admin_key("k3y", "k3y-longer"));
        assert!(!verify_admin_key("k3y", ""));
    }

    #[test]
    fn non_rsa_jwk_is_skipped() {
        let jwk = Jwk {
            kty: "EC".into(),
            kid: Some("k1".into()),
            n: None,
            e: None,
        };
        assert!(jwk_to_decoding_key(&jwk).is_none());
    }
}
