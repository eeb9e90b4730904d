//! Service configuration.

use serde::Deserialize;
use std::path::Path;

use genledger_core::{JobPricing, DEFAULT_SIGNUP_CREDITS};

use crate::worker::client::DISPATCH_TIMEOUT;

/// Default Paystack API base URL.
pub const PAYSTACK_DEFAULT_BASE_URL: &str = "https://api.paystack.co";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL URL. Unset selects the in-memory store.
    pub database_url: Option<String>,

    /// Maximum pooled database connections.
    pub database_max_connections: u32,

    /// Shared HS256 secret for identity tokens.
    pub auth_jwt_secret: Option<String>,

    /// JWKS endpoint for RS256 identity tokens.
    pub auth_jwks_url: Option<String>,

    /// Expected token issuer, if checked.
    pub auth_issuer: Option<String>,

    /// Expected token audience, if checked.
    pub auth_audience: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Generation worker base URL.
    pub worker_url: Option<String>,

    /// API key sent to the worker.
    pub worker_api_key: Option<String>,

    /// Secret the worker signs callbacks with.
    pub worker_webhook_secret: Option<String>,

    /// Public base URL the worker calls back to.
    pub callback_base_url: String,

    /// Paystack secret key (also the webhook signing secret).
    pub paystack_secret_key: Option<String>,

    /// Paystack API base URL.
    pub paystack_base_url: String,

    /// Currency sent with checkouts.
    pub currency: String,

    /// Minor currency units per credit.
    pub credit_price_minor: i64,

    /// Credits granted to a new user.
    pub signup_credits: i64,

    /// Per-kind job prices.
    pub pricing: JobPricing,

    /// Refund the job cost when dispatch fails.
    pub refund_on_dispatch_failure: bool,

    /// How long a processed callback key stays claimed.
    pub idempotency_window_seconds: u64,

    /// How often expired callback keys are purged.
    pub idempotency_sweep_interval_seconds: u64,

    /// Lifetime of presigned download URLs.
    pub presign_ttl_seconds: u64,

    /// S3 bucket. Unset selects the in-memory object store.
    pub s3_bucket: Option<String>,

    /// Custom S3-compatible endpoint (`MinIO` etc.).
    pub s3_endpoint: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds. Must exceed the worker dispatch timeout.
    pub request_timeout_seconds: u64,

    /// Largest artifact downloaded from a worker URL.
    pub max_artifact_bytes: u64,
}

/// Configuration rejected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The request timeout would cut off a dispatch still in flight.
    #[error(
        "REQUEST_TIMEOUT_SECONDS ({request}) must be greater than the worker dispatch timeout ({dispatch}s)"
    )]
    RequestTimeoutTooShort {
        /// Configured request timeout.
        request: u64,
        /// Worker dispatch timeout.
        dispatch: u64,
    },

    /// Artifacts could never be stored.
    #[error("MAX_ARTIFACT_BYTES must be positive")]
    ZeroArtifactLimit,
}

/// Paystack secrets file structure.
#[derive(Debug, Deserialize)]
struct PaystackSecrets {
    secret_key: String,
    #[serde(default)]
    base_url: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (paystack_secret_key, paystack_base_url) = load_paystack_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: env_opt("DATABASE_URL"),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            auth_jwt_secret: env_opt("AUTH_JWT_SECRET"),
            auth_jwks_url: env_opt("AUTH_JWKS_URL"),
            auth_issuer: env_opt("AUTH_ISSUER"),
            auth_audience: env_opt("AUTH_AUDIENCE"),
            admin_api_key: env_opt("ADMIN_API_KEY"),
            worker_url: env_opt("WORKER_URL"),
            worker_api_key: env_opt("WORKER_API_KEY"),
            worker_webhook_secret: env_opt("WORKER_WEBHOOK_SECRET"),
            callback_base_url: std::env::var("CALLBACK_BASE_URL")
                .unwrap_or(defaults.callback_base_url),
            paystack_secret_key,
            paystack_base_url: paystack_base_url.unwrap_or(defaults.paystack_base_url),
            currency: std::env::var("CURRENCY").unwrap_or(defaults.currency),
            credit_price_minor: env_parse("CREDIT_PRICE_MINOR")
                .filter(|price| *price > 0)
                .unwrap_or(defaults.credit_price_minor),
            signup_credits: env_parse("SIGNUP_CREDITS").unwrap_or(defaults.signup_credits),
            pricing: JobPricing {
                image: env_parse("PRICE_IMAGE").unwrap_or(defaults.pricing.image),
                video: env_parse("PRICE_VIDEO").unwrap_or(defaults.pricing.video),
                blog: env_parse("PRICE_BLOG").unwrap_or(defaults.pricing.blog),
                book: env_parse("PRICE_BOOK").unwrap_or(defaults.pricing.book),
            },
            refund_on_dispatch_failure: env_parse("REFUND_ON_DISPATCH_FAILURE")
                .unwrap_or(defaults.refund_on_dispatch_failure),
            idempotency_window_seconds: env_parse("IDEMPOTENCY_WINDOW_SECONDS")
                .unwrap_or(defaults.idempotency_window_seconds),
            idempotency_sweep_interval_seconds: env_parse("IDEMPOTENCY_SWEEP_INTERVAL_SECONDS")
                .unwrap_or(defaults.idempotency_sweep_interval_seconds),
            presign_ttl_seconds: env_parse("PRESIGN_TTL_SECONDS")
                .unwrap_or(defaults.presign_ttl_seconds),
            s3_bucket: env_opt("S3_BUCKET"),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            max_artifact_bytes: env_parse("MAX_ARTIFACT_BYTES")
                .unwrap_or(defaults.max_artifact_bytes),
        }
    }

    /// Reject settings the service cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dispatch = DISPATCH_TIMEOUT.as_secs();
        if self.request_timeout_seconds <= dispatch {
            return Err(ConfigError::RequestTimeoutTooShort {
                request: self.request_timeout_seconds,
                dispatch,
            });
        }
        if self.max_artifact_bytes == 0 {
            return Err(ConfigError::ZeroArtifactLimit);
        }
        Ok(())
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Load Paystack secrets from file or environment.
fn load_paystack_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/paystack.json",
        "genledger/.secrets/paystack.json",
        "../.secrets/paystack.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaystackSecrets>(path) {
            tracing::info!(path = %path, "Loaded Paystack secrets from file");
            return (Some(secrets.secret_key), secrets.base_url);
        }
    }

    tracing::debug!("Paystack secrets file not found, using environment variables");
    (env_opt("PAYSTACK_SECRET_KEY"), env_opt("PAYSTACK_BASE_URL"))
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            auth_jwt_secret: None,
            auth_jwks_url: None,
            auth_issuer: None,
            auth_audience: None,
            admin_api_key: None,
            worker_url: None,
            worker_api_key: None,
            worker_webhook_secret: None,
            callback_base_url: "http://localhost:8080".into(),
            paystack_secret_key: None,
            paystack_base_url: PAYSTACK_DEFAULT_BASE_URL.into(),
            currency: "NGN".into(),
            credit_price_minor: 100,
            signup_credits: DEFAULT_SIGNUP_CREDITS,
            pricing: JobPricing::default(),
            refund_on_dispatch_failure: false,
            idempotency_window_seconds: 300,
            idempotency_sweep_interval_seconds: 60,
            presign_ttl_seconds: 3600,
            s3_bucket: None,
            s3_endpoint: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 60,
            max_artifact_bytes: 512 * 1024 * 1024,
        }
    }
}
