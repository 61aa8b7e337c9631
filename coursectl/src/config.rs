//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `COURSECTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `COURSECTL_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `COURSECTL_PAYMENT__STRIPE__API_KEY=sk_live_...` sets `payment.stripe.api_key`.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use coursectl::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}", config.bind_address());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `dashboard_url`
//! - **Database**: `database.url`, `database.pool`
//! - **Security**: `secret_key`, `auth.jwt_expiry`, `auth.cookie_name`, `auth.cors`
//! - **Payments**: `payment.stripe` or `payment.dummy`; omitted means checkout is not configured
//! - **Background Services**: `background_services.order_sweeper`
//! - **Features**: `enable_metrics`, `enable_otel_export`

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "COURSECTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL of the learner-facing frontend. Checkout success and cancel redirects point here.
    pub dashboard_url: String,
    /// Set from the raw `DATABASE_URL` environment variable; folded into `database.url` on load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    /// Secret key for verifying session JWTs (required)
    pub secret_key: Option<String>,
    pub auth: AuthConfig,
    /// Payment provider configuration. When absent, checkout and payment endpoints return 501.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentConfig>,
    pub background_services: BackgroundServicesConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection string for the database
    pub url: String,
    pub pool: PoolSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/coursectl".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool settings passed through to SQLx.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection (seconds, 0 = never)
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,  // 10 minutes
            max_lifetime_secs: 1800, // 30 minutes
        }
    }
}

/// Authentication and browser-facing security settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Name of the cookie carrying the session JWT
    pub cookie_name: String,
    /// Lifetime of tokens issued by [`crate::auth::session::create_session_token`]
    #[serde(with = "humantime_serde")]
    pub jwt_expiry: Duration,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "coursectl_session".to_string(),
            jwt_expiry: Duration::from_secs(24 * 60 * 60), // 24 hours
            cors: CorsConfig::default(),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://learn.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Payment provider configuration.
///
/// Credentials should be set via environment variables:
/// - `COURSECTL_PAYMENT__STRIPE__API_KEY` - Stripe secret API key
/// - `COURSECTL_PAYMENT__STRIPE__WEBHOOK_SECRET` - Webhook signing secret
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentConfig {
    /// Stripe Checkout
    Stripe(StripeConfig),
    /// In-process provider that marks every session paid. For local development and tests.
    Dummy(DummyConfig),
}

impl PaymentConfig {
    pub fn currency(&self) -> &str {
        match self {
            PaymentConfig::Stripe(c) => &c.currency,
            PaymentConfig::Dummy(c) => &c.currency,
        }
    }
}

/// Stripe payment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StripeConfig {
    /// Stripe API key (secret key starting with sk_)
    pub api_key: String,
    /// Stripe webhook signing secret (starts with whsec_)
    pub webhook_secret: String,
    /// API base URL. Overridden in tests to point at a mock server.
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    /// ISO currency code used for every charge, lowercase
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Per-request timeout for calls to Stripe
    #[serde(default = "default_stripe_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Dummy payment configuration for testing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DummyConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
        }
    }
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_stripe_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Background services configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundServicesConfig {
    pub order_sweeper: OrderSweeperConfig,
}

/// Stale pending order sweeper.
///
/// Pending orders older than `stale_after` are canceled every `interval`. `stale_after` should be
/// at least the checkout session lifetime so a learner still on the payment page is not canceled.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrderSweeperConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
}

impl Default for OrderSweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10 * 60),
            stale_after: Duration::from_secs(25 * 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            dashboard_url: "http://localhost:5173".to_string(),
            database_url: None,
            database: DatabaseConfig::default(),
            secret_key: None,
            auth: AuthConfig::default(),
            payment: None,
            background_services: BackgroundServicesConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("COURSECTL_").split("__"))
            // Common DATABASE_URL pattern
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.secret_key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Internal {
                operation: "Config validation: secret_key is not configured. \
                 Please set COURSECTL_SECRET_KEY environment variable or add secret_key to config file."
                    .to_string(),
            });
        }

        if self.auth.jwt_expiry.as_secs() < 300 {
            return Err(Error::Internal {
                operation: "Config validation: JWT expiry duration is too short (minimum 5 minutes)".to_string(),
            });
        }

        if self.auth.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        if self.auth.cors.allow_credentials
            && self
                .auth
                .cors
                .allowed_origins
                .iter()
                .any(|origin| matches!(origin, CorsOrigin::Wildcard))
        {
            return Err(Error::Internal {
                operation: "Config validation: CORS allow_credentials cannot be combined with a wildcard origin".to_string(),
            });
        }

        if let Err(e) = Url::parse(&self.dashboard_url) {
            return Err(Error::Internal {
                operation: format!("Config validation: dashboard_url '{}' is not a valid URL: {e}", self.dashboard_url),
            });
        }

        if let Some(payment) = &self.payment {
            let currency = payment.currency();
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_lowercase()) {
                return Err(Error::Internal {
                    operation: format!("Config validation: payment currency '{currency}' must be a lowercase 3-letter ISO code"),
                });
            }

            if let PaymentConfig::Stripe(stripe) = payment {
                if stripe.api_key.is_empty() || stripe.webhook_secret.is_empty() {
                    return Err(Error::Internal {
                        operation: "Config validation: payment.stripe requires both api_key and webhook_secret".to_string(),
                    });
                }
                if let Err(e) = Url::parse(&stripe.api_base) {
                    return Err(Error::Internal {
                        operation: format!("Config validation: payment.stripe.api_base is not a valid URL: {e}"),
                    });
                }
                if stripe.timeout.is_zero() {
                    return Err(Error::Internal {
                        operation: "Config validation: payment.stripe.timeout must be greater than zero".to_string(),
                    });
                }
            }
        }

        let sweeper = &self.background_services.order_sweeper;
        if sweeper.enabled && (sweeper.interval.is_zero() || sweeper.stale_after.is_zero()) {
            return Err(Error::Internal {
                operation: "Config validation: order_sweeper interval and stale_after must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
