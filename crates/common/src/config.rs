//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Origin server the proxy sits in front of.
    pub upstream: UpstreamConfig,
    /// Redis configuration for the account-age cache.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Alert channel configuration.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Spam heuristic tuning.
    #[serde(default)]
    pub rules: RulesConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest POST body buffered for inspection.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Origin server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the origin, e.g. `https://mastodon.example`.
    pub origin: String,
    /// Request timeout for forwarded requests.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL. Without it the cache is process-local.
    #[serde(default)]
    pub url: Option<String>,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            prefix: default_redis_prefix(),
        }
    }
}

/// Alert channel configuration.
///
/// Notifications are disabled when `channel_url` is unset.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Destination the alert text is POSTed to.
    #[serde(default)]
    pub channel_url: Option<String>,
    /// Bearer token sent with each alert.
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout for alert delivery.
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_url: None,
            token: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}

/// A spam signature checked after the cheap gates pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heuristic {
    /// Many cc entries plus content matching the campaign signature.
    ContentSignature,
    /// A single webp attachment with a deny-listed fingerprint.
    BadImage,
    /// Actor account created after the cutoff date.
    NewAccount,
}

/// Overrides for the built-in rule tables. Unset fields use the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesConfig {
    /// `cc` entries needed (exclusive) before the content signature applies.
    #[serde(default)]
    pub cc_threshold: Option<usize>,
    /// Exact username length produced by the spam generator.
    #[serde(default)]
    pub username_length: Option<usize>,
    /// Accounts created after this RFC 3339 instant are treated as spam.
    #[serde(default)]
    pub account_cutoff: Option<String>,
    /// Regex matched against the raw HTML content.
    #[serde(default)]
    pub content_signature: Option<String>,
    /// `"<width>x<height> <blurhash>"` fingerprints of known spam images.
    #[serde(default)]
    pub bad_images: Option<Vec<String>>,
    /// Evaluation order of the heuristics.
    #[serde(default)]
    pub heuristic_order: Option<Vec<Heuristic>>,
    /// How long a resolved account creation time stays cached.
    #[serde(default)]
    pub account_age_ttl_secs: Option<u64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

const fn default_upstream_timeout() -> u64 {
    30
}

const fn default_notify_timeout() -> u64 {
    10
}

fn default_redis_prefix() -> String {
    "inbox-guard".to_string()
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `INBOX_GUARD_ENV`)
    /// 4. Environment variables with `INBOX_GUARD__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            tracing::warn!(error = %e, "Failed to read .env file");
        }

        let env = std::env::var("INBOX_GUARD_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("INBOX_GUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("INBOX_GUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
