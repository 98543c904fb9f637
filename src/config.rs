use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Every field has a serde default so a partial (or empty) YAML document
/// yields a runnable configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

// ---------------------------------------------------------------------------
// HTTP listener
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8080`).
    #[serde(default = "default_http_listen")]
    pub listen: String,
}

fn default_http_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
        }
    }
}

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    /// Base URL of the authority API (e.g. `https://grafana.com`).
    #[serde(default = "default_authority_base_url")]
    pub base_url: String,
    /// Timeout in seconds for a single authority request. There are no
    /// retries; a slow authority surfaces as unavailability.
    #[serde(default = "default_authority_timeout")]
    pub timeout_secs: u64,
}

fn default_authority_base_url() -> String {
    "https://grafana.com".to_string()
}

fn default_authority_timeout() -> u64 {
    5
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: default_authority_base_url(),
            timeout_secs: default_authority_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Auth policy and cache TTLs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Name of the environment variable that holds the static admin key.
    /// Leaving the variable unset disables the admin shortcut. The key
    /// itself never appears in this file.
    #[serde(default = "default_admin_key_env")]
    pub admin_key_env: String,
    /// Org ids allowed to authenticate. An empty list admits every org.
    #[serde(default)]
    pub valid_org_ids: Vec<i64>,
    /// Resolved-identity cache TTL in seconds.
    #[serde(default = "default_identity_cache_ttl")]
    pub identity_cache_ttl: u64,
    /// Instance-ownership cache TTL in seconds.
    #[serde(default = "default_instance_cache_ttl")]
    pub instance_cache_ttl: u64,
}

fn default_admin_key_env() -> String {
    "METRICSGW_ADMIN_KEY".to_string()
}

fn default_identity_cache_ttl() -> u64 {
    300
}

fn default_instance_cache_ttl() -> u64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_key_env: default_admin_key_env(),
            valid_org_ids: Vec::new(),
            identity_cache_ttl: default_identity_cache_ttl(),
            instance_cache_ttl: default_instance_cache_ttl(),
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Which downstream publisher receives accepted metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    /// Drop every batch.
    #[default]
    Null,
    /// Log batch sizes at debug level.
    Log,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublisherConfig {
    #[serde(default)]
    pub kind: PublisherKind,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.authority.base_url.starts_with("http://")
            || config.authority.base_url.starts_with("https://"),
        "authority.base_url must be an http(s) URL"
    );
    anyhow::ensure!(
        config.authority.timeout_secs >= 1,
        "authority.timeout_secs must be at least 1"
    );
    anyhow::ensure!(
        config.auth.identity_cache_ttl >= 1,
        "auth.identity_cache_ttl must be at least 1 second"
    );
    anyhow::ensure!(
        config.auth.instance_cache_ttl >= 1,
        "auth.instance_cache_ttl must be at least 1 second"
    );
    config
        .http
        .listen
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid http.listen address: {}", config.http.listen))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
