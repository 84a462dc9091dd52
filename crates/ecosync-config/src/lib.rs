//! Shared configuration for the ecosync CLI and embedders.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `ecosync_core::EngineConfig`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use ecosync_core::{EngineConfig, RetryPolicy, StorageLocation, TlsVerification};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, falling back to the default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.clone(),
            })?;
        Ok((name, profile))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// HTTP request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named backend profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Backend REST API base URL (e.g., "https://api.example.com/api").
    pub api_url: String,

    /// Live feed WebSocket URL. Derived from `api_url` when unset.
    pub feed_url: Option<String>,

    /// Bearer token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Durable storage directory. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override HTTP request timeout, seconds.
    pub timeout: Option<u64>,

    /// Bound on network reads and queued submissions, seconds.
    pub network_timeout: Option<u64>,

    /// Entity cache time-to-live, hours.
    pub cache_ttl_hours: Option<u64>,

    /// Attempts before a queued write is marked failed.
    pub max_attempts: Option<u32>,

    /// Durable storage quota, megabytes.
    pub storage_quota_mb: Option<u64>,

    /// Environment variable holding the secret that encrypts queued
    /// payloads. Defaults to `ECOSYNC_QUEUE_SECRET`.
    pub queue_secret_env: Option<String>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "ecosync", "ecosync")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default durable storage directory for `profile_name`.
pub fn data_dir(profile_name: &str) -> PathBuf {
    project_dirs()
        .map_or_else(dirs_fallback, |dirs| dirs.data_local_dir().to_path_buf())
        .join(profile_name)
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ecosync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("ECOSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the bearer token from the credential chain.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new("ecosync", &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Env var read for the queue secret when a profile names none.
pub const QUEUE_SECRET_ENV: &str = "ECOSYNC_QUEUE_SECRET";

/// The secret queued payloads are sealed with, if one is configured.
/// The engine falls back to its built-in secret otherwise.
pub fn resolve_queue_secret(profile: &Profile) -> Option<SecretString> {
    let env_name = profile.queue_secret_env.as_deref().unwrap_or(QUEUE_SECRET_ENV);
    std::env::var(env_name)
        .ok()
        .filter(|secret| !secret.is_empty())
        .map(SecretString::from)
}

// ── Engine config ───────────────────────────────────────────────────

/// Build an `EngineConfig` from a profile, resolving its token.
pub fn profile_to_engine_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<EngineConfig, ConfigError> {
    let token = resolve_token(profile, profile_name)?;
    engine_config(profile, profile_name, Some(token))
}

/// Build an `EngineConfig` from a profile and an already-resolved token.
pub fn engine_config(
    profile: &Profile,
    profile_name: &str,
    token: Option<SecretString>,
) -> Result<EngineConfig, ConfigError> {
    let api_url = parse_url("api_url", &profile.api_url)?;
    let feed_url = match profile.feed_url {
        Some(ref raw) => parse_url("feed_url", raw)?,
        None => derive_feed_url(&api_url)?,
    };

    let tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = EngineConfig::new(api_url, feed_url);
    config.token = token;
    config.queue_secret = resolve_queue_secret(profile);
    config.tls = tls;
    config.storage = StorageLocation::Directory(
        profile
            .data_dir
            .clone()
            .unwrap_or_else(|| data_dir(profile_name)),
    );
    if let Some(secs) = profile.timeout {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.network_timeout {
        config.network_timeout = Duration::from_secs(secs);
    }
    if let Some(hours) = profile.cache_ttl_hours {
        config.cache_ttl = Duration::from_secs(hours.saturating_mul(3600));
    }
    if let Some(max_attempts) = profile.max_attempts {
        if max_attempts == 0 {
            return Err(ConfigError::Validation {
                field: "max_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        config.retry = RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        };
    }
    if let Some(mb) = profile.storage_quota_mb {
        config.storage_quota_bytes = mb.saturating_mul(1024 * 1024);
    }
    Ok(config)
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// `https://host/api` → `wss://host/api/feed`.
fn derive_feed_url(api_url: &Url) -> Result<Url, ConfigError> {
    let scheme = match api_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(ConfigError::Validation {
                field: "api_url".into(),
                reason: format!("unsupported scheme '{other}'"),
            });
        }
    };
    let mut feed = api_url.clone();
    feed.set_scheme(scheme).map_err(|()| ConfigError::Validation {
        field: "feed_url".into(),
        reason: format!("cannot derive a feed URL from {api_url}"),
    })?;
    let path = format!("{}/feed", feed.path().trim_end_matches('/'));
    feed.set_path(&path);
    Ok(feed)
}
