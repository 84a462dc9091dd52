// ── Runtime engine configuration ──
//
// These types describe *how* the engine talks to the backend and where
// it keeps durable state. They never touch config files: the CLI (via
// ecosync-config) builds an `EngineConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use ecosync_api::ReconnectConfig;
use ecosync_api::backoff::exponential_backoff;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::queue::DEFAULT_STORAGE_QUOTA_BYTES;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (local development backends only).
    DangerAcceptInvalid,
}

/// Where durable state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// One sub-directory per namespace under this directory.
    Directory(PathBuf),
    /// In memory; lost when the engine is dropped.
    Memory,
}

/// Bounded exponential backoff for queued mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before a record becomes FAILED.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying a record that has failed `attempts` times.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        exponential_backoff(
            attempts.saturating_sub(1),
            self.initial_delay,
            self.max_delay,
        )
    }
}

/// Configuration for one engine instance.
///
/// Built by the CLI, passed to `SyncEngine`; core never reads config files.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backend REST API base URL (e.g. `https://api.example.com/api`).
    pub api_url: Url,
    /// Live feed WebSocket endpoint.
    pub feed_url: Url,
    /// Bearer token for both surfaces.
    pub token: Option<SecretString>,
    /// Secret that seals queued payloads at rest. `None` uses the
    /// built-in default.
    pub queue_secret: Option<SecretString>,
    pub tls: TlsVerification,
    pub storage: StorageLocation,
    /// Bound on network-tier reads and queued submissions.
    pub network_timeout: Duration,
    /// Overall HTTP request timeout.
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    pub storage_quota_bytes: u64,
    pub feed_reconnect: ReconnectConfig,
    /// Quiet period the store persister waits to coalesce bursts.
    pub persist_debounce: Duration,
    /// Spawn the connectivity-driven drainer task. One-shot callers turn
    /// this off and call `drain_once` themselves.
    pub background_drain: bool,
}

impl EngineConfig {
    /// Defaults for everything but the two endpoints.
    pub fn new(api_url: Url, feed_url: Url) -> Self {
        Self {
            api_url,
            feed_url,
            token: None,
            queue_secret: None,
            tls: TlsVerification::default(),
            storage: StorageLocation::Memory,
            network_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            cache_ttl: DEFAULT_CACHE_TTL,
            retry: RetryPolicy::default(),
            storage_quota_bytes: DEFAULT_STORAGE_QUOTA_BYTES,
            feed_reconnect: ReconnectConfig::default(),
            persist_debounce: Duration::from_millis(250),
            background_drain: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        let first = policy.delay_for(1);
        let second = policy.delay_for(2);
        assert!(first >= Duration::from_millis(1_500) && first <= Duration::from_millis(2_500));
        assert!(second > first);

        // ±25% jitter around the 5 minute cap.
        let late = policy.delay_for(30);
        assert!(late <= Duration::from_secs(375));
        assert!(late >= Duration::from_secs(225));
    }
}
