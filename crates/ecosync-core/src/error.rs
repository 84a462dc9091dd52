// ── Core error types ──
//
// User-facing errors from ecosync-core. Consumers never see HTTP
// status codes or WebSocket failures directly: the
// `From<ecosync_api::Error>` impl translates transport-layer errors
// into engine-level variants.

use thiserror::Error;
use uuid::Uuid;

use crate::queue::MutationStatus;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Live feed error: {message}")]
    Feed { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Queued mutation not found: {id}")]
    MutationNotFound { id: Uuid },

    #[error("Queued mutation {id} is {status}, expected {expected}")]
    InvalidMutationState {
        id: Uuid,
        status: MutationStatus,
        expected: MutationStatus,
    },

    #[error("Malformed data: {message}")]
    Serialization { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation rejected by backend: {message}")]
    Rejected { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("No active session")]
    NoSession,

    // ── Storage errors ───────────────────────────────────────────────
    #[error("Durable storage error: {message}")]
    Storage { message: String },

    #[error("Durable storage full: {used_bytes} of {quota_bytes} bytes used")]
    StorageFull { used_bytes: u64, quota_bytes: u64 },

    #[error("Queued payload could not be sealed or opened: {message}")]
    Crypto { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if resubmitting the same request can never succeed.
    ///
    /// Used by the queue drainer to move a record straight to FAILED
    /// instead of burning its retry budget. A 404 on a write means the
    /// route or its target is gone, which no retry fixes.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Rejected { .. }
            | Self::ValidationFailed { .. }
            | Self::Serialization { .. }
            | Self::NotFound { .. } => true,
            Self::Api {
                status: Some(status),
                ..
            } => (400..500).contains(status) && !matches!(status, 401 | 408 | 429),
            _ => false,
        }
    }

    /// Returns `true` for durable-storage failures (including quota).
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::StorageFull { .. })
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: format!("{context}: {err}"),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization {
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ecosync_api::Error> for CoreError {
    fn from(err: ecosync_api::Error) -> Self {
        match err {
            ecosync_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            ecosync_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            ecosync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ecosync_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            ecosync_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            ecosync_api::Error::Api { status, message } => {
                if status == 404 {
                    CoreError::NotFound {
                        entity_type: "resource".into(),
                        identifier: message,
                    }
                } else {
                    CoreError::Api {
                        message,
                        status: Some(status),
                    }
                }
            }
            ecosync_api::Error::Rejected { message } => CoreError::Rejected { message },
            ecosync_api::Error::WebSocketConnect(reason) => CoreError::Feed { message: reason },
            ecosync_api::Error::WebSocketClosed { code, reason } => CoreError::Feed {
                message: format!("closed (code {code}): {reason}"),
            },
            ecosync_api::Error::Deserialization { message, body: _ } => {
                CoreError::Serialization { message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_validation_error_is_permanent() {
        let err = CoreError::from(ecosync_api::Error::Api {
            status: 400,
            message: "bad payload".into(),
        });
        assert!(err.is_permanent());
    }

    #[test]
    fn api_server_error_is_not_permanent() {
        let err = CoreError::from(ecosync_api::Error::Api {
            status: 502,
            message: "bad gateway".into(),
        });
        assert!(!err.is_permanent());
    }

    #[test]
    fn rejection_survives_translation() {
        let err = CoreError::from(ecosync_api::Error::Rejected {
            message: "duplicate".into(),
        });
        assert!(matches!(err, CoreError::Rejected { .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn not_found_on_submit_is_permanent() {
        let err = CoreError::from(ecosync_api::Error::Api {
            status: 404,
            message: "no such mission".into(),
        });
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn throttling_is_not_permanent() {
        for status in [401, 408, 429] {
            let err = CoreError::Api {
                message: "later".into(),
                status: Some(status),
            };
            assert!(!err.is_permanent(), "{status} should be retried");
        }
    }

    #[test]
    fn storage_full_is_storage() {
        let err = CoreError::StorageFull {
            used_bytes: 10,
            quota_bytes: 10,
        };
        assert!(err.is_storage());
        assert!(!err.is_permanent());
    }
}
