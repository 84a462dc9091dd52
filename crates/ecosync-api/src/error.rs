use thiserror::Error;

/// Top-level error type for the `ecosync-api` crate.
///
/// Covers every failure mode across both API surfaces: the REST backend
/// and the live document feed. `ecosync-core` maps these into
/// engine-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Bearer token missing, expired, or rejected (HTTP 401).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Backend API ─────────────────────────────────────────────────
    /// Non-success response from the backend.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Backend answered 2xx but reported `success: false`.
    #[error("API rejected request: {message}")]
    Rejected { message: String },

    // ── Live feed ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => {
                true
            }
            Self::Api { status, .. } => *status >= 500 || matches!(status, 408 | 429),
            _ => false,
        }
    }

    /// Returns `true` if the backend refused the request itself, so
    /// resubmitting the same payload can never succeed.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Rejected { .. } => true,
            Self::Api { status, .. } => {
                (400..500).contains(status) && !matches!(status, 401 | 408 | 429)
            }
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }

    /// HTTP status code, if the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Authentication { .. } => Some(401),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_rejection());
    }

    #[test]
    fn validation_errors_are_rejections() {
        let err = Error::Api {
            status: 422,
            message: "missing missionId".into(),
        };
        assert!(err.is_rejection());
        assert!(!err.is_transient());
    }

    #[test]
    fn rate_limit_is_transient_not_rejection() {
        let err = Error::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_rejection());
    }

    #[test]
    fn expired_token_is_neither() {
        let err = Error::Authentication {
            message: "token expired".into(),
        };
        assert!(!err.is_transient());
        assert!(!err.is_rejection());
        assert_eq!(err.status(), Some(401));
    }
}
