//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use ecosync_config::ConfigError;
use ecosync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const STORAGE: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the backend at {url}: {reason}")]
    #[diagnostic(
        code(ecosync::connection_failed),
        help(
            "Check that the backend is running and reachable.\n\
             Writes keep queueing while offline; run `ecosync drain` once it is back."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Live feed error: {message}")]
    #[diagnostic(code(ecosync::feed))]
    Feed { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(ecosync::auth_failed),
        help(
            "Verify your token.\n\
             Run: ecosync config set-token --profile <name>"
        )
    )]
    AuthFailed { message: String },

    #[error("No token configured for profile '{profile}'")]
    #[diagnostic(
        code(ecosync::no_credentials),
        help(
            "Store one with: ecosync config set-token\n\
             Or set the ECOSYNC_TOKEN environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(ecosync::not_found),
        help("Run: ecosync {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Queue ────────────────────────────────────────────────────────
    #[error("Write rejected by the backend: {message}")]
    #[diagnostic(
        code(ecosync::rejected),
        help("The request will not succeed if resent. Fix the payload and enqueue it again.")
    )]
    Rejected { message: String },

    #[error("Queued write {id} is {status}, expected {expected}")]
    #[diagnostic(code(ecosync::invalid_state), help("Run: ecosync queue list"))]
    InvalidState {
        id: String,
        status: String,
        expected: String,
    },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(ecosync::api_error))]
    ApiError {
        message: String,
        status: Option<u16>,
    },

    // ── Storage ──────────────────────────────────────────────────────
    #[error("Durable storage error: {message}")]
    #[diagnostic(
        code(ecosync::storage),
        help("Check permissions on the data directory (--data-dir or the profile's data_dir).")
    )]
    Storage { message: String },

    #[error("Durable storage is full ({used_bytes} of {quota_bytes} bytes)")]
    #[diagnostic(
        code(ecosync::storage_full),
        help("Drain or discard queued writes, or raise storage_quota_mb in the profile.")
    )]
    StorageFull { used_bytes: u64, quota_bytes: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ecosync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(ecosync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: ecosync config add <name> --api-url <url>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No backend configured")]
    #[diagnostic(
        code(ecosync::no_config),
        help(
            "Pass --api-url, or create a profile with: ecosync config add <name> --api-url <url>\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(ecosync::config))]
    Config { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(ecosync::timeout),
        help("Increase the timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    #[diagnostic(code(ecosync::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(ecosync::json), help("Check the JSON contents and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Feed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. }
            | Self::ProfileNotFound { .. }
            | Self::ApiError {
                status: Some(404),
                ..
            } => exit_code::NOT_FOUND,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Storage { .. } | Self::StorageFull { .. } => exit_code::STORAGE,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::InvalidState { .. } | Self::Json(_) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => {
                CliError::ConnectionFailed { url, reason }
            }
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::Feed { message } => CliError::Feed { message },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                resource_type: entity_type,
                identifier,
                list_command: "queue list".into(),
            },
            CoreError::MutationNotFound { id } => CliError::NotFound {
                resource_type: "queued write".into(),
                identifier: id.to_string(),
                list_command: "queue list".into(),
            },
            CoreError::InvalidMutationState {
                id,
                status,
                expected,
            } => CliError::InvalidState {
                id: id.to_string(),
                status: status.to_string(),
                expected: expected.to_string(),
            },
            CoreError::Serialization { message } => CliError::Validation {
                field: "payload".into(),
                reason: message,
            },
            CoreError::Rejected { message } => CliError::Rejected { message },
            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::NoSession => CliError::Validation {
                field: "session".into(),
                reason: "no active session; pass --user".into(),
            },
            CoreError::Storage { message } => CliError::Storage { message },
            CoreError::StorageFull {
                used_bytes,
                quota_bytes,
            } => CliError::StorageFull {
                used_bytes,
                quota_bytes,
            },
            CoreError::Crypto { message } => CliError::Storage {
                message: format!("{message} (was queue_secret changed?)"),
            },
            CoreError::Api { message, status } => CliError::ApiError { message, status },
            CoreError::Config { message } => CliError::Config { message },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_writes_get_their_own_exit_code() {
        let err = CliError::from(CoreError::Rejected {
            message: "missing field".into(),
        });
        assert_eq!(err.exit_code(), exit_code::REJECTED);
    }

    #[test]
    fn storage_full_maps_to_storage_exit_code() {
        let err = CliError::from(CoreError::StorageFull {
            used_bytes: 10,
            quota_bytes: 5,
        });
        assert_eq!(err.exit_code(), exit_code::STORAGE);
    }

    #[test]
    fn missing_token_is_an_auth_error() {
        let err = CliError::from(ConfigError::NoCredentials {
            profile: "default".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }
}
