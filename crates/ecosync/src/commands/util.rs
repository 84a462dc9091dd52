//! Shared helpers for command handlers.

use std::path::Path;

use bytes::Bytes;
use uuid::Uuid;

use ecosync_core::Attachment;

use crate::error::CliError;

/// Read and parse a JSON file for `--from-file` flags.
pub fn read_json_file(path: &Path) -> Result<serde_json::Value, CliError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| CliError::Validation {
        field: "from-file".into(),
        reason: format!("invalid JSON: {e}"),
    })
}

/// Parse a queued-write id given on the command line.
pub fn parse_mutation_id(raw: &str) -> Result<Uuid, CliError> {
    raw.trim().parse().map_err(|_| CliError::Validation {
        field: "id".into(),
        reason: format!("'{raw}' is not a valid mutation id (expected a UUID)"),
    })
}

/// Load a file into an attachment, guessing its content type.
pub fn read_attachment(path: &Path) -> Result<Attachment, CliError> {
    let data = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CliError::Validation {
            field: "attach".into(),
            reason: format!("{} is not a file", path.display()),
        })?;
    Ok(Attachment {
        content_type: content_type_for(path).into(),
        file_name,
        data: Bytes::from(data),
    })
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
