// Backend REST API client
//
// Wraps `reqwest::Client` with bearer-token auth, base-URL joining,
// idempotency-key propagation, and uniform response handling. Endpoint
// methods mirror the routes the app's offline queue replays against.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Header carrying the client-generated mutation id on every write.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// ── Wire types ───────────────────────────────────────────────────────

/// Acknowledgement returned by every write endpoint.
///
/// The backend answers duplicate submissions of the same idempotency key
/// with the original receipt, so `entity_id` is stable across retries.
/// Endpoints that echo the created record (`{"ticket": {"id": ..}}`)
/// have its id lifted into `entity_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSubmitResponse")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(rename = "entityId")]
    pub entity_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubmitResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default, alias = "id")]
    entity_id: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    ticket: Option<CreatedRecord>,
    #[serde(default)]
    request: Option<CreatedRecord>,
    #[serde(default)]
    submission: Option<CreatedRecord>,
    #[serde(default)]
    post: Option<CreatedRecord>,
}

/// The echoed record of a create call; only its id matters here.
#[derive(Deserialize)]
struct CreatedRecord {
    #[serde(default, alias = "_id")]
    id: Option<serde_json::Value>,
}

impl From<RawSubmitResponse> for SubmitResponse {
    fn from(raw: RawSubmitResponse) -> Self {
        let nested = [raw.ticket, raw.request, raw.submission, raw.post]
            .into_iter()
            .flatten()
            .find_map(|record| record.id);
        Self {
            success: raw.success,
            entity_id: raw.entity_id.or(nested).and_then(id_string),
            message: raw.message,
        }
    }
}

/// Ids arrive as strings or numbers.
fn id_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(id) => Some(id),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

impl Default for SubmitResponse {
    fn default() -> Self {
        Self {
            success: true,
            entity_id: None,
            message: None,
        }
    }
}

fn default_success() -> bool {
    true
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// A binary file attached to a multipart submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Upload {
    fn into_part(self) -> Result<Part, Error> {
        Part::bytes(self.bytes.to_vec())
            .file_name(self.file_name)
            .mime_str(&self.content_type)
            .map_err(Error::Transport)
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the backend REST API.
///
/// Cheap to clone (the inner `reqwest::Client` is reference counted).
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Build a client for `base_url`, sending `token` as a bearer token
    /// on every request when present.
    pub fn new(
        base_url: &str,
        token: Option<&SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| Error::Authentication {
                    message: format!("invalid token header value: {e}"),
                })?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = transport.build_client_with_headers(headers)?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
        })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
        })
    }

    /// The API base URL (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// GET an arbitrary JSON resource relative to the base URL.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(parse_error(status, resp).await);
        }
        let body = resp.text().await?;
        parse_body(body)
    }

    /// The gamification dashboard aggregate (profile, missions, stats).
    pub async fn dashboard(&self) -> Result<serde_json::Value, Error> {
        self.get_json("gamification/dashboard").await
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// POST a JSON body with an idempotency key.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<SubmitResponse, Error> {
        let url = self.url(path)?;
        debug!(%idempotency_key, "POST {url}");

        let resp = self
            .http
            .post(url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await?;
        handle_submit(resp).await
    }

    /// POST a multipart form with an idempotency key.
    pub async fn post_multipart(
        &self,
        path: &str,
        form: Form,
        idempotency_key: &str,
    ) -> Result<SubmitResponse, Error> {
        self.post_multipart_to(self.url(path)?, form, idempotency_key)
            .await
    }

    async fn post_multipart_to(
        &self,
        url: Url,
        form: Form,
        idempotency_key: &str,
    ) -> Result<SubmitResponse, Error> {
        debug!(%idempotency_key, "POST (multipart) {url}");

        let resp = self
            .http
            .post(url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .multipart(form)
            .send()
            .await?;
        handle_submit(resp).await
    }

    /// Submit proof of a completed mission (`notes` + optional photo).
    pub async fn submit_mission_proof(
        &self,
        mission_id: &str,
        notes: Option<&str>,
        image: Option<Upload>,
        idempotency_key: &str,
    ) -> Result<SubmitResponse, Error> {
        let mut form = Form::new();
        if let Some(notes) = notes {
            form = form.text("notes", notes.to_owned());
        }
        if let Some(image) = image {
            form = form.part("image", image.into_part()?);
        }
        let mut url = self.url("missions")?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend([mission_id, "submit"]);
        self.post_multipart_to(url, form, idempotency_key).await
    }

    /// Publish a community post (`content` + optional image).
    pub async fn create_community_post(
        &self,
        content: &str,
        image: Option<Upload>,
        idempotency_key: &str,
    ) -> Result<SubmitResponse, Error> {
        let mut form = Form::new().text("content", content.to_owned());
        if let Some(image) = image {
            form = form.part("file", image.into_part()?);
        }
        self.post_multipart("community/post", form, idempotency_key)
            .await
    }

    /// File a disaster report.
    pub async fn report_disaster(
        &self,
        report: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<SubmitResponse, Error> {
        self.post_json("disaster", report, idempotency_key).await
    }

    /// Open a support ticket.
    pub async fn create_ticket(
        &self,
        ticket: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<SubmitResponse, Error> {
        self.post_json("tickets", ticket, idempotency_key).await
    }

    /// Push background log actions collected while offline.
    pub async fn push_offline_actions(
        &self,
        actions: &[serde_json::Value],
        idempotency_key: &str,
    ) -> Result<SubmitResponse, Error> {
        let body = serde_json::json!({ "offlineActions": actions });
        self.post_json("offline/push", &body, idempotency_key).await
    }
}

// ── Response handling ────────────────────────────────────────────────

fn normalize_base_url(raw: &str) -> Result<Url, Error> {
    let mut url = Url::parse(raw)?;
    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{path}/"));
    Ok(url)
}

async fn handle_submit(resp: reqwest::Response) -> Result<SubmitResponse, Error> {
    let status = resp.status();
    if !status.is_success() {
        return Err(parse_error(status, resp).await);
    }

    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Ok(SubmitResponse::default());
    }

    // The write is committed once the status is 2xx; an unreadable receipt
    // must not turn it into a retry.
    let receipt: SubmitResponse = match serde_json::from_str(&body) {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!(status = %status, error = %e, body = %preview(&body), "unreadable receipt for accepted write");
            return Ok(SubmitResponse::default());
        }
    };

    if receipt.success {
        Ok(receipt)
    } else {
        Err(Error::Rejected {
            message: receipt
                .message
                .unwrap_or_else(|| "backend reported success: false".into()),
        })
    }
}

fn parse_body(body: String) -> Result<serde_json::Value, Error> {
    serde_json::from_str(&body).map_err(|e| {
        Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body: body.clone(),
        }
    })
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let raw = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&raw)
        .ok()
        .and_then(|e| e.message.or(e.error))
        .unwrap_or_else(|| {
            if raw.is_empty() {
                status.to_string()
            } else {
                preview(&raw)
            }
        });

    if status == reqwest::StatusCode::UNAUTHORIZED {
        Error::Authentication { message }
    } else {
        Error::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_always_gets_trailing_slash() {
        let url = normalize_base_url("https://api.example.com/api").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/api/");
        assert_eq!(
            url.join("missions/m1/submit").unwrap().as_str(),
            "https://api.example.com/api/missions/m1/submit"
        );
    }

    #[test]
    fn submit_response_accepts_id_alias() {
        let receipt: SubmitResponse =
            serde_json::from_str(r#"{"success":true,"id":"post-9"}"#).unwrap();
        assert_eq!(receipt.entity_id.as_deref(), Some("post-9"));
    }

    #[test]
    fn submit_response_lifts_nested_record_id() {
        let receipt: SubmitResponse = serde_json::from_str(
            r#"{"success":true,"message":"Ticket created","ticket":{"id":"TKT-1024","status":"open"}}"#,
        )
        .unwrap();
        assert_eq!(receipt.entity_id.as_deref(), Some("TKT-1024"));

        let receipt: SubmitResponse =
            serde_json::from_str(r#"{"success":true,"request":{"id":17}}"#).unwrap();
        assert_eq!(receipt.entity_id.as_deref(), Some("17"));

        let receipt: SubmitResponse =
            serde_json::from_str(r#"{"entityId":"top","submission":{"id":"nested"}}"#).unwrap();
        assert_eq!(receipt.entity_id.as_deref(), Some("top"));
    }

    #[test]
    fn submit_response_defaults_to_success() {
        let receipt: SubmitResponse = serde_json::from_str(r#"{"entityId":"t-1"}"#).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.entity_id.as_deref(), Some("t-1"));
    }
}
