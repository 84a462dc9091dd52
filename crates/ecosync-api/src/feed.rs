//! Live document feed with auto-reconnect.
//!
//! Opens one WebSocket per query against the document store's feed
//! endpoint, sends a `subscribe` frame, and forwards every materialized
//! result set through an [`mpsc`] channel. Each snapshot is the complete
//! current result set, never a diff. Reconnection with exponential
//! backoff + jitter is handled here, so consumers only ever see
//! snapshots and (informational) transport errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use ecosync_api::feed::{FeedClient, FeedQuery, FeedEvent, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = FeedClient::new("wss://feeds.example.com/v1/live".parse()?, None, ReconnectConfig::default());
//! let cancel = CancellationToken::new();
//! let mut rx = client.subscribe(FeedQuery::collection("user_missions").where_eq("userId", "u1"), cancel.clone());
//!
//! while let Some(FeedEvent::Snapshot(docs)) = rx.recv().await {
//!     println!("{} missions", docs.len());
//! }
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backoff::exponential_backoff;
use crate::error::Error;

const FEED_CHANNEL_CAPACITY: usize = 16;

// ── Query ────────────────────────────────────────────────────────────

/// Comparison applied by a [`FieldFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    In,
}

/// One `where` clause of a feed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

/// Result ordering of a feed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// A live query against one remote collection.
///
/// Either a single document (`doc_id`) or a filtered, optionally ordered
/// and limited collection query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FieldFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl FeedQuery {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            doc_id: None,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doc_id: Some(id.into()),
            ..Self::collection(collection)
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    pub fn where_in<V: Into<serde_json::Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            op: FilterOp::In,
            value: serde_json::Value::Array(values.into_iter().map(Into::into).collect()),
        });
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// A raw document as delivered by the feed: an id plus untyped fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Something the feed delivered to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The complete current result set of the query.
    Snapshot(Vec<Document>),
    /// A transport or server-side error. The feed keeps reconnecting;
    /// this is informational.
    Error(String),
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for feed reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── FeedClient ───────────────────────────────────────────────────────

/// Factory for live feeds against one feed endpoint.
#[derive(Debug, Clone)]
pub struct FeedClient {
    url: Url,
    token: Option<SecretString>,
    reconnect: ReconnectConfig,
}

impl FeedClient {
    pub fn new(url: Url, token: Option<SecretString>, reconnect: ReconnectConfig) -> Self {
        Self {
            url,
            token,
            reconnect,
        }
    }

    /// The feed endpoint URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Open a live feed for `query` and spawn its reconnection loop.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. The loop ends when `cancel` fires, when the receiver is
    /// dropped, or when `max_retries` is exhausted.
    pub fn subscribe(&self, query: FeedQuery, cancel: CancellationToken) -> mpsc::Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let client = self.clone();
        tokio::spawn(async move {
            feed_loop(client, query, tx, cancel).await;
        });
        rx
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → subscribe → read → on error, backoff → reconnect.
async fn feed_loop(
    client: FeedClient,
    query: FeedQuery,
    tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tx.closed() => break,
            result = connect_and_read(&client, &query, &tx, &cancel) => result,
        };

        match result {
            // Clean disconnect (server close frame or stream ended).
            Ok(()) => {
                if cancel.is_cancelled() {
                    break;
                }
                tracing::info!(collection = %query.collection, "feed disconnected cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, collection = %query.collection, "feed error");
                let _ = tx.try_send(FeedEvent::Error(e.to_string()));

                if let Some(max) = client.reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            collection = %query.collection,
                            "feed reconnection limit reached, giving up"
                        );
                        break;
                    }
                }

                let delay = exponential_backoff(
                    attempt,
                    client.reconnect.initial_delay,
                    client.reconnect.max_delay,
                );
                tracing::debug!(?delay, attempt, "waiting before feed reconnect");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                attempt = attempt.saturating_add(1);
            }
        }
    }

    tracing::debug!(collection = %query.collection, "feed loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one connection, send the subscribe frame, and forward
/// snapshots until the connection drops.
async fn connect_and_read(
    client: &FeedClient,
    query: &FeedQuery,
    tx: &mpsc::Sender<FeedEvent>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::debug!(url = %client.url, collection = %query.collection, "connecting feed");

    let uri: tungstenite::http::Uri = client
        .url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(ref token) = client.token {
        request = request.with_header("Authorization", format!("Bearer {}", token.expose_secret()));
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::to_string(&ClientFrame::Subscribe { query })
        .map_err(|e| Error::WebSocketConnect(format!("cannot encode subscribe frame: {e}")))?;
    write
        .send(tungstenite::Message::Text(subscribe.into()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!(collection = %query.collection, "feed connected");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(event) = parse_frame(&text) {
                            if tx.send(event).await.is_err() {
                                // Consumer went away; nothing left to do.
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) if cf.code != tungstenite::protocol::frame::coding::CloseCode::Normal => {
                                Err(Error::WebSocketClosed {
                                    code: u16::from(cf.code),
                                    reason: cf.reason.to_string(),
                                })
                            }
                            _ => Ok(()),
                        };
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        tracing::debug!("feed stream ended");
                        return Ok(());
                    }
                    // Ping/Pong/Binary/Frame -- tungstenite answers pings itself
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame<'a> {
    Subscribe { query: &'a FeedQuery },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerFrame {
    Snapshot {
        #[serde(default)]
        documents: Vec<Document>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Parse one server text frame into a feed event.
///
/// Unknown frame types (heartbeats, acks) and malformed JSON yield `None`.
fn parse_frame(text: &str) -> Option<FeedEvent> {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::Snapshot { documents }) => Some(FeedEvent::Snapshot(documents)),
        Ok(ServerFrame::Error { message }) => Some(FeedEvent::Error(
            message.unwrap_or_else(|| "unspecified feed error".into()),
        )),
        Ok(ServerFrame::Other) => None,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse feed frame");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn parse_snapshot_frame() {
        let raw = serde_json::json!({
            "type": "snapshot",
            "documents": [
                { "id": "m1", "data": { "status": "active", "userId": "u1" } },
                { "id": "m2", "data": { "status": "pending" } }
            ]
        });

        let Some(FeedEvent::Snapshot(docs)) = parse_frame(&raw.to_string()) else {
            panic!("expected snapshot");
        };
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "m1");
        assert_eq!(docs[0].data["status"], "active");
    }

    #[test]
    fn parse_empty_snapshot_frame() {
        let event = parse_frame(r#"{"type":"snapshot"}"#);
        assert_eq!(event, Some(FeedEvent::Snapshot(Vec::new())));
    }

    #[test]
    fn parse_error_frame() {
        let event = parse_frame(r#"{"type":"error","message":"permission denied"}"#);
        assert_eq!(event, Some(FeedEvent::Error("permission denied".into())));
    }

    #[test]
    fn heartbeat_and_garbage_are_ignored() {
        assert_eq!(parse_frame(r#"{"type":"heartbeat"}"#), None);
        assert_eq!(parse_frame("not json at all"), None);
    }

    #[test]
    fn subscribe_frame_shape() {
        let query = FeedQuery::collection("communityPosts")
            .where_eq("authorId", "u1")
            .order_by_desc("createdAt")
            .limit(20);
        let frame = serde_json::to_value(ClientFrame::Subscribe { query: &query }).unwrap();

        assert_eq!(
            frame,
            serde_json::json!({
                "type": "subscribe",
                "query": {
                    "collection": "communityPosts",
                    "filters": [{ "field": "authorId", "op": "eq", "value": "u1" }],
                    "orderBy": { "field": "createdAt", "descending": true },
                    "limit": 20
                }
            })
        );
    }

    #[test]
    fn where_in_builds_array_value() {
        let query = FeedQuery::collection("user_missions")
            .where_in("status", ["pending_verification", "completed"]);
        assert_eq!(query.filters[0].op, FilterOp::In);
        assert_eq!(
            query.filters[0].value,
            serde_json::json!(["pending_verification", "completed"])
        );
    }
}
