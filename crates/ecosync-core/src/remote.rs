// ── External collaborator seams ──
//
// The engine talks to the outside world through two traits: `RemoteApi`
// (write submission + REST aggregates) and `FeedSource` (live document
// feeds). Production implementations wrap `ecosync_api`; tests swap in
// scripted doubles.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ecosync_api::{ApiClient, FeedClient, FeedEvent, FeedQuery, Upload};

use crate::error::CoreError;
use crate::queue::{Attachment, MutationPayload, OpType};

/// What the backend returned for an accepted write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Id of the entity the write created, when the backend reports one.
    pub entity_id: Option<String>,
}

/// The backend REST API, as the engine needs it.
pub trait RemoteApi: Send + Sync + 'static {
    /// Submit one write. `idempotency_key` is the mutation id; the
    /// backend must treat a repeated key as a no-op returning the
    /// original result.
    fn submit<'a>(
        &'a self,
        op_type: OpType,
        payload: &'a MutationPayload,
        idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<SubmitReceipt, CoreError>>;

    /// GET an aggregate resource (e.g. the gamification dashboard).
    fn fetch_aggregate<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Value, CoreError>>;
}

/// Push-based live feeds from the remote document store.
pub trait FeedSource: Send + Sync + 'static {
    /// Open a feed for `query`. Every event carries the complete current
    /// result set. The feed closes when `cancel` fires.
    fn open(&self, query: FeedQuery, cancel: CancellationToken) -> mpsc::Receiver<FeedEvent>;
}

// ── Production implementations ───────────────────────────────────────

impl RemoteApi for ApiClient {
    fn submit<'a>(
        &'a self,
        op_type: OpType,
        payload: &'a MutationPayload,
        idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<SubmitReceipt, CoreError>> {
        async move {
            debug!(%op_type, key = idempotency_key, "submitting mutation");
            let receipt = route_mutation(self, op_type, payload, idempotency_key).await?;
            Ok(SubmitReceipt {
                entity_id: receipt.entity_id,
            })
        }
        .boxed()
    }

    fn fetch_aggregate<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Value, CoreError>> {
        async move { Ok(self.get_json(path).await?) }.boxed()
    }
}

impl FeedSource for FeedClient {
    fn open(&self, query: FeedQuery, cancel: CancellationToken) -> mpsc::Receiver<FeedEvent> {
        self.subscribe(query, cancel)
    }
}

/// Map an op type onto its backend route.
async fn route_mutation(
    client: &ApiClient,
    op_type: OpType,
    payload: &MutationPayload,
    key: &str,
) -> Result<ecosync_api::SubmitResponse, CoreError> {
    let receipt = match op_type {
        OpType::MissionProof => {
            let mission_id =
                payload
                    .field("missionId")
                    .ok_or_else(|| CoreError::ValidationFailed {
                        message: "mission proof has no missionId".into(),
                    })?;
            let image = payload
                .attachment
                .clone()
                .map(|a| to_upload(a, "proof.jpg"));
            client
                .submit_mission_proof(mission_id, payload.field("notes"), image, key)
                .await?
        }
        OpType::CommunityPost => {
            let content = payload.field("content").unwrap_or_default();
            if content.is_empty() && payload.attachment.is_none() {
                return Err(CoreError::ValidationFailed {
                    message: "community post has neither content nor image".into(),
                });
            }
            let image = payload
                .attachment
                .clone()
                .map(|a| to_upload(a, "post-image.jpg"));
            client.create_community_post(content, image, key).await?
        }
        OpType::DisasterReport => client.report_disaster(&inline_photo(payload), key).await?,
        OpType::TicketCreate => client.create_ticket(&inline_photo(payload), key).await?,
        OpType::Log => {
            client
                .push_offline_actions(std::slice::from_ref(&payload.body), key)
                .await?
        }
    };
    Ok(receipt)
}

fn to_upload(attachment: Attachment, default_name: &str) -> Upload {
    let file_name = if attachment.file_name.is_empty() {
        default_name.to_owned()
    } else {
        attachment.file_name
    };
    Upload {
        file_name,
        content_type: attachment.content_type,
        bytes: attachment.data,
    }
}

/// JSON routes carry their photo inline as a data URL.
fn inline_photo(payload: &MutationPayload) -> Value {
    let mut body = payload.body.clone();
    if let (Some(attachment), Some(obj)) = (&payload.attachment, body.as_object_mut()) {
        if obj.get("photo").is_none_or(Value::is_null) {
            obj.insert(
                "photo".into(),
                Value::String(format!(
                    "data:{};base64,{}",
                    attachment.content_type,
                    BASE64.encode(&attachment.data)
                )),
            );
        }
    }
    body
}
