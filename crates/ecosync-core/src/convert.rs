// ── Feed-to-domain conversions ──
//
// Raw documents from the live feed (and raw items from REST aggregates)
// are validated into typed records here, at the boundary. A malformed
// document is logged and dropped; it never reaches the store or cache.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use ecosync_api::Document;

use crate::store::StoreUpdate;
use crate::subscription::FeedKind;

// ── Helpers ────────────────────────────────────────────────────────

/// Flatten a document into one JSON object with its id under `"id"`.
///
/// The document id wins over any `id` field stored in the data.
fn document_value(doc: Document) -> Value {
    let mut data = doc.data;
    data.insert("id".into(), Value::String(doc.id));
    Value::Object(data)
}

/// Decode every value into `T`, dropping (and logging) the ones that
/// do not fit.
pub(crate) fn decode_values<T: DeserializeOwned>(
    label: &str,
    values: impl IntoIterator<Item = Value>,
) -> Vec<T> {
    let mut dropped = 0_usize;
    let decoded: Vec<T> = values
        .into_iter()
        .filter_map(|value| {
            let id = value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("<no id>")
                .to_owned();
            match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(collection = label, %id, error = %e, "dropping malformed document");
                    dropped += 1;
                    None
                }
            }
        })
        .collect();

    if dropped > 0 {
        warn!(collection = label, dropped, kept = decoded.len(), "snapshot had malformed documents");
    }
    decoded
}

// ── Public conversions ─────────────────────────────────────────────

/// Turn raw JSON items of one feed's entity type into a typed update.
pub fn update_from_values(kind: FeedKind, values: Vec<Value>) -> StoreUpdate {
    let label = kind.collection();
    match kind {
        FeedKind::Profile => StoreUpdate::Profile(decode_values(label, values).into_iter().next()),
        FeedKind::Missions => StoreUpdate::Missions(decode_values(label, values)),
        FeedKind::LearningProgress => StoreUpdate::LearningProgress(decode_values(label, values)),
        FeedKind::CommunityPosts => StoreUpdate::CommunityPosts(decode_values(label, values)),
        FeedKind::RecentFarmers => StoreUpdate::RecentFarmers(decode_values(label, values)),
        FeedKind::RecentActivity => StoreUpdate::RecentActivity(decode_values(label, values)),
    }
}

/// Turn a full feed snapshot into a typed update.
pub fn decode_snapshot(kind: FeedKind, documents: Vec<Document>) -> StoreUpdate {
    update_from_values(kind, documents.into_iter().map(document_value).collect())
}

/// Extract `field` (an array of entities) from a REST aggregate body.
///
/// A missing or non-array field yields an empty update.
pub fn decode_aggregate(kind: FeedKind, body: &Value, field: &str) -> StoreUpdate {
    let items = body
        .get(field)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    update_from_values(kind, items)
}
