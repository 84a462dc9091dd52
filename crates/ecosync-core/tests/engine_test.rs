//! End-to-end tests: the engine against a mocked backend over real HTTP.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ecosync_api::{ApiClient, IDEMPOTENCY_HEADER};
use ecosync_core::{
    Connectivity, DrainOutcome, EngineConfig, EngineParts, EntityType, FeedEvent, FeedQuery,
    FeedSource, FileStore, MemoryStore, MutationPayload, MutationStatus, OpType, SubmitOutcome,
    SyncEngine, Tier,
};

/// Live feeds are not under test here: every feed closes at once.
struct ClosedFeeds;

impl FeedSource for ClosedFeeds {
    fn open(&self, _query: FeedQuery, _cancel: CancellationToken) -> mpsc::Receiver<FeedEvent> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}

fn config(server: &MockServer, background_drain: bool) -> EngineConfig {
    let api_url = server.uri().parse().unwrap();
    let feed_url = "ws://127.0.0.1:9/feed".parse().unwrap();
    let mut config = EngineConfig::new(api_url, feed_url);
    config.network_timeout = Duration::from_secs(5);
    config.persist_debounce = Duration::from_millis(10);
    config.background_drain = background_drain;
    config
}

fn parts(server: &MockServer, durable: Arc<dyn ecosync_core::DurableStore>) -> EngineParts {
    let api = ApiClient::with_client(reqwest::Client::new(), &server.uri()).unwrap();
    EngineParts {
        durable,
        remote: Arc::new(api),
        feeds: Arc::new(ClosedFeeds),
    }
}

fn disaster() -> MutationPayload {
    MutationPayload::json(json!({ "type": "flood", "severity": "high", "details": "river" }))
}

#[tokio::test]
async fn offline_write_is_delivered_after_reconnect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/disaster"))
        .and(header_exists(IDEMPOTENCY_HEADER))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "entityId": "d-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = SyncEngine::start_with(
        config(&server, true),
        parts(&server, Arc::new(MemoryStore::new())),
    )
    .await
    .unwrap();

    let id = engine
        .enqueue(OpType::DisasterReport, disaster(), None)
        .await
        .unwrap();
    assert_eq!(engine.queue_counts().await.pending, 1);

    let mut counts = engine.queue().subscribe_counts();
    engine.set_connectivity(Connectivity::Online);
    tokio::time::timeout(Duration::from_secs(5), counts.wait_for(|c| c.total() == 0))
        .await
        .unwrap()
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get(IDEMPOTENCY_HEADER).unwrap().to_str().unwrap(),
        id.to_string()
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn transient_failure_is_retried_with_the_same_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "t-7" })))
        .mount(&server)
        .await;

    let engine = SyncEngine::start_with(
        config(&server, false),
        parts(&server, Arc::new(MemoryStore::new())),
    )
    .await
    .unwrap();
    engine.set_connectivity(Connectivity::Online);

    let id = engine
        .enqueue(
            OpType::TicketCreate,
            MutationPayload::json(json!({ "subject": "Pump broken" })),
            None,
        )
        .await
        .unwrap();

    let first = engine.drain_once().await.unwrap();
    assert!(
        matches!(first, DrainOutcome::Retrying { id: retry_id, attempts: 1, .. } if retry_id == id),
        "unexpected outcome: {first:?}"
    );
    let head = engine.queue().head().await.unwrap();
    assert_eq!(head.id, id);
    assert_eq!(head.status, MutationStatus::Pending);

    let second = engine.drain_once().await.unwrap();
    assert_eq!(
        second,
        DrainOutcome::Delivered {
            id,
            entity_id: Some("t-7".into())
        }
    );

    let keys: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.headers.get(IDEMPOTENCY_HEADER).unwrap().to_str().unwrap().to_owned())
        .collect();
    assert_eq!(keys, vec![id.to_string(), id.to_string()]);

    engine.shutdown().await;
}

#[tokio::test]
async fn validation_rejection_becomes_a_sync_issue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/disaster"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "severity is required" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = SyncEngine::start_with(
        config(&server, false),
        parts(&server, Arc::new(MemoryStore::new())),
    )
    .await
    .unwrap();
    engine.set_connectivity(Connectivity::Online);

    let id = engine
        .enqueue(OpType::DisasterReport, disaster(), None)
        .await
        .unwrap();
    let outcomes = engine.drain_all().await.unwrap();
    assert!(matches!(outcomes.first(), Some(DrainOutcome::Failed { id: failed, .. }) if *failed == id));

    let issues = engine.list_failed().await;
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].attempts, 1);
    assert!(
        issues[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("severity is required")
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn direct_submit_goes_straight_to_the_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/community/post"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "entityId": "p-3" })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = SyncEngine::start_with(
        config(&server, false),
        parts(&server, Arc::new(MemoryStore::new())),
    )
    .await
    .unwrap();
    engine.set_connectivity(Connectivity::Online);

    let outcome = engine
        .submit_or_enqueue(
            OpType::CommunityPost,
            MutationPayload::json(json!({ "content": "First harvest!" })),
            None,
        )
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Delivered { ref entity_id, .. } if entity_id.as_deref() == Some("p-3")
    ));
    assert_eq!(engine.queue_counts().await.total(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn network_tier_resolves_missions_from_the_dashboard() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gamification/dashboard"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "missions": [
                { "id": "m1", "title": "Plant trees", "status": "active", "points": 50 },
                { "id": "m2", "title": "Compost", "status": "completed", "points": 20 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = SyncEngine::start_with(
        config(&server, false),
        parts(&server, Arc::new(MemoryStore::new())),
    )
    .await
    .unwrap();
    engine.store().set_owner(Some("u1".into()));
    engine.set_connectivity(Connectivity::Online);

    let first = engine.resolve_entity("m2", EntityType::Mission).await;
    assert_eq!(first.tier(), Some(Tier::Network));

    // The aggregate was cached: the second lookup never hits the server.
    let second = engine.resolve_entity("m2", EntityType::Mission).await;
    assert_eq!(second.tier(), Some(Tier::Cache));

    let stats = engine.reader_stats();
    assert_eq!(stats.network_fetches, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn queue_survives_restart_on_disk() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let durable = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let engine = SyncEngine::start_with(config(&server, false), parts(&server, durable))
        .await
        .unwrap();
    let id = engine
        .enqueue(OpType::Log, MutationPayload::json(json!({ "event": "open" })), None)
        .await
        .unwrap();
    engine.shutdown().await;

    let durable = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let engine = SyncEngine::start_with(config(&server, false), parts(&server, durable))
        .await
        .unwrap();
    let records = engine.queue().list_all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert_eq!(records[0].op_type, OpType::Log);
    assert_eq!(records[0].status, MutationStatus::Pending);

    engine.shutdown().await;
}
