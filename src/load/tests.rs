//! Tests for the loading service

use super::*;
use crate::http::{HttpClient, HttpClientConfig};
use crate::pagination::PageCursor;
use crate::platforms;
use crate::store::NewEntity;
use serde_json::json;
use wiremock::matchers::{body_json, body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dest_api(server: &MockServer) -> Arc<DestinationApi> {
    let client = HttpClient::with_config(
        HttpClientConfig::builder()
            .base_url(server.uri())
            .no_rate_limit()
            .build(),
    );
    Arc::new(DestinationApi::new(client, "77"))
}

fn store() -> Arc<StagingStore> {
    Arc::new(StagingStore::in_memory().unwrap())
}

fn endpoints(entity_type: EntityType) -> crate::platforms::EntityEndpoints {
    platforms::profile("qtest").unwrap().entities[&entity_type].clone()
}

fn loader(server: &MockServer, store: &Arc<StagingStore>, max_rollback_retries: u32) -> Loader {
    Loader::new(
        dest_api(server),
        Arc::clone(store),
        50,
        max_rollback_retries,
        CancelToken::new(),
    )
}

/// Stage an entity and move it straight to `transformed`
fn transformed(store: &StagingStore, entity_type: EntityType, id: &str, payload: Value) {
    store
        .commit_page(
            entity_type,
            &[NewEntity::new(id, json!({"id": id}))],
            &PageCursor::new(),
        )
        .unwrap();
    store.mark_transformed(entity_type, id, &payload).unwrap();
}

#[tokio::test]
async fn test_load_creates_and_correlates() {
    let server = MockServer::start().await;
    let store = store();
    transformed(&store, EntityType::TestCase, "TC-1", json!({"name": "A"}));
    transformed(&store, EntityType::TestCase, "TC-2", json!({"name": "B"}));

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "A"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "B"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9002})))
        .mount(&server)
        .await;

    let stats = loader(&server, &store, 3)
        .load_type(EntityType::TestCase, &endpoints(EntityType::TestCase))
        .await
        .unwrap();

    assert_eq!(stats.loaded, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        store.correlation(EntityType::TestCase, "TC-1").unwrap(),
        Some("9001".to_string())
    );
    assert_eq!(
        store.correlation(EntityType::TestCase, "TC-2").unwrap(),
        Some("9002".to_string())
    );
    assert_eq!(
        store.entity_status(EntityType::TestCase, "TC-1").unwrap(),
        Some(EntityStatus::Loaded)
    );
}

#[tokio::test]
async fn test_already_correlated_entity_is_skipped() {
    // No mock mounted: any request would 404 and count as a failure,
    // so a clean skip proves the loader never called out
    let server = MockServer::start().await;
    let store = store();
    transformed(&store, EntityType::TestCase, "TC-1", json!({"name": "A"}));
    store
        .insert_correlation(EntityType::TestCase, "TC-1", "9001")
        .unwrap();

    let stats = loader(&server, &store, 3)
        .load_type(EntityType::TestCase, &endpoints(EntityType::TestCase))
        .await
        .unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.loaded, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        store.entity_status(EntityType::TestCase, "TC-1").unwrap(),
        Some(EntityStatus::Loaded)
    );
}

#[tokio::test]
async fn test_rejected_entity_fails_and_load_continues() {
    let server = MockServer::start().await;
    let store = store();
    transformed(&store, EntityType::TestCase, "TC-1", json!({"name": "bad"}));
    transformed(&store, EntityType::TestCase, "TC-2", json!({"name": "good"}));

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "bad"})))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "name not allowed"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "good"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9002})))
        .mount(&server)
        .await;

    let stats = loader(&server, &store, 3)
        .load_type(EntityType::TestCase, &endpoints(EntityType::TestCase))
        .await
        .unwrap();

    assert_eq!(stats.loaded, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(
        store.entity_status(EntityType::TestCase, "TC-1").unwrap(),
        Some(EntityStatus::Failed)
    );
    assert!(store.correlation(EntityType::TestCase, "TC-1").unwrap().is_none());

    let failures = store.failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].source_id, "TC-1");
    assert!(failures[0].reason.contains("400"));
}

#[tokio::test]
async fn test_integrity_violation_rolls_back_batch() {
    let server = MockServer::start().await;
    let store = store();
    transformed(&store, EntityType::TestCase, "TC-1", json!({"name": "A"}));
    transformed(&store, EntityType::TestCase, "TC-2", json!({"name": "dup"}));

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "A"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "dup"})))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"message": "duplicate key"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/projects/77/test-cases/9001"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    // A single retry budget: the first rollback already exhausts it
    let stats = loader(&server, &store, 1)
        .load_type(EntityType::TestCase, &endpoints(EntityType::TestCase))
        .await
        .unwrap();

    assert_eq!(stats.rollbacks, 1);
    assert_eq!(stats.loaded, 0);
    assert_eq!(stats.failed, 2);
    assert!(store.correlation(EntityType::TestCase, "TC-1").unwrap().is_none());
    assert_eq!(
        store.entity_status(EntityType::TestCase, "TC-1").unwrap(),
        Some(EntityStatus::Failed)
    );
    assert_eq!(
        store.entity_status(EntityType::TestCase, "TC-2").unwrap(),
        Some(EntityStatus::Failed)
    );
}

#[tokio::test]
async fn test_rollback_then_retry_succeeds() {
    let server = MockServer::start().await;
    let store = store();
    transformed(&store, EntityType::TestCase, "TC-1", json!({"name": "A"}));
    transformed(&store, EntityType::TestCase, "TC-2", json!({"name": "B"}));

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "A"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001})))
        .mount(&server)
        .await;
    // First create of B hits a transient conflict, the retry goes through
    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "B"})))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "conflict"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .and(body_json(json!({"name": "B"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9002})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/projects/77/test-cases/9001"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let stats = loader(&server, &store, 3)
        .load_type(EntityType::TestCase, &endpoints(EntityType::TestCase))
        .await
        .unwrap();

    assert_eq!(stats.rollbacks, 1);
    assert_eq!(stats.loaded, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        store.correlation(EntityType::TestCase, "TC-1").unwrap(),
        Some("9001".to_string())
    );
    assert_eq!(
        store.correlation(EntityType::TestCase, "TC-2").unwrap(),
        Some("9002".to_string())
    );
}

#[tokio::test]
async fn test_attachment_uploads_staged_blob() {
    let server = MockServer::start().await;
    let store = store();

    let dir = tempfile::tempdir().unwrap();
    let blob = dir.path().join("501");
    std::fs::write(&blob, b"attached bytes").unwrap();

    transformed(
        &store,
        EntityType::Attachment,
        "501",
        json!({
            "name": "log.txt",
            "content_type": "text/plain",
            "file_path": blob.to_string_lossy(),
            "parent_id": 9001,
            "parent_type": "test_case"
        }),
    );

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases/9001/blob-handles"))
        .and(body_string("attached bytes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 321})))
        .mount(&server)
        .await;

    let stats = loader(&server, &store, 3)
        .load_type(EntityType::Attachment, &endpoints(EntityType::Attachment))
        .await
        .unwrap();

    assert_eq!(stats.loaded, 1);
    assert_eq!(
        store.correlation(EntityType::Attachment, "501").unwrap(),
        Some("321".to_string())
    );
}

#[tokio::test]
async fn test_attachment_routes_by_parent_type() {
    let server = MockServer::start().await;
    let store = store();

    let dir = tempfile::tempdir().unwrap();
    let blob = dir.path().join("502");
    std::fs::write(&blob, b"run output").unwrap();

    transformed(
        &store,
        EntityType::Attachment,
        "502",
        json!({
            "name": "run.log",
            "content_type": "text/plain",
            "file_path": blob.to_string_lossy(),
            "parent_id": 4242,
            "parent_type": "execution"
        }),
    );

    Mock::given(method("POST"))
        .and(path("/projects/77/test-runs/4242/blob-handles"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 322})))
        .mount(&server)
        .await;

    let stats = loader(&server, &store, 3)
        .load_type(EntityType::Attachment, &endpoints(EntityType::Attachment))
        .await
        .unwrap();
    assert_eq!(stats.loaded, 1);
}

#[tokio::test]
async fn test_missing_blob_fails_entity() {
    let server = MockServer::start().await;
    let store = store();
    transformed(
        &store,
        EntityType::Attachment,
        "501",
        json!({
            "name": "log.txt",
            "file_path": "/nonexistent/501",
            "parent_id": 9001,
            "parent_type": "test_case"
        }),
    );

    let stats = loader(&server, &store, 3)
        .load_type(EntityType::Attachment, &endpoints(EntityType::Attachment))
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    let failures = store.failures().unwrap();
    assert!(failures[0].reason.contains("unreadable"));
}

#[tokio::test]
async fn test_cancelled_loader_leaves_queue_untouched() {
    let server = MockServer::start().await;
    let store = store();
    transformed(&store, EntityType::TestCase, "TC-1", json!({"name": "A"}));

    let cancel = CancelToken::new();
    cancel.cancel();
    let loader = Loader::new(dest_api(&server), Arc::clone(&store), 50, 3, cancel);

    let stats = loader
        .load_type(EntityType::TestCase, &endpoints(EntityType::TestCase))
        .await
        .unwrap();

    assert_eq!(stats, LoadStats::default());
    assert_eq!(
        store.entity_status(EntityType::TestCase, "TC-1").unwrap(),
        Some(EntityStatus::Transformed)
    );
}
