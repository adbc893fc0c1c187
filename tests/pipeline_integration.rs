//! End-to-end migration tests against mock HTTP servers
//!
//! Drives the full pipeline: source listings staged into SQLite, mapping
//! rules applied, entities created in the destination with correlated
//! parent IDs, and a rerun resuming from the staging store.

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use testshift::config::MigrationConfig;
use testshift::pipeline::Orchestrator;
use testshift::store::StagingStore;
use testshift::types::{CancelToken, EntityStatus, EntityType, Phase, RunOutcome};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_yaml(source_uri: &str, dest_uri: &str, workdir: &Path) -> String {
    format!(
        r#"
source:
  platform: zephyr
  base_url: {source_uri}
  project: DEMO
  rate_limit: {{ requests_per_second: 1000, burst: 1000 }}
  http: {{ max_retries: 0 }}
destination:
  platform: qtest
  base_url: {dest_uri}
  project: "77"
  rate_limit: {{ requests_per_second: 1000, burst: 1000 }}
  http: {{ max_retries: 0 }}
migration:
  workdir: {workdir}
  batch_size: 10
  max_transform_passes: 5
  entity_types: [folder, test_case, cycle, execution]
"#,
        workdir = workdir.display(),
    )
}

async fn mock_listing(server: &MockServer, listing_path: &str, values: serde_json::Value) {
    let total = values.as_array().map_or(0, Vec::len);
    Mock::given(method("GET"))
        .and(path(listing_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": values,
            "total": total,
        })))
        .mount(server)
        .await;
}

/// One cycle, one test case, one execution referencing both
async fn mount_source_fixtures(source: &MockServer) {
    mock_listing(source, "/folders", json!([])).await;
    mock_listing(
        source,
        "/testcases",
        json!([{"key": "TC-1", "name": "Login works"}]),
    )
    .await;
    mock_listing(
        source,
        "/testcycles",
        json!([{"key": "CY-1", "name": "Sprint 1 regression"}]),
    )
    .await;
    mock_listing(
        source,
        "/testexecutions",
        json!([{
            "id": 11,
            "testCase": {"key": "TC-1"},
            "testCycle": {"key": "CY-1"},
            "testExecutionStatus": {"name": "Pass"},
            "actualEndDate": "2024-05-02T10:00:00Z",
        }]),
    )
    .await;
}

#[tokio::test]
async fn test_full_migration_correlates_execution_parents() {
    let source = MockServer::start().await;
    let dest = MockServer::start().await;
    let workdir = tempfile::tempdir().unwrap();
    mount_source_fixtures(&source).await;

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001})))
        .expect(1)
        .mount(&dest)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/77/test-cycles"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 8001})))
        .expect(1)
        .mount(&dest)
        .await;
    // The run create must carry the destination IDs minted above.
    Mock::given(method("POST"))
        .and(path("/projects/77/test-runs"))
        .and(body_json(json!({
            "name": "Run of TC-1",
            "status": "PASSED",
            "executed_date": "2024-05-02T10:00:00Z",
            "test_case_id": 9001,
            "test_cycle_id": 8001,
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7001})))
        .expect(1)
        .mount(&dest)
        .await;

    let config =
        MigrationConfig::from_yaml(&config_yaml(&source.uri(), &dest.uri(), workdir.path()))
            .unwrap();
    let store = Arc::new(StagingStore::open(config.migration.staging_db_path()).unwrap());
    let orchestrator = Orchestrator::new(config, Arc::clone(&store), CancelToken::new());

    let report = orchestrator.migrate().await.unwrap();

    assert!(report.clean(), "report: {}", report.render_text());
    assert_eq!(report.total_loaded(), 3);
    assert_eq!(
        store.correlation(EntityType::TestCase, "TC-1").unwrap(),
        Some("9001".to_string())
    );
    assert_eq!(
        store.correlation(EntityType::Cycle, "CY-1").unwrap(),
        Some("8001".to_string())
    );
    assert_eq!(
        store.correlation(EntityType::Execution, "11").unwrap(),
        Some("7001".to_string())
    );
    for entity_type in [
        EntityType::Folder,
        EntityType::TestCase,
        EntityType::Cycle,
        EntityType::Execution,
    ] {
        let cp = store.checkpoint(entity_type).unwrap().unwrap();
        assert_eq!(cp.phase, Phase::Done, "{entity_type} should be done");
    }
    let runs = store.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunOutcome::Completed);
}

#[tokio::test]
async fn test_resume_retries_only_the_rejected_entity() {
    let source = MockServer::start().await;
    let dest = MockServer::start().await;
    let workdir = tempfile::tempdir().unwrap();
    mount_source_fixtures(&source).await;

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001})))
        .mount(&dest)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/77/test-cycles"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 8001})))
        .mount(&dest)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/77/test-runs"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "status not allowed"})),
        )
        .mount(&dest)
        .await;

    let yaml = config_yaml(&source.uri(), &dest.uri(), workdir.path());
    let config = MigrationConfig::from_yaml(&yaml).unwrap();
    let db_path = config.migration.staging_db_path();

    {
        let store = Arc::new(StagingStore::open(&db_path).unwrap());
        let orchestrator = Orchestrator::new(config, Arc::clone(&store), CancelToken::new());
        let report = orchestrator.migrate().await.unwrap();

        assert_eq!(report.total_loaded(), 2);
        assert_eq!(report.total_failed(), 1);
        let failures = store.failures().unwrap();
        assert_eq!(failures[0].entity_type, EntityType::Execution);
        assert_eq!(failures[0].source_id, "11");
        assert!(failures[0].reason.contains("400"));
        assert_eq!(
            store.runs().unwrap()[0].status,
            RunOutcome::PartiallyCompleted
        );
    }

    // Restart: only the run create may be called again. Extraction is
    // checkpointed past extract and the other creates are correlated,
    // so any stray request would 404 and fail the run.
    source.reset().await;
    dest.reset().await;
    Mock::given(method("POST"))
        .and(path("/projects/77/test-runs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7001})))
        .expect(1)
        .mount(&dest)
        .await;

    let config = MigrationConfig::from_yaml(&yaml).unwrap();
    let store = Arc::new(StagingStore::open(&db_path).unwrap());
    let orchestrator = Orchestrator::new(config, Arc::clone(&store), CancelToken::new());
    let report = orchestrator.migrate().await.unwrap();

    assert!(report.clean(), "report: {}", report.render_text());
    assert!(source.received_requests().await.unwrap().is_empty());
    assert_eq!(
        store.correlation(EntityType::TestCase, "TC-1").unwrap(),
        Some("9001".to_string())
    );
    assert_eq!(
        store.correlation(EntityType::Execution, "11").unwrap(),
        Some("7001".to_string())
    );
    let entity = store.entity(EntityType::Execution, "11").unwrap().unwrap();
    assert_eq!(entity.status, EntityStatus::Loaded);
    let runs = store.runs().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].status, RunOutcome::Completed);
}
