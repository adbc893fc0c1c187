//! Tests for the API wrappers

use super::*;
use crate::http::HttpClientConfig;
use crate::pagination::{NextPage, PageCursor};
use crate::platforms;
use crate::types::{EntityRef, EntityType};
use serde_json::json;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpClient {
    HttpClient::with_config(
        HttpClientConfig::builder()
            .base_url(server.uri())
            .no_rate_limit()
            .build(),
    )
}

fn zephyr_endpoints(entity_type: EntityType) -> crate::platforms::EntityEndpoints {
    platforms::profile("zephyr").unwrap().entities[&entity_type].clone()
}

fn qtest_endpoints(entity_type: EntityType) -> crate::platforms::EntityEndpoints {
    platforms::profile("qtest").unwrap().entities[&entity_type].clone()
}

#[tokio::test]
async fn test_fetch_page_extracts_entities_and_refs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/testexecutions"))
        .and(query_param("projectKey", "PROJ"))
        .and(query_param("startAt", "0"))
        .and(query_param("maxResults", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                {
                    "id": 11,
                    "testCase": {"key": "PROJ-T1"},
                    "testCycle": {"key": "PROJ-C1"},
                    "testExecutionStatus": {"name": "Pass"}
                }
            ],
            "total": 1
        })))
        .mount(&server)
        .await;

    let api = SourceApi::new(client_for(&server), "PROJ");
    let endpoints = zephyr_endpoints(EntityType::Execution);
    let mut cursor = PageCursor::new();

    let (entities, next) = api
        .fetch_page(EntityType::Execution, &endpoints, &mut cursor)
        .await
        .unwrap();

    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].source_id, "11");
    assert_eq!(entities[0].parent_refs.len(), 2);
    assert_eq!(entities[0].parent_refs[0].entity_type, EntityType::TestCase);
    assert_eq!(entities[0].parent_refs[0].source_id, "PROJ-T1");
    assert_eq!(next, NextPage::Done);
    assert!(cursor.done);
}

#[tokio::test]
async fn test_fetch_page_resumes_from_cursor_offset() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/testcases"))
        .and(query_param("startAt", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [],
            "total": 100
        })))
        .mount(&server)
        .await;

    let api = SourceApi::new(client_for(&server), "PROJ");
    let endpoints = zephyr_endpoints(EntityType::TestCase);
    let mut cursor = PageCursor {
        offset: 100,
        ..PageCursor::new()
    };

    let (entities, next) = api
        .fetch_page(EntityType::TestCase, &endpoints, &mut cursor)
        .await
        .unwrap();
    assert!(entities.is_empty());
    assert_eq!(next, NextPage::Done);
}

#[tokio::test]
async fn test_fetch_page_skips_items_without_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/folders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                {"id": 1, "name": "Root"},
                {"name": "no id on this one"}
            ],
            "total": 2
        })))
        .mount(&server)
        .await;

    let api = SourceApi::new(client_for(&server), "PROJ");
    let endpoints = zephyr_endpoints(EntityType::Folder);
    let mut cursor = PageCursor::new();

    let (entities, _) = api
        .fetch_page(EntityType::Folder, &endpoints, &mut cursor)
        .await
        .unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].source_id, "1");
}

#[tokio::test]
async fn test_missing_list_endpoint_is_config_error() {
    let server = MockServer::start().await;
    let api = SourceApi::new(client_for(&server), "PROJ");
    // Attachments have per-parent listings only
    let endpoints = zephyr_endpoints(EntityType::Attachment);
    let mut cursor = PageCursor::new();

    let err = api
        .fetch_page(EntityType::Attachment, &endpoints, &mut cursor)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("attachment"));
}

#[tokio::test]
async fn test_list_children_injects_parent_ref() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/testcases/PROJ-T1/attachments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{"id": 501, "filename": "log.txt"}]
        })))
        .mount(&server)
        .await;

    let api = SourceApi::new(client_for(&server), "PROJ");
    let endpoints = zephyr_endpoints(EntityType::Attachment);
    let parent = EntityRef::new(EntityType::TestCase, "PROJ-T1");

    let children = api
        .list_children(
            EntityType::Attachment,
            &endpoints,
            &endpoints.list_per_parent[0],
            &parent,
        )
        .await
        .unwrap();

    assert_eq!(children.len(), 1);
    assert_eq!(children[0].source_id, "501");
    assert_eq!(children[0].parent_refs, vec![parent]);
}

#[tokio::test]
async fn test_download_streams_to_file() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/attachments/501"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"binary attachment data".to_vec()))
        .mount(&server)
        .await;

    let api = SourceApi::new(client_for(&server), "PROJ");
    let endpoints = zephyr_endpoints(EntityType::Attachment);
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("attachments").join("501");

    let written = api
        .download(endpoints.download.as_ref().unwrap(), "501", &target)
        .await
        .unwrap();

    assert_eq!(written, 22);
    assert_eq!(
        std::fs::read(&target).unwrap(),
        b"binary attachment data".to_vec()
    );
}

#[tokio::test]
async fn test_create_returns_destination_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 9001,
            "name": "Login works"
        })))
        .mount(&server)
        .await;

    let api = DestinationApi::new(client_for(&server), "77");
    let endpoints = qtest_endpoints(EntityType::TestCase);

    let dest_id = api
        .create(
            endpoints.create.as_ref().unwrap(),
            &json!({"name": "Login works"}),
        )
        .await
        .unwrap();
    assert_eq!(dest_id, "9001");
}

#[tokio::test]
async fn test_create_without_id_in_response_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let api = DestinationApi::new(client_for(&server), "77");
    let endpoints = qtest_endpoints(EntityType::TestCase);

    let err = api
        .create(endpoints.create.as_ref().unwrap(), &json!({"name": "x"}))
        .await
        .unwrap_err();
    assert!(err.is_entity_level());
}

#[tokio::test]
async fn test_upload_sends_raw_bytes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/projects/77/test-cases/9001/blob-handles"))
        .and(header("Content-Type", "text/plain"))
        .and(body_string("file content"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 321})))
        .mount(&server)
        .await;

    let api = DestinationApi::new(client_for(&server), "77");
    let endpoints = qtest_endpoints(EntityType::Attachment);

    let dest_id = api
        .upload(
            &endpoints.upload[0],
            "9001",
            "log.txt",
            "text/plain",
            bytes::Bytes::from_static(b"file content"),
        )
        .await
        .unwrap();
    assert_eq!(dest_id, "321");
}

#[tokio::test]
async fn test_delete_tolerates_missing_entity() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/projects/77/test-cases/9001"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = DestinationApi::new(client_for(&server), "77");
    let endpoints = qtest_endpoints(EntityType::TestCase);

    api.delete(endpoints.delete.as_ref().unwrap(), "9001")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_check_expected_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 77})))
        .mount(&server)
        .await;

    let api = DestinationApi::new(client_for(&server), "77");
    let check = platforms::profile("qtest").unwrap().check.clone().unwrap();
    api.check(&check).await.unwrap();
}
