//! Tests for the transformation engine

use super::*;
use crate::pagination::PageCursor;
use crate::store::NewEntity;
use pretty_assertions::assert_eq;
use serde_json::json;

fn store() -> StagingStore {
    StagingStore::in_memory().unwrap()
}

fn stage(store: &StagingStore, entity_type: EntityType, entities: Vec<NewEntity>) {
    store
        .commit_page(entity_type, &entities, &PageCursor::new())
        .unwrap();
}

fn case_rules() -> MappingRuleSet {
    serde_yaml::from_str(
        r"
fields:
  - dest: name
    source: $.name
    required: true
relationships:
  - ref: folder
    dest: parent_id
    required: false
required: [name]
",
    )
    .unwrap()
}

fn execution_rules() -> MappingRuleSet {
    serde_yaml::from_str(
        r"
fields:
  - dest: name
    template: 'Run of {{ field.testCase.key }}'
    required: true
  - dest: status
    source: $.status.name
    translate:
      Pass: PASSED
      Fail: FAILED
    default: NOT_RUN
relationships:
  - ref: test_case
    dest: test_case_id
required: [name, test_case_id]
",
    )
    .unwrap()
}

fn execution(id: &str, case_id: &str) -> NewEntity {
    NewEntity::new(
        id,
        json!({"testCase": {"key": case_id}, "status": {"name": "Pass"}}),
    )
    .with_refs(vec![EntityRef::new(EntityType::TestCase, case_id)])
}

#[test]
fn test_entity_without_relationships_transforms() {
    let store = store();
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))],
    );

    let transformer = Transformer::new(&store, EntityType::TestCase, case_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.transformed, 1);
    assert!(stats.made_progress());

    let entity = store.entity(EntityType::TestCase, "TC-1").unwrap().unwrap();
    assert_eq!(entity.status, EntityStatus::Transformed);
    assert_eq!(entity.transformed_payload, Some(json!({"name": "Login"})));
}

#[test]
fn test_uncorrelated_parent_defers() {
    let store = store();
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))],
    );
    stage(&store, EntityType::Execution, vec![execution("E-1", "TC-1")]);

    let transformer = Transformer::new(&store, EntityType::Execution, execution_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.transformed, 0);

    // Still staged, eligible for the next pass
    assert_eq!(
        store.entity_status(EntityType::Execution, "E-1").unwrap(),
        Some(EntityStatus::Staged)
    );
}

#[test]
fn test_correlated_parent_resolves_to_dest_id() {
    let store = store();
    stage(&store, EntityType::Execution, vec![execution("E-1", "TC-1")]);
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))],
    );
    store.mark_loaded(EntityType::TestCase, "TC-1").unwrap();
    store
        .insert_correlation(EntityType::TestCase, "TC-1", "9001")
        .unwrap();

    let transformer = Transformer::new(&store, EntityType::Execution, execution_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.transformed, 1);

    let entity = store.entity(EntityType::Execution, "E-1").unwrap().unwrap();
    assert_eq!(
        entity.transformed_payload,
        Some(json!({
            "name": "Run of TC-1",
            "status": "PASSED",
            "test_case_id": 9001
        }))
    );
}

#[test]
fn test_failed_parent_fails_child() {
    let store = store();
    stage(&store, EntityType::Execution, vec![execution("E-1", "TC-1")]);
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))],
    );
    store
        .mark_failed(EntityType::TestCase, "TC-1", "rejected upstream")
        .unwrap();

    let transformer = Transformer::new(&store, EntityType::Execution, execution_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.failed, 1);

    let entity = store.entity(EntityType::Execution, "E-1").unwrap().unwrap();
    assert_eq!(entity.status, EntityStatus::Failed);
    assert!(entity.failure_reason.unwrap().contains("TC-1"));
}

#[test]
fn test_never_extracted_parent_fails_child() {
    let store = store();
    stage(&store, EntityType::Execution, vec![execution("E-1", "TC-404")]);

    let transformer = Transformer::new(&store, EntityType::Execution, execution_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.failed, 1);

    let entity = store.entity(EntityType::Execution, "E-1").unwrap().unwrap();
    assert!(entity.failure_reason.unwrap().contains("never extracted"));
}

#[test]
fn test_failed_parent_type_fails_child() {
    let store = store();
    stage(&store, EntityType::Execution, vec![execution("E-1", "TC-1")]);
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))],
    );
    store
        .mark_type_failed(EntityType::TestCase, "extraction exhausted retries")
        .unwrap();

    let transformer = Transformer::new(&store, EntityType::Execution, execution_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.failed, 1);

    let entity = store.entity(EntityType::Execution, "E-1").unwrap().unwrap();
    assert!(entity.failure_reason.unwrap().contains("failed entity type"));
}

#[test]
fn test_missing_required_reference_fails() {
    let store = store();
    // Execution extracted without a test case reference at all
    stage(
        &store,
        EntityType::Execution,
        vec![NewEntity::new(
            "E-1",
            json!({"testCase": {"key": "TC-1"}, "status": {"name": "Pass"}}),
        )],
    );

    let transformer = Transformer::new(&store, EntityType::Execution, execution_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.failed, 1);

    let entity = store.entity(EntityType::Execution, "E-1").unwrap().unwrap();
    assert!(entity.failure_reason.unwrap().contains("test_case"));
}

#[test]
fn test_validation_failure_marks_entity_failed() {
    let store = store();
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"objective": "no name here"}))],
    );

    let transformer = Transformer::new(&store, EntityType::TestCase, case_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.failed, 1);

    let entity = store.entity(EntityType::TestCase, "TC-1").unwrap().unwrap();
    assert_eq!(entity.status, EntityStatus::Failed);
    assert!(entity.failure_reason.unwrap().contains("name"));
}

#[test]
fn test_optional_reference_absent_is_fine() {
    let store = store();
    // Root folder: no parent reference
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))],
    );

    let transformer = Transformer::new(&store, EntityType::TestCase, case_rules());
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.transformed, 1);

    let entity = store.entity(EntityType::TestCase, "TC-1").unwrap().unwrap();
    assert_eq!(entity.transformed_payload, Some(json!({"name": "Login"})));
}

#[test]
fn test_optional_reference_present_still_defers() {
    let store = store();
    stage(
        &store,
        EntityType::Folder,
        vec![NewEntity::new("F-1", json!({"name": "Root"}))],
    );
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))
            .with_refs(vec![EntityRef::new(EntityType::Folder, "F-1")])],
    );

    let transformer = Transformer::new(&store, EntityType::TestCase, case_rules());
    let stats = transformer.run_pass().unwrap();
    // The folder reference is optional, but since it exists it must resolve
    assert_eq!(stats.deferred, 1);
}

#[test]
fn test_within_type_hierarchy_resolves_across_passes() {
    let store = store();
    let folder_rules: MappingRuleSet = serde_yaml::from_str(
        r"
fields:
  - dest: name
    source: $.name
    required: true
relationships:
  - ref: folder
    dest: parent_id
    required: false
required: [name]
",
    )
    .unwrap();

    stage(
        &store,
        EntityType::Folder,
        vec![
            NewEntity::new("F-1", json!({"name": "Root"})),
            NewEntity::new("F-2", json!({"name": "Child"}))
                .with_refs(vec![EntityRef::new(EntityType::Folder, "F-1")]),
        ],
    );

    let transformer = Transformer::new(&store, EntityType::Folder, folder_rules);
    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.transformed, 1);
    assert_eq!(stats.deferred, 1);

    // The root folder gets loaded, producing its correlation
    store.mark_loaded(EntityType::Folder, "F-1").unwrap();
    store
        .insert_correlation(EntityType::Folder, "F-1", "500")
        .unwrap();

    let stats = transformer.run_pass().unwrap();
    assert_eq!(stats.transformed, 1);
    let child = store.entity(EntityType::Folder, "F-2").unwrap().unwrap();
    assert_eq!(
        child.transformed_payload,
        Some(json!({"name": "Child", "parent_id": 500}))
    );
}

#[test]
fn test_dest_type_field_written_alongside_id() {
    let store = store();
    let rules: MappingRuleSet = serde_yaml::from_str(
        r"
fields:
  - dest: name
    source: $.filename
    required: true
relationships:
  - ref: test_case
    dest: parent_id
    dest_type_field: parent_type
    required: false
required: [name, parent_id]
",
    )
    .unwrap();

    stage(
        &store,
        EntityType::Attachment,
        vec![NewEntity::new("A-1", json!({"filename": "log.txt"}))
            .with_refs(vec![EntityRef::new(EntityType::TestCase, "TC-1")])],
    );
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))],
    );
    store.mark_loaded(EntityType::TestCase, "TC-1").unwrap();
    store
        .insert_correlation(EntityType::TestCase, "TC-1", "9001")
        .unwrap();

    let transformer = Transformer::new(&store, EntityType::Attachment, rules);
    transformer.run_pass().unwrap();

    let entity = store.entity(EntityType::Attachment, "A-1").unwrap().unwrap();
    assert_eq!(
        entity.transformed_payload,
        Some(json!({
            "name": "log.txt",
            "parent_id": 9001,
            "parent_type": "test_case"
        }))
    );
}

#[test]
fn test_fail_unresolved_names_the_blocker() {
    let store = store();
    stage(&store, EntityType::Execution, vec![execution("E-1", "TC-1")]);
    stage(
        &store,
        EntityType::TestCase,
        vec![NewEntity::new("TC-1", json!({"name": "Login"}))],
    );

    let transformer = Transformer::new(&store, EntityType::Execution, execution_rules());
    // TC-1 never loads; the pass loop has settled
    let failed = transformer.fail_unresolved().unwrap();
    assert_eq!(failed, 1);

    let entity = store.entity(EntityType::Execution, "E-1").unwrap().unwrap();
    assert_eq!(entity.status, EntityStatus::Failed);
    let reason = entity.failure_reason.unwrap();
    assert!(reason.contains("unresolved dependency"));
    assert!(reason.contains("TC-1"));
}
