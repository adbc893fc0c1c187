//! Built-in platform profiles
//!
//! A profile describes how one platform exposes each entity type: listing
//! endpoints with their pagination dialect, item and ID paths, parent
//! reference paths, create/delete endpoints and attachment transfer
//! endpoints. The destination profile also carries the default field-mapping
//! rule sets. The migration config selects a profile by name and may
//! override any per-entity-type entry.
//!
//! Endpoint paths are templates: `{{ project }}` resolves to the configured
//! project, `{{ id }}` to an entity ID and `{{ parent_id }}` to a correlated
//! parent ID at request time.

use crate::pagination::PaginationConfig;
use crate::transform::MappingRuleSet;
use crate::types::{EntityType, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

// ============================================================================
// Profile Types
// ============================================================================

/// Endpoint and mapping definitions for one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformProfile {
    /// Profile name ("zephyr", "qtest")
    pub name: String,

    /// Cheap authenticated endpoint for connectivity checks
    #[serde(default)]
    pub check: Option<CheckEndpoint>,

    /// Per-entity-type endpoint definitions
    #[serde(default)]
    pub entities: HashMap<EntityType, EntityEndpoints>,

    /// Default field-mapping rule sets (destination profiles only)
    #[serde(default)]
    pub mappings: HashMap<EntityType, MappingRuleSet>,
}

/// Connectivity check endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckEndpoint {
    /// Endpoint path, may contain `{{ project }}`
    pub path: String,

    /// Query parameters
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Expected status code
    #[serde(default = "default_expect_status")]
    pub expect_status: u16,
}

fn default_expect_status() -> u16 {
    200
}

/// Endpoint definitions for one entity type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityEndpoints {
    /// Paginated project-wide listing
    #[serde(default)]
    pub list: Option<ListEndpoint>,

    /// Per-parent listings for types that hang off other entities
    #[serde(default)]
    pub list_per_parent: Vec<ParentListEndpoint>,

    /// Path to the source ID inside one listed item
    #[serde(default = "default_id_path")]
    pub id_path: String,

    /// Parent references extracted from one listed item
    #[serde(default)]
    pub refs: Vec<RefPath>,

    /// Binary download endpoint (attachments)
    #[serde(default)]
    pub download: Option<DownloadEndpoint>,

    /// Create endpoint on the destination
    #[serde(default)]
    pub create: Option<CreateEndpoint>,

    /// Per-parent binary upload endpoints (attachments)
    #[serde(default)]
    pub upload: Vec<ParentUploadEndpoint>,

    /// Compensating delete endpoint for rollback
    #[serde(default)]
    pub delete: Option<DeleteEndpoint>,
}

/// Paginated listing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEndpoint {
    /// Endpoint path, may contain `{{ project }}`
    pub path: String,

    /// HTTP method
    #[serde(default)]
    pub method: Method,

    /// Static query parameters, values may contain `{{ project }}`
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Path to the item array in the response body
    #[serde(default = "default_items_path")]
    pub items_path: String,

    /// Pagination dialect
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// Unpaginated listing scoped to one parent entity
///
/// The path contains `{{ parent_id }}`; the extractor injects the parent as
/// a reference on every listed item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentListEndpoint {
    /// Entity type of the parent the listing is scoped to
    pub parent: EntityType,

    /// Endpoint path with `{{ parent_id }}`
    pub path: String,

    /// Static query parameters
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Path to the item array in the response body
    #[serde(default = "default_items_path")]
    pub items_path: String,
}

/// Parent reference extracted from a listed item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefPath {
    /// Entity type of the referenced parent
    pub entity_type: EntityType,

    /// Path to the parent's source ID inside the item
    pub path: String,
}

/// Binary download endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadEndpoint {
    /// Endpoint path with `{{ id }}`
    pub path: String,
}

/// Create endpoint returning a destination ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEndpoint {
    /// Endpoint path, may contain `{{ project }}`
    pub path: String,

    /// HTTP method
    #[serde(default = "default_post")]
    pub method: Method,

    /// Path to the new destination ID in the response body
    #[serde(default = "default_id_path")]
    pub id_path: String,
}

/// Binary upload endpoint scoped to one parent entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentUploadEndpoint {
    /// Entity type of the parent the upload belongs to
    pub parent: EntityType,

    /// Endpoint path with `{{ project }}` and `{{ parent_id }}`
    pub path: String,

    /// Path to the new destination ID in the response body
    #[serde(default = "default_id_path")]
    pub id_path: String,
}

/// Compensating delete endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEndpoint {
    /// Endpoint path with `{{ project }}` and `{{ id }}`
    pub path: String,
}

fn default_id_path() -> String {
    "$.id".to_string()
}

fn default_items_path() -> String {
    "$.values".to_string()
}

fn default_post() -> Method {
    Method::POST
}

// ============================================================================
// Built-in Profiles
// ============================================================================

/// Look up a built-in profile by name
pub fn profile(name: &str) -> Option<&'static PlatformProfile> {
    match name {
        "zephyr" => Some(&ZEPHYR),
        "qtest" => Some(&QTEST),
        _ => None,
    }
}

/// Names of all built-in profiles
pub fn profile_names() -> Vec<&'static str> {
    vec!["zephyr", "qtest"]
}

static ZEPHYR: LazyLock<PlatformProfile> = LazyLock::new(|| {
    serde_yaml::from_str(ZEPHYR_YAML).expect("built-in zephyr profile must parse")
});

static QTEST: LazyLock<PlatformProfile> = LazyLock::new(|| {
    serde_yaml::from_str(QTEST_YAML).expect("built-in qtest profile must parse")
});

/// Zephyr Scale source profile
///
/// Listings are offset-paginated (startAt/maxResults) and project-scoped via
/// a projectKey query parameter. Test cases and cycles are identified by
/// their key, folders and executions by numeric ID.
const ZEPHYR_YAML: &str = r#"
name: zephyr
check:
  path: /healthcheck
entities:
  custom_field:
    list:
      path: /customfields
      params: { projectKey: "{{ project }}" }
      items_path: $.values
      pagination:
        style: offset
        offset_param: startAt
        limit_param: maxResults
        page_size: 100
        total_path: $.total
    id_path: $.id
  folder:
    list:
      path: /folders
      params: { projectKey: "{{ project }}" }
      items_path: $.values
      pagination:
        style: offset
        offset_param: startAt
        limit_param: maxResults
        page_size: 100
        total_path: $.total
    id_path: $.id
    refs:
      - entity_type: folder
        path: $.parentId
  test_case:
    list:
      path: /testcases
      params: { projectKey: "{{ project }}" }
      items_path: $.values
      pagination:
        style: offset
        offset_param: startAt
        limit_param: maxResults
        page_size: 100
        total_path: $.total
    id_path: $.key
    refs:
      - entity_type: folder
        path: $.folder.id
  cycle:
    list:
      path: /testcycles
      params: { projectKey: "{{ project }}" }
      items_path: $.values
      pagination:
        style: offset
        offset_param: startAt
        limit_param: maxResults
        page_size: 100
        total_path: $.total
    id_path: $.key
    refs:
      - entity_type: folder
        path: $.folder.id
  execution:
    list:
      path: /testexecutions
      params: { projectKey: "{{ project }}" }
      items_path: $.values
      pagination:
        style: offset
        offset_param: startAt
        limit_param: maxResults
        page_size: 100
        total_path: $.total
    id_path: $.id
    refs:
      - entity_type: test_case
        path: $.testCase.key
      - entity_type: cycle
        path: $.testCycle.key
  attachment:
    list_per_parent:
      - parent: test_case
        path: /testcases/{{ parent_id }}/attachments
        items_path: $.values
      - parent: execution
        path: /testexecutions/{{ parent_id }}/attachments
        items_path: $.values
    id_path: $.id
    download:
      path: /attachments/{{ id }}
"#;

/// qTest destination profile
///
/// Create endpoints are project-scoped paths returning the new entity in the
/// body; folders map to qTest modules, executions to test runs. Mapping rule
/// sets shape Zephyr payloads into qTest create bodies.
const QTEST_YAML: &str = r#"
name: qtest
check:
  path: /projects/{{ project }}
entities:
  custom_field:
    create:
      path: /projects/{{ project }}/custom-fields
      id_path: $.id
    delete:
      path: /projects/{{ project }}/custom-fields/{{ id }}
  folder:
    create:
      path: /projects/{{ project }}/modules
      id_path: $.id
    delete:
      path: /projects/{{ project }}/modules/{{ id }}
  test_case:
    create:
      path: /projects/{{ project }}/test-cases
      id_path: $.id
    delete:
      path: /projects/{{ project }}/test-cases/{{ id }}
  cycle:
    create:
      path: /projects/{{ project }}/test-cycles
      id_path: $.id
    delete:
      path: /projects/{{ project }}/test-cycles/{{ id }}
  execution:
    create:
      path: /projects/{{ project }}/test-runs
      id_path: $.id
    delete:
      path: /projects/{{ project }}/test-runs/{{ id }}
  attachment:
    upload:
      - parent: test_case
        path: /projects/{{ project }}/test-cases/{{ parent_id }}/blob-handles
        id_path: $.id
      - parent: execution
        path: /projects/{{ project }}/test-runs/{{ parent_id }}/blob-handles
        id_path: $.id
    delete:
      path: /projects/{{ project }}/blob-handles/{{ id }}
mappings:
  custom_field:
    fields:
      - dest: label
        source: $.name
        required: true
      - dest: attribute_type
        source: $.type
        translate:
          TEXT: TextBox
          PARAGRAPH: LongText
          SINGLE_CHOICE: ComboBox
          MULTI_CHOICE: MultipleSelectionComboBox
          NUMBER: Number
          DATE: DatePicker
          CHECKBOX: CheckBox
          USER: UserList
        default: TextBox
      - dest: entity_scope
        source: $.entityType
        default: TEST_CASE
    required: [label]
  folder:
    fields:
      - dest: name
        source: $.name
        required: true
    relationships:
      - ref: folder
        dest: parent_id
        required: false
    required: [name]
  test_case:
    fields:
      - dest: name
        source: $.name
        required: true
      - dest: description
        source: $.objective
      - dest: precondition
        source: $.precondition
      - dest: properties.priority
        source: $.priority.name
        default: Normal
      - dest: properties.source_key
        source: $.key
    relationships:
      - ref: folder
        dest: parent_id
        required: false
    required: [name]
  cycle:
    fields:
      - dest: name
        source: $.name
        required: true
      - dest: description
        source: $.description
      - dest: start_date
        source: $.plannedStartDate
      - dest: end_date
        source: $.plannedEndDate
    relationships:
      - ref: folder
        dest: parent_id
        required: false
    required: [name]
  execution:
    fields:
      - dest: name
        template: "Run of {{ field.testCase.key }}"
        required: true
      - dest: status
        source: $.testExecutionStatus.name
        translate:
          Pass: PASSED
          Fail: FAILED
          Blocked: BLOCKED
          "In Progress": IN_PROGRESS
          "Not Executed": NOT_RUN
        default: NOT_RUN
      - dest: executed_date
        source: $.actualEndDate
    relationships:
      - ref: test_case
        dest: test_case_id
      - ref: cycle
        dest: test_cycle_id
    required: [name, test_case_id, test_cycle_id]
  attachment:
    fields:
      - dest: name
        source: $.filename
        required: true
      - dest: content_type
        source: $.contentType
        default: application/octet-stream
      - dest: file_path
        source: $.local_path
        required: true
    relationships:
      - ref: test_case
        dest: parent_id
        dest_type_field: parent_type
        required: false
      - ref: execution
        dest: parent_id
        dest_type_field: parent_type
        required: false
    required: [name, parent_id]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zephyr_profile_parses() {
        let profile = profile("zephyr").unwrap();
        assert_eq!(profile.name, "zephyr");
        assert_eq!(profile.entities.len(), 6);
    }

    #[test]
    fn test_qtest_profile_parses() {
        let profile = profile("qtest").unwrap();
        assert_eq!(profile.name, "qtest");
        assert_eq!(profile.entities.len(), 6);
        assert_eq!(profile.mappings.len(), 6);
    }

    #[test]
    fn test_unknown_profile() {
        assert!(profile("testrail").is_none());
    }

    #[test]
    fn test_zephyr_listings_are_offset_paginated() {
        let profile = profile("zephyr").unwrap();
        for entity_type in [
            EntityType::CustomField,
            EntityType::Folder,
            EntityType::TestCase,
            EntityType::Cycle,
            EntityType::Execution,
        ] {
            let endpoints = &profile.entities[&entity_type];
            let list = endpoints.list.as_ref().unwrap_or_else(|| {
                panic!("{entity_type} must have a listing endpoint")
            });
            assert!(
                matches!(list.pagination, PaginationConfig::Offset { .. }),
                "{entity_type} should page by offset"
            );
            assert_eq!(
                list.params.get("projectKey").map(String::as_str),
                Some("{{ project }}")
            );
        }
    }

    #[test]
    fn test_zephyr_attachments_list_per_parent() {
        let profile = profile("zephyr").unwrap();
        let endpoints = &profile.entities[&EntityType::Attachment];
        assert!(endpoints.list.is_none());
        let parents: Vec<EntityType> = endpoints
            .list_per_parent
            .iter()
            .map(|l| l.parent)
            .collect();
        assert_eq!(parents, vec![EntityType::TestCase, EntityType::Execution]);
        assert!(endpoints.download.is_some());
    }

    #[test]
    fn test_zephyr_execution_refs() {
        let profile = profile("zephyr").unwrap();
        let endpoints = &profile.entities[&EntityType::Execution];
        let ref_types: Vec<EntityType> =
            endpoints.refs.iter().map(|r| r.entity_type).collect();
        assert_eq!(ref_types, vec![EntityType::TestCase, EntityType::Cycle]);
    }

    #[test]
    fn test_qtest_create_and_delete_for_loadable_types() {
        let profile = profile("qtest").unwrap();
        for entity_type in [
            EntityType::CustomField,
            EntityType::Folder,
            EntityType::TestCase,
            EntityType::Cycle,
            EntityType::Execution,
        ] {
            let endpoints = &profile.entities[&entity_type];
            let create = endpoints.create.as_ref().unwrap_or_else(|| {
                panic!("{entity_type} must have a create endpoint")
            });
            assert_eq!(create.method, Method::POST);
            assert!(
                endpoints.delete.is_some(),
                "{entity_type} needs a delete endpoint for rollback"
            );
        }
    }

    #[test]
    fn test_qtest_attachment_uploads() {
        let profile = profile("qtest").unwrap();
        let endpoints = &profile.entities[&EntityType::Attachment];
        assert!(endpoints.create.is_none());
        assert_eq!(endpoints.upload.len(), 2);
        for upload in &endpoints.upload {
            assert!(upload.path.contains("{{ parent_id }}"));
        }
    }

    #[test]
    fn test_qtest_execution_mapping_requires_both_parents() {
        let profile = profile("qtest").unwrap();
        let rules = &profile.mappings[&EntityType::Execution];
        assert_eq!(rules.relationships.len(), 2);
        assert!(rules.relationships.iter().all(|r| r.required));
        assert!(rules.required.contains(&"test_case_id".to_string()));
    }

    #[test]
    fn test_profile_names() {
        assert_eq!(profile_names(), vec!["zephyr", "qtest"]);
    }
}
