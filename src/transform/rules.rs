//! Field-mapping rule sets
//!
//! A rule set is data (YAML), selected by entity type. Applying one is a pure
//! function from a source payload to a destination payload, so rules are
//! testable without a store or an API in sight. Relationship rules are also
//! declared here but resolved by the [`Transformer`](super::Transformer),
//! which owns the correlation look-ups.

use crate::error::{Error, Result};
use crate::json;
use crate::template::{self, TemplateContext};
use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Mapping rules for one entity type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingRuleSet {
    /// Field mapping rules, applied in order
    #[serde(default)]
    pub fields: Vec<FieldRule>,
    /// Parent-reference injections
    #[serde(default)]
    pub relationships: Vec<RelationshipRule>,
    /// Destination fields that must be present after mapping
    #[serde(default)]
    pub required: Vec<String>,
}

/// One destination field and how to produce its value
///
/// Value precedence: `const`, then `template`, then `source`. A `translate`
/// table rewrites whatever those produced; `default` fills the gap when
/// nothing did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRule {
    /// Destination key, dot-notated for nesting ("properties.priority")
    pub dest: String,
    /// JSONPath into the source payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Fixed value, wins over everything else
    #[serde(
        rename = "const",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub const_value: Option<Value>,
    /// Template interpolating source payload fields ("{{ field.key }}")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Value translation table (source value, stringified, to destination value)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translate: Option<HashMap<String, Value>>,
    /// Fallback when no rule produced a value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Fail the entity when no value could be produced
    #[serde(default)]
    pub required: bool,
}

/// One parent reference and the destination key its correlated ID lands in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRule {
    /// Parent entity type this rule resolves
    #[serde(rename = "ref")]
    pub ref_type: EntityType,
    /// Destination key for the correlated destination ID
    pub dest: String,
    /// Optional destination key for the parent's type discriminator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_type_field: Option<String>,
    /// When true, an entity without this reference fails
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl MappingRuleSet {
    /// Apply all field rules to a source payload, producing the destination
    /// payload skeleton (relationships not yet injected)
    ///
    /// Returns a `Validation` error when a required field cannot be produced.
    pub fn apply_fields(&self, payload: &Value) -> Result<Value> {
        let ctx = TemplateContext::with_fields(payload.clone());
        let mut mapped = Value::Object(Map::new());
        for rule in &self.fields {
            if let Some(value) = rule.apply(payload, &ctx)? {
                set_path(&mut mapped, &rule.dest, value);
            }
        }
        Ok(mapped)
    }

    /// Verify the required-field constraints on a mapped payload
    pub fn check_required(&self, mapped: &Value) -> Result<()> {
        for name in &self.required {
            match json::extract_path(mapped, name) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(Error::validation(format!(
                        "required field '{name}' is missing after mapping"
                    )))
                }
            }
        }
        Ok(())
    }
}

impl FieldRule {
    /// Produce the value for this rule, or `None` when the field stays unset
    ///
    /// The context must carry the same payload under `field.*`; the caller
    /// builds it once per entity.
    pub fn apply(&self, payload: &Value, ctx: &TemplateContext) -> Result<Option<Value>> {
        let mut value = if let Some(constant) = &self.const_value {
            Some(constant.clone())
        } else if let Some(tpl) = &self.template {
            match template::render(tpl, ctx) {
                Ok(rendered) => Some(Value::String(rendered)),
                // An unresolvable template falls through to the default;
                // without one, a required field reports the real problem
                Err(e) if self.default.is_none() && self.required => {
                    return Err(Error::validation(format!("field '{}': {e}", self.dest)));
                }
                Err(_) => None,
            }
        } else if let Some(path) = &self.source {
            json::extract_path(payload, path).filter(|v| !v.is_null())
        } else {
            None
        };

        if let Some(table) = &self.translate {
            value = value.and_then(|current| table.get(&translate_key(&current)).cloned());
        }

        if value.is_none() {
            value = self.default.clone();
        }

        if value.is_none() && self.required {
            return Err(Error::validation(format!(
                "required field '{}' has no value",
                self.dest
            )));
        }
        Ok(value)
    }
}

/// Set a value at a dot-notated path, creating intermediate objects
pub fn set_path(target: &mut Value, path: &str, new_value: Value) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    match path.split_once('.') {
        None => {
            if let Some(obj) = target.as_object_mut() {
                obj.insert(path.to_string(), new_value);
            }
        }
        Some((head, rest)) => {
            if let Some(obj) = target.as_object_mut() {
                let child = obj
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                set_path(child, rest, new_value);
            }
        }
    }
}

/// Destination IDs are stored as text; numeric ones go back into payloads as
/// numbers so the destination API sees `parent_id: 42`, not `"42"`
pub(super) fn id_value(dest_id: &str) -> Value {
    match dest_id.parse::<i64>() {
        Ok(n) => Value::Number(n.into()),
        Err(_) => Value::String(dest_id.to_string()),
    }
}

/// Stringify a value for translation-table look-up
fn translate_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
