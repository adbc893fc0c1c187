//! Template interpolation for config files and mapping rules
//!
//! Handles `{{ variable }}` interpolation in two places: secrets in the
//! migration config (`{{ env.QTEST_TOKEN }}`) and payload-derived values in
//! field-mapping templates (`{{ field.status.name }}`). Top-level names such
//! as `{{ project }}` resolve against the context vars.

use crate::error::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Regex for matching template variables: {{ variable.path }}
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)*)\s*\}\}").unwrap()
});

/// Context for template interpolation
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// Entity payload fields (for mapping templates)
    pub fields: Value,
    /// Additional context variables (project key, workdir, ...)
    pub vars: Value,
    /// Environment overrides for tests; process env is consulted when None
    env_overrides: Option<Value>,
}

impl TemplateContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create context with entity payload fields
    pub fn with_fields(fields: Value) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    /// Set entity payload fields
    pub fn set_fields(&mut self, fields: Value) -> &mut Self {
        self.fields = fields;
        self
    }

    /// Set additional variables
    pub fn set_vars(&mut self, vars: Value) -> &mut Self {
        self.vars = vars;
        self
    }

    /// Override environment lookups (tests only need a map, not real env)
    pub fn set_env_overrides(&mut self, env: Value) -> &mut Self {
        self.env_overrides = Some(env);
        self
    }

    /// Resolve a variable path (e.g. "env.API_TOKEN", "field.status.name")
    pub fn get(&self, path: &str) -> Option<Value> {
        let parts: Vec<&str> = path.split('.').collect();
        match parts.as_slice() {
            [] => None,
            ["env", name] => match &self.env_overrides {
                Some(overrides) => overrides.get(*name).cloned(),
                None => std::env::var(name).ok().map(Value::String),
            },
            ["field", rest @ ..] => get_nested_value(&self.fields, rest).cloned(),
            ["vars", rest @ ..] => get_nested_value(&self.vars, rest).cloned(),
            // Top-level names fall through to vars ({{ project }})
            other => get_nested_value(&self.vars, other).cloned(),
        }
    }
}

/// Get a nested value from a JSON value by path
fn get_nested_value<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for part in path {
        match current {
            Value::Object(map) => {
                current = map.get(*part)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Render a template string with the given context
pub fn render(template: &str, ctx: &TemplateContext) -> Result<String> {
    let mut result = template.to_string();
    let mut errors = Vec::new();

    for cap in TEMPLATE_REGEX.captures_iter(template) {
        let full_match = cap.get(0).unwrap().as_str();
        let var_path = cap.get(1).unwrap().as_str();

        match ctx.get(var_path) {
            Some(value) => {
                let replacement = value_to_string(&value);
                result = result.replace(full_match, &replacement);
            }
            None => {
                errors.push(var_path.to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok(result)
    } else {
        Err(Error::undefined_var(errors.join(", ")))
    }
}

/// Check if a string contains template variables
pub fn has_templates(s: &str) -> bool {
    TEMPLATE_REGEX.is_match(s)
}

/// Extract all variable names from a template
pub fn extract_variables(template: &str) -> Vec<String> {
    TEMPLATE_REGEX
        .captures_iter(template)
        .map(|cap| cap.get(1).unwrap().as_str().to_string())
        .collect()
}

/// Convert a JSON value to a string for template substitution
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        // For complex types, use JSON serialization
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Render only `{{ env.* }}` variables, leaving everything else untouched
///
/// Config documents carry mapping templates (`{{ field.* }}`) that must
/// survive loading verbatim; only secrets resolve at load time. A missing
/// environment variable is still an error.
pub fn render_env(template: &str, ctx: &TemplateContext) -> Result<String> {
    let mut result = template.to_string();
    let mut errors = Vec::new();

    for cap in TEMPLATE_REGEX.captures_iter(template) {
        let full_match = cap.get(0).unwrap().as_str();
        let var_path = cap.get(1).unwrap().as_str();

        if !var_path.starts_with("env.") {
            continue;
        }

        match ctx.get(var_path) {
            Some(value) => {
                let replacement = value_to_string(&value);
                result = result.replace(full_match, &replacement);
            }
            None => {
                errors.push(var_path.to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok(result)
    } else {
        Err(Error::undefined_var(errors.join(", ")))
    }
}

/// Render `{{ env.* }}` variables inside every string of a JSON value
pub fn render_value_env(value: &Value, ctx: &TemplateContext) -> Result<Value> {
    match value {
        Value::String(s) => {
            if has_templates(s) {
                Ok(Value::String(render_env(s, ctx)?))
            } else {
                Ok(value.clone())
            }
        }
        Value::Object(map) => {
            let mut new_map = serde_json::Map::new();
            for (k, v) in map {
                new_map.insert(k.clone(), render_value_env(v, ctx)?);
            }
            Ok(Value::Object(new_map))
        }
        Value::Array(arr) => {
            let new_arr: Result<Vec<Value>> =
                arr.iter().map(|v| render_value_env(v, ctx)).collect();
            Ok(Value::Array(new_arr?))
        }
        _ => Ok(value.clone()),
    }
}

/// Render all string values (and keys) inside a JSON value
pub fn render_value(value: &Value, ctx: &TemplateContext) -> Result<Value> {
    match value {
        Value::String(s) => {
            if has_templates(s) {
                Ok(Value::String(render(s, ctx)?))
            } else {
                Ok(value.clone())
            }
        }
        Value::Object(map) => {
            let mut new_map = serde_json::Map::new();
            for (k, v) in map {
                let new_key = if has_templates(k) {
                    render(k, ctx)?
                } else {
                    k.clone()
                };
                new_map.insert(new_key, render_value(v, ctx)?);
            }
            Ok(Value::Object(new_map))
        }
        Value::Array(arr) => {
            let new_arr: Result<Vec<Value>> = arr.iter().map(|v| render_value(v, ctx)).collect();
            Ok(Value::Array(new_arr?))
        }
        _ => Ok(value.clone()),
    }
}
