//! # Input Resolution
//!
//! Step inputs are authored as literal JSON with embedded references to the
//! execution's accumulated state. Resolution is total: every reference either
//! resolves or produces a [`ResolutionError`]; unresolved templates are never
//! passed through to an action.
//!
//! ## Reference forms
//!
//! - Whole value: `"${{ steps.build.outputs.artifact }}"` (or `{{ ... }}`)
//!   yields the referenced JSON value with its type preserved.
//! - Embedded: `"deploy ${{ trigger.branch }} now"` substitutes the textual
//!   form of the value; objects and arrays render as compact JSON.
//! - Object: `{"$ref": "trigger.count", "default": 1}`.
//! - Fallbacks: `${{ trigger.model || 'claude-3-5-sonnet-latest' }}`.
//!
//! ## Roots
//!
//! - `trigger.*`: data supplied when the run was requested
//! - `steps.<id>`: the step record; `steps.<id>.outputs.<key>` its outputs
//!   (`output` is accepted as an alias of `outputs`)
//! - `workflow.*`: `executionId`, `workflowId`, `versionTag`
//! - `env.*`: process environment variables
//!
//! ```rust
//! use cadence_engine::resolve::resolve_value;
//! use serde_json::json;
//!
//! let scope = json!({"trigger": {"branch": "main"}, "steps": {}, "workflow": {}});
//! let value = resolve_value(&json!({"ref": "${{ trigger.branch }}"}), &scope).unwrap();
//! assert_eq!(value["ref"], "main");
//! ```

use std::env;

use cadence_types::ExecutionState;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::condition::{parse_literal, split_expression};
use crate::error::ResolutionError;

/// Roots a reference path may start with.
pub const REFERENCE_ROOTS: &[&str] = &["trigger", "steps", "workflow", "env"];

const REF_KEY: &str = "$ref";
const DEFAULT_KEY: &str = "default";

/// Resolve every declared input of a step against the execution state.
pub fn resolve_inputs(inputs: &IndexMap<String, Value>, state: &ExecutionState) -> Result<Map<String, Value>, ResolutionError> {
    let scope = state.scope();
    let mut resolved = Map::new();
    for (name, value) in inputs {
        resolved.insert(name.clone(), resolve_value(value, &scope)?);
    }
    Ok(resolved)
}

/// Recursively resolve references inside a JSON value.
pub fn resolve_value(value: &Value, scope: &Value) -> Result<Value, ResolutionError> {
    match value {
        Value::String(text) => resolve_string(text, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) if is_reference_object(map) => resolve_reference_object(map, scope),
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (key, value) in map {
                resolved.insert(key.clone(), resolve_value(value, scope)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn is_reference_object(map: &Map<String, Value>) -> bool {
    map.contains_key(REF_KEY) && map.keys().all(|key| key == REF_KEY || key == DEFAULT_KEY)
}

fn resolve_reference_object(map: &Map<String, Value>, scope: &Value) -> Result<Value, ResolutionError> {
    let Some(Value::String(reference)) = map.get(REF_KEY) else {
        return Err(ResolutionError::InvalidSyntax {
            reference: map.get(REF_KEY).map(Value::to_string).unwrap_or_default(),
            reason: "$ref must be a string path".to_string(),
        });
    };
    let reference = reference.trim();
    validate_reference_path(reference)?;
    if let Some(value) = lookup_path(scope, reference) {
        return Ok(value);
    }
    map.get(DEFAULT_KEY).cloned().ok_or_else(|| ResolutionError::Unresolved {
        reference: reference.to_string(),
    })
}

fn resolve_string(text: &str, scope: &Value) -> Result<Value, ResolutionError> {
    let trimmed = text.trim();
    if let Some(template) = next_template(trimmed)
        && template.start == 0
        && template.end == trimmed.len()
    {
        return resolve_expression(template.expression, scope);
    }

    let mut output = String::new();
    let mut remaining = text;
    while let Some(template) = next_template(remaining) {
        output.push_str(&remaining[..template.start]);
        let value = resolve_expression(template.expression, scope)?;
        output.push_str(&format_json_value(&value));
        remaining = &remaining[template.end..];
    }
    output.push_str(remaining);
    Ok(Value::String(output))
}

struct TemplateSpan<'a> {
    start: usize,
    end: usize,
    expression: &'a str,
}

/// Locate the next closed `${{ ... }}` or `{{ ... }}` span.
fn next_template(text: &str) -> Option<TemplateSpan<'_>> {
    let open = text.find("{{")?;
    let start = if open > 0 && text[..open].ends_with('$') { open - 1 } else { open };
    let close = text[open + 2..].find("}}")? + open + 2;
    Some(TemplateSpan {
        start,
        end: close + 2,
        expression: text[open + 2..close].trim(),
    })
}

/// Resolve one template expression, honoring `||` fallbacks left to right.
///
/// A reference that exists but holds `null` falls through to the next
/// alternative; if nothing better follows, `null` is the result.
pub fn resolve_expression(expression: &str, scope: &Value) -> Result<Value, ResolutionError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ResolutionError::InvalidSyntax {
            reference: expression.to_string(),
            reason: "empty reference".to_string(),
        });
    }

    let alternatives = split_expression(expression, "||").unwrap_or_else(|| vec![expression]);
    let mut found_null = false;
    for alternative in alternatives {
        if let Some(literal) = parse_literal(alternative) {
            return Ok(literal);
        }
        validate_reference_path(alternative)?;
        match lookup_path(scope, alternative) {
            Some(Value::Null) => found_null = true,
            Some(value) => return Ok(value),
            None => {}
        }
    }

    if found_null {
        Ok(Value::Null)
    } else {
        Err(ResolutionError::Unresolved {
            reference: expression.to_string(),
        })
    }
}

fn validate_reference_path(path: &str) -> Result<(), ResolutionError> {
    let invalid = |reason: String| ResolutionError::InvalidSyntax {
        reference: path.to_string(),
        reason,
    };

    if path.contains(char::is_whitespace) {
        return Err(invalid("references cannot contain whitespace".to_string()));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(invalid("empty path segment".to_string()));
    }
    let (root, _) = split_indices(segments[0]);
    if !REFERENCE_ROOTS.contains(&root) {
        return Err(invalid(format!("unknown root '{root}'; expected one of {}", REFERENCE_ROOTS.join(", "))));
    }
    if matches!(root, "steps" | "env") && segments.len() < 2 {
        return Err(invalid(format!("'{root}' references must name a key")));
    }
    Ok(())
}

/// Look up a dotted path (with optional `[index]` suffixes) inside `root`.
///
/// `env.NAME` reads the process environment. Returns `None` when any segment
/// is missing or applied to the wrong JSON type.
pub fn lookup_path(root: &Value, path: &str) -> Option<Value> {
    let path = path.trim();
    if let Some(variable_name) = path.strip_prefix("env.") {
        return env::var(variable_name).ok().map(Value::String);
    }

    let is_steps_path = path.starts_with("steps.");
    let mut current = root;
    for (position, segment) in path.split('.').enumerate() {
        let segment = if is_steps_path && position == 2 && segment == "output" { "outputs" } else { segment };
        let (key, indices) = split_indices(segment);
        if !key.is_empty() {
            current = match current {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        for index in indices {
            current = current.get(index)?;
        }
    }
    Some(current.clone())
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let mut key_end = segment.len();
    let mut indices = Vec::new();
    let bytes = segment.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'[' {
            key_end = i;
            break;
        }
    }
    let key = &segment[..key_end];
    let mut i = key_end;
    while i < bytes.len() {
        if bytes[i] != b'[' {
            break;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i] != b']' {
            i += 1;
        }
        if i <= start {
            break;
        }
        if let Ok(n) = segment[start..i].parse::<usize>() {
            indices.push(n);
        }
        i += 1;
    }
    (key, indices)
}

/// Textual form of a JSON value used for embedded substitution.
///
/// Strings are returned as-is, `null` becomes empty, and objects/arrays render
/// as compact JSON.
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}
