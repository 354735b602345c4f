use proto::{ArgMap, ValidationError};
use serde_json::Value;
use tracing::debug;

use crate::catalog::{FieldKind, FieldSpec, ToolSpec};

/// Renames alternate argument keys to their canonical spelling.
///
/// A repair never overwrites a canonical key that is already present; the
/// alternate key is left in place in that case.
pub fn repair_keys(spec: &ToolSpec, mut args: ArgMap) -> ArgMap {
    for (alternate, canonical) in spec.key_repairs {
        if args.contains_key(*canonical) || !args.contains_key(*alternate) {
            continue;
        }
        debug!(
            tool = spec.canonical,
            from = alternate,
            to = canonical,
            "Repaired argument key"
        );
        // Rebuilt so the renamed key keeps its position.
        args = args
            .into_iter()
            .map(|(key, value)| {
                if key == *alternate {
                    ((*canonical).to_string(), value)
                } else {
                    (key, value)
                }
            })
            .collect();
    }
    args
}

/// Checks `args` against the field specs of `spec`.
///
/// Unknown keys are allowed; tools with reshaping rules consume them.
pub fn validate(spec: &ToolSpec, args: &ArgMap) -> Result<(), ValidationError> {
    for field in spec.fields {
        match args.get(field.name) {
            None | Some(Value::Null) if field.required => {
                return Err(invalid(spec, field, requirement(field)));
            }
            None | Some(Value::Null) => {}
            Some(value) => check_field(spec, field, value)?,
        }
    }
    Ok(())
}

fn check_field(spec: &ToolSpec, field: &FieldSpec, value: &Value) -> Result<(), ValidationError> {
    let acceptable = match (field.kind, value) {
        (FieldKind::String, Value::String(s)) => !field.non_empty || !s.trim().is_empty(),
        (FieldKind::Number, Value::Number(_)) => true,
        (FieldKind::Boolean, Value::Bool(_)) => true,
        (FieldKind::Map, Value::Object(map)) => !field.non_empty || !map.is_empty(),
        (FieldKind::Sequence, Value::Array(items)) => !field.non_empty || !items.is_empty(),
        (FieldKind::StringList, Value::Array(items)) => {
            if field.non_empty && items.is_empty() {
                false
            } else if items
                .iter()
                .all(|item| item.as_str().is_some_and(|s| !s.trim().is_empty()))
            {
                true
            } else {
                return Err(invalid(spec, field, "All items must be non-empty strings."));
            }
        }
        _ => false,
    };
    if acceptable {
        Ok(())
    } else {
        Err(invalid(spec, field, requirement(field)))
    }
}

fn requirement(field: &FieldSpec) -> &'static str {
    match (field.kind, field.non_empty) {
        (FieldKind::String, true) => "It must be a non-empty string.",
        (FieldKind::String, false) => "It must be a string.",
        (FieldKind::Number, _) => "It must be a number.",
        (FieldKind::Boolean, _) => "It must be a boolean.",
        (FieldKind::Map, true) => "It must be a non-empty object.",
        (FieldKind::Map, false) => "It must be an object.",
        (FieldKind::Sequence, true) => "It must be a non-empty list.",
        (FieldKind::Sequence, false) => "It must be a list.",
        (FieldKind::StringList, true) => "It must be a non-empty list of strings.",
        (FieldKind::StringList, false) => "It must be a list of strings.",
    }
}

fn invalid(spec: &ToolSpec, field: &FieldSpec, reason: &str) -> ValidationError {
    ValidationError::new(spec.canonical, field.name, reason)
}
