use proto::ArgMap;
use serde_json::{Map, Value};

use crate::catalog::{Reshape, ToolSpec};

const PROPERTIES: &str = "properties";
const AXES: [&str; 3] = ["x", "y", "z"];

/// Applies the reshaping rules `spec` declares, in order.
pub fn apply(spec: &ToolSpec, mut args: ArgMap) -> ArgMap {
    for rule in spec.reshape {
        args = match rule {
            Reshape::MergeProperties { reserved } => merge_properties(args, reserved),
            Reshape::NormalizeCoordinates => normalize_coordinates(args),
        };
    }
    args
}

/// Moves top-level keys not listed in `reserved` into the `properties` map.
///
/// Explicit `properties` entries win over same-named siblings. A non-map
/// `properties` value leaves the arguments untouched.
pub fn merge_properties(args: ArgMap, reserved: &[&str]) -> ArgMap {
    if args.get(PROPERTIES).is_some_and(|v| !v.is_object() && !v.is_null()) {
        return args;
    }

    let mut merged = match args.get(PROPERTIES) {
        Some(Value::Object(nested)) => nested.clone(),
        _ => Map::new(),
    };
    let mut kept = ArgMap::new();
    let mut moved_any = false;
    for (key, value) in args {
        if key == PROPERTIES {
            kept.insert(key, Value::Null);
        } else if reserved.contains(&key.as_str()) {
            kept.insert(key, value);
        } else {
            moved_any = true;
            merged.entry(key).or_insert(value);
        }
    }

    if moved_any || kept.contains_key(PROPERTIES) {
        kept.insert(PROPERTIES.to_string(), Value::Object(merged));
    }
    kept
}

/// Normalizes coordinate-like values inside the `properties` map.
pub fn normalize_coordinates(mut args: ArgMap) -> ArgMap {
    if let Some(Value::Object(properties)) = args.get_mut(PROPERTIES) {
        for value in properties.values_mut() {
            if let Some(normalized) = coordinate_map(value) {
                *value = normalized;
            }
        }
    }
    args
}

fn coordinate_map(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) if items.len() == 3 && items.iter().all(Value::is_number) => {
            let map = AXES
                .iter()
                .zip(items)
                .map(|(axis, item)| ((*axis).to_string(), item.clone()))
                .collect();
            Some(Value::Object(map))
        }
        Value::Object(map)
            if !map.is_empty()
                && map.keys().all(|k| AXES.contains(&k.to_ascii_lowercase().as_str()))
                && map.keys().any(|k| !AXES.contains(&k.as_str())) =>
        {
            let mut lowered = Map::new();
            for (key, item) in map {
                lowered
                    .entry(key.to_ascii_lowercase())
                    .or_insert_with(|| item.clone());
            }
            Some(Value::Object(lowered))
        }
        _ => None,
    }
}
