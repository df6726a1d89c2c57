use super::Config;
use serde_json::Value;

const PATH_SEPARATOR: char = '.';

/// Expand dotted keys into nested objects, recursively.
///
/// When two spellings address the same path, objects are merged and the entry
/// visited last wins at leaves. Arrays are kept as arrays but their object
/// elements are canonicalized too.
pub fn canonicalize(data: &Config) -> Config {
    let mut out = Config::new();
    for (key, value) in data {
        let value = canonicalize_value(value);
        let path: Vec<&str> = key.split(PATH_SEPARATOR).collect();
        insert_path(&mut out, &path, value);
    }
    out
}

fn canonicalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(canonicalize(map)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
        other => other.clone(),
    }
}

fn insert_path(target: &mut Config, path: &[&str], value: Value) {
    let Some((segment, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        match (target.get_mut(*segment), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (k, v) in incoming {
                    insert_path(existing, &[k.as_str()], v);
                }
            }
            (_, value) => {
                target.insert((*segment).to_string(), value);
            }
        }
        return;
    }

    let entry = target
        .entry((*segment).to_string())
        .or_insert_with(|| Value::Object(Config::new()));
    if !entry.is_object() {
        *entry = Value::Object(Config::new());
    }
    if let Value::Object(child) = entry {
        insert_path(child, rest, value);
    }
}

/// Collapse nested objects into dotted keys, recursively.
///
/// Empty objects are kept as leaves so that `{"a": {}}` is distinguishable
/// from `{}`.
pub fn flatten(data: &Config) -> Config {
    let mut out = Config::new();
    flatten_into(&mut out, None, data);
    out
}

fn flatten_into(out: &mut Config, prefix: Option<&str>, data: &Config) {
    for (key, value) in data {
        let path = match prefix {
            Some(prefix) => format!("{prefix}{PATH_SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(map) if !map.is_empty() => flatten_into(out, Some(&path), map),
            Value::Array(items) => {
                out.insert(path, Value::Array(items.iter().map(flatten_value).collect()));
            }
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

fn flatten_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(flatten(map)),
        Value::Array(items) => Value::Array(items.iter().map(flatten_value).collect()),
        other => other.clone(),
    }
}
