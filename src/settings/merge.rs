use super::{canonicalize, Config};
use serde_json::Value;

/// Recursive field-by-field merge where `src` wins at leaves.
///
/// - empty or absent `src` leaves `dst` untouched
/// - empty or absent `dst` yields the canonical form of `src`
/// - otherwise both sides are canonicalized and merged
///
/// Arrays are leaves: a list in `src` replaces the list in `dst`.
pub fn deep_merge(dst: Option<&Config>, src: Option<&Config>) -> Option<Config> {
    let src = match src {
        Some(src) if !src.is_empty() => src,
        _ => return dst.cloned(),
    };
    let dst = match dst {
        Some(dst) if !dst.is_empty() => dst,
        _ => return Some(canonicalize(src)),
    };

    let mut merged = canonicalize(dst);
    merge_into(&mut merged, canonicalize(src));
    Some(merged)
}

fn merge_into(dst: &mut Config, src: Config) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

/// Replace each top-level key of `dst` with the value from `src`.
///
/// Values are treated as opaque definitions: a snapshot repository or an
/// ILM policy coming from `src` fully replaces the one with the same name.
pub fn shallow_merge(dst: Option<Config>, src: Option<&Config>) -> Option<Config> {
    let Some(src) = src else {
        return dst;
    };
    let mut dst = dst.unwrap_or_default();
    for (key, value) in src {
        dst.insert(key.clone(), value.clone());
    }
    Some(dst)
}
