use regex::Regex;
use tracing::{debug, warn};

use super::Bindings;

pub const DEFAULT_SPLIT: &str = " ";

/// Extract the custom options stored under `action_key` in the generic
/// information map, split on the token stored under `split_key` (a regular
/// expression, defaulting to a single space).
///
/// Never fails: a missing or mistyped generic information map, or a missing
/// key, yields an empty list. Empty tokens are dropped.
pub fn extract(bindings: &Bindings, action_key: &str, split_key: Option<&str>) -> Vec<String> {
    let info = bindings.generic_information();
    let Some(raw) = info.text(action_key) else {
        return Vec::new();
    };
    let split = split_key
        .and_then(|k| info.text(k))
        .unwrap_or(DEFAULT_SPLIT);

    let tokens = tokenize(raw, split);
    debug!(target: "docktask::options", key = action_key, ?tokens, "extracted options");
    tokens
}

fn tokenize(raw: &str, split: &str) -> Vec<String> {
    if split.is_empty() {
        return non_empty([raw]);
    }
    if split == DEFAULT_SPLIT {
        return non_empty(raw.split(DEFAULT_SPLIT));
    }
    match Regex::new(split) {
        Ok(re) => non_empty(re.split(raw)),
        Err(e) => {
            warn!(target: "docktask::options", split, error = %e, "invalid split pattern, splitting literally");
            non_empty(raw.split(split))
        }
    }
}

fn non_empty<'a>(parts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
