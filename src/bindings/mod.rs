// Configuration bindings: the per-invocation key/value data supplied by the task runner.
pub mod options;

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, warn};

pub use options::extract;

/// Nested map carrying per-task settings (actions, tags, option strings).
pub const GENERIC_INFORMATION: &str = "genericInformation";
/// Nested map carrying runner variables (job and task ids among others).
pub const VARIABLES: &str = "variables";
/// Caller-provided scratch directory.
pub const SCRATCH_DIR: &str = "localspace";

pub const JOB_ID: &str = "PA_JOB_ID";
pub const TASK_ID: &str = "PA_TASK_ID";

/// One binding value. Scalars are kept as text; anything else that cannot be
/// represented is dropped during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, Binding>),
}

impl Binding {
    /// Decode a JSON value. Returns `None` for `null` and for values with no
    /// usable shape, logging the mismatch instead of failing.
    pub fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Bool(_) | Value::Number(_) => Some(Self::Text(value.to_string())),
            Value::Array(items) => {
                let list = items
                    .iter()
                    .filter_map(|item| match Self::decode(item) {
                        Some(Self::Text(s)) => Some(s),
                        _ => {
                            warn!(target: "docktask::bindings", ?item, "dropping non-scalar list element");
                            None
                        }
                    })
                    .collect();
                Some(Self::List(list))
            }
            Value::Object(map) => Some(Self::Map(
                map.iter()
                    .filter_map(|(k, v)| Self::decode(v).map(|b| (k.clone(), b)))
                    .collect(),
            )),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Binding>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl From<&str> for Binding {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Binding {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Binding {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), Binding::Text(v.into())))
                .collect(),
        )
    }
}

/// The full set of bindings for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    entries: BTreeMap<String, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode bindings from a JSON object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            bail!("bindings must be a JSON object");
        };
        let entries = map
            .iter()
            .filter_map(|(k, v)| Binding::decode(v).map(|b| (k.clone(), b)))
            .collect();
        Ok(Self { entries })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("bindings are not valid JSON")?;
        Self::from_json(&value)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Binding>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Set one entry inside a nested map binding, creating the map if needed.
    /// A non-map value under `map_key` is replaced.
    pub fn insert_nested(&mut self, map_key: &str, key: impl Into<String>, value: impl Into<String>) {
        let slot = self
            .entries
            .entry(map_key.to_string())
            .or_insert_with(|| Binding::Map(BTreeMap::new()));
        if !matches!(slot, Binding::Map(_)) {
            *slot = Binding::Map(BTreeMap::new());
        }
        if let Binding::Map(map) = slot {
            map.insert(key.into(), Binding::Text(value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Binding> {
        self.entries.get(key)
    }

    /// Text value of a top-level entry; a non-text value is logged and treated as absent.
    pub fn text(&self, key: &str) -> Option<&str> {
        let binding = self.entries.get(key)?;
        if binding.as_text().is_none() {
            warn!(target: "docktask::bindings", key, kind = binding.kind(), "expected text binding");
        }
        binding.as_text()
    }

    /// Map value of a top-level entry; absence or a non-map value is logged
    /// and treated as empty.
    pub fn map(&self, key: &str) -> Section<'_> {
        match self.entries.get(key) {
            Some(Binding::Map(map)) => Section { map: Some(map) },
            Some(other) => {
                warn!(target: "docktask::bindings", key, kind = other.kind(), "expected map binding, treating as empty");
                Section { map: None }
            }
            None => {
                debug!(target: "docktask::bindings", key, "binding not found, treating as empty");
                Section { map: None }
            }
        }
    }

    pub fn generic_information(&self) -> Section<'_> {
        self.map(GENERIC_INFORMATION)
    }

    pub fn variables(&self) -> Section<'_> {
        self.map(VARIABLES)
    }

    /// All string-valued entries: top-level text bindings and the text
    /// entries of nested maps. Top-level entries win on name clashes.
    pub fn string_entries(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for binding in self.entries.values() {
            if let Binding::Map(map) = binding {
                for (k, v) in map {
                    if let Binding::Text(s) = v {
                        out.insert(k.clone(), s.clone());
                    }
                }
            }
        }
        for (k, v) in &self.entries {
            if let Binding::Text(s) = v {
                out.insert(k.clone(), s.clone());
            }
        }
        out
    }
}

/// Read-only view over a nested map binding. Missing maps behave as empty.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    map: Option<&'a BTreeMap<String, Binding>>,
}

impl<'a> Section<'a> {
    pub fn is_empty(&self) -> bool {
        self.map.is_none_or(|m| m.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.is_some_and(|m| m.contains_key(key))
    }

    /// Text value under `key`; non-text values are logged and treated as absent.
    pub fn text(&self, key: &str) -> Option<&'a str> {
        let binding = self.map?.get(key)?;
        match binding {
            Binding::Text(s) => Some(s),
            other => {
                warn!(target: "docktask::bindings", key, kind = other.kind(), "expected text entry");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_keeps_shapes() {
        let b = Bindings::from_json(&json!({
            "name": "EchoUbuntu",
            "count": 3,
            "tags": ["a", "b", {"nested": true}],
            "variables": {"PA_JOB_ID": "1", "PA_TASK_ID": 2},
            "nothing": null
        }))
        .unwrap();

        assert_eq!(b.text("name"), Some("EchoUbuntu"));
        assert_eq!(b.text("count"), Some("3"));
        assert_eq!(
            b.get("tags"),
            Some(&Binding::List(vec!["a".into(), "b".into()]))
        );
        assert_eq!(b.variables().text(TASK_ID), Some("2"));
        assert!(b.get("nothing").is_none());
    }

    #[test]
    fn non_object_bindings_are_rejected() {
        assert!(Bindings::from_json(&json!(["a"])).is_err());
        assert!(Bindings::from_json_str("{not json").is_err());
    }

    #[test]
    fn map_lookup_tolerates_mismatch() {
        let mut b = Bindings::new();
        b.insert(GENERIC_INFORMATION, "not a map");
        let gi = b.generic_information();
        assert!(gi.is_empty());
        assert_eq!(gi.text("docker-actions"), None);

        let missing = Bindings::new();
        assert!(missing.variables().is_empty());
    }

    #[test]
    fn text_lookup_ignores_maps() {
        let mut b = Bindings::new();
        b.insert("variables", Binding::from_iter([("k", "v")]));
        assert_eq!(b.text("variables"), None);
    }

    #[test]
    fn insert_nested_creates_and_replaces() {
        let mut b = Bindings::new();
        b.insert_nested(GENERIC_INFORMATION, "docker-actions", "build");
        assert_eq!(b.generic_information().text("docker-actions"), Some("build"));

        b.insert("variables", "scalar");
        b.insert_nested(VARIABLES, JOB_ID, "7");
        assert_eq!(b.variables().text(JOB_ID), Some("7"));
    }

    #[test]
    fn string_entries_flatten_one_level() {
        let mut b = Bindings::new();
        b.insert("name", "EchoUbuntu");
        b.insert("greetings", "Hello World");
        b.insert("variables", Binding::from_iter([("greetings", "shadowed"), ("extra", "x")]));

        let env = b.string_entries();
        assert_eq!(env.get("name").map(String::as_str), Some("EchoUbuntu"));
        assert_eq!(env.get("greetings").map(String::as_str), Some("Hello World"));
        assert_eq!(env.get("extra").map(String::as_str), Some("x"));
        assert!(!env.contains_key("variables"));
    }
}
