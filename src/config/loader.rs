use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::types::{Properties, known_keys};

/// Property file read when no explicit path is given.
pub const DEFAULT_FILE: &str = "docktask.yaml";
pub const ENV_PREFIX: &str = "DOCKTASK_";

/// Load the property file at `path`, or `docktask.yaml` in the current
/// directory. A missing default file yields an empty table; a missing
/// explicit file is an error.
///
/// Keys may be written flat (`docker.file.command: docker`) or nested
/// (`docker: { file: { command: docker } }`); nested mappings are joined
/// with `.`.
pub fn load_file(path: Option<&Path>) -> Result<Properties> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (Path::new(DEFAULT_FILE).to_path_buf(), false),
    };

    if !path.exists() {
        if explicit {
            bail!("config file {} does not exist", path.display());
        }
        info!(target: "docktask::config", path = %path.display(), "no config file, using defaults");
        return Ok(Properties::new());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let props = parse(&contents).with_context(|| format!("invalid config {}", path.display()))?;
    debug!(target: "docktask::config", path = %path.display(), entries = props.len(), "loaded config file");
    Ok(props)
}

/// Parse YAML property text.
pub fn parse(contents: &str) -> Result<Properties> {
    let value: Value = serde_yaml::from_str(contents)?;
    let mut props = Properties::new();
    match value {
        Value::Null => {}
        Value::Mapping(_) => flatten("", &value, &mut props),
        _ => bail!("top level must be a mapping"),
    }
    Ok(props)
}

fn flatten(prefix: &str, value: &Value, out: &mut Properties) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(key) = scalar(k) else {
                    warn!(target: "docktask::config", key = ?k, "ignoring non-scalar key");
                    continue;
                };
                let full = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&full, v, out);
            }
        }
        Value::Null => out.set(prefix, ""),
        other => match scalar(other) {
            Some(s) => out.set(prefix, s),
            None => warn!(target: "docktask::config", key = prefix, "ignoring non-scalar value"),
        },
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Environment variable consulted for a property key:
/// `docker.file.use.sudo` becomes `DOCKTASK_DOCKER_FILE_USE_SUDO`.
pub fn env_key(key: &str) -> String {
    let mut name = String::with_capacity(ENV_PREFIX.len() + key.len());
    name.push_str(ENV_PREFIX);
    name.extend(key.chars().map(|c| match c {
        '.' | '-' => '_',
        c => c.to_ascii_uppercase(),
    }));
    name
}

/// Collect environment overrides for every known key through `lookup`.
pub fn env_overrides(lookup: impl Fn(&str) -> Option<String>) -> Properties {
    known_keys()
        .into_iter()
        .filter_map(|key| {
            let var = env_key(&key);
            lookup(&var).map(|value| {
                debug!(target: "docktask::config", %key, %var, "environment override");
                (key, value)
            })
        })
        .collect()
}
