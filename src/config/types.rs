use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bindings::Bindings;

use super::loader;

/// Shared by both modes.
pub const DOCKER_HOST_KEY: &str = "docker.host";
const DEFAULT_SUDO: &str = "/usr/bin/sudo";

/// Which template flavour a lifecycle drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Discrete build/run/exec/stop/rm/rmi actions on a rendered `Dockerfile`.
    Dockerfile,
    /// A single `up` on a rendered `docker-compose.yml`, torn down with `down`.
    Compose,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dockerfile => "dockerfile",
            Mode::Compose => "compose",
        }
    }

    /// Name of the rendered file inside the working directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Mode::Dockerfile => "Dockerfile",
            Mode::Compose => "docker-compose.yml",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Mode::Dockerfile => "docker.file",
            Mode::Compose => "docker.compose",
        }
    }

    /// Property key for a mode-scoped setting, e.g. `docker.file.use.sudo`.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.prefix())
    }

    /// Property key holding the runtime binary on this platform.
    pub fn command_key(&self) -> String {
        match self {
            Mode::Compose if cfg!(any(target_os = "windows", target_os = "macos")) => {
                self.key("command.windows")
            }
            _ => self.key("command"),
        }
    }

    fn default_command(&self) -> &'static str {
        match self {
            Mode::Dockerfile => "docker",
            Mode::Compose if cfg!(any(target_os = "windows", target_os = "macos")) => {
                "docker-compose"
            }
            Mode::Compose => "/usr/local/bin/docker-compose",
        }
    }

    fn default_keep(&self) -> bool {
        matches!(self, Mode::Compose)
    }

    /// Every property key read for this mode.
    pub fn keys(&self) -> Vec<String> {
        vec![
            self.command_key(),
            self.key("sudo.command"),
            self.key("use.sudo"),
            self.key("keep"),
            DOCKER_HOST_KEY.to_string(),
        ]
    }
}

/// Fully resolved settings for one lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub mode: Mode,
    pub command: String,
    pub sudo_command: String,
    pub use_sudo: bool,
    pub docker_host: String,
    pub keep: bool,
}

impl Settings {
    /// Leading tokens of every command: optional sudo, then the runtime binary.
    pub fn base_command(&self) -> Vec<String> {
        let mut base = Vec::with_capacity(2);
        if self.use_sudo {
            base.push(self.sudo_command.clone());
        }
        base.push(self.command.clone());
        base
    }
}

/// Flat `key -> value` property table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Overlay `other` on top of `self`; entries of `other` win.
    pub fn merge(&mut self, other: Properties) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Where an [`EngineConfig`] gets its table from on `reload`.
#[derive(Debug, Clone)]
enum Source {
    /// Property file (explicit or default) plus environment overrides.
    Layered(Option<PathBuf>),
    /// A fixed table; `reload` keeps it.
    Fixed,
}

/// Engine-wide configuration: file properties overlaid with environment
/// overrides. Constructed once and passed by reference; `reload` swaps the
/// table in place so every later `settings` call sees the new values.
#[derive(Debug)]
pub struct EngineConfig {
    source: Source,
    properties: RwLock<Properties>,
}

impl EngineConfig {
    /// Load from `path` (or `docktask.yaml` in the current directory) and
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf);
        let properties = read_layers(path.as_deref())?;
        Ok(Self {
            source: Source::Layered(path),
            properties: RwLock::new(properties),
        })
    }

    /// A configuration that never touches the filesystem or environment.
    pub fn from_properties(properties: Properties) -> Self {
        Self {
            source: Source::Fixed,
            properties: RwLock::new(properties),
        }
    }

    /// Re-read the property file and environment. Last reload wins.
    pub fn reload(&self) -> Result<()> {
        let Source::Layered(path) = &self.source else {
            return Ok(());
        };
        let fresh = read_layers(path.as_deref())?;
        debug!(target: "docktask::config", entries = fresh.len(), "configuration reloaded");
        self.replace(fresh);
        Ok(())
    }

    /// Replace the table directly.
    pub fn replace(&self, properties: Properties) {
        *self
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner) = properties;
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(str::to_string)
    }

    /// Resolve the settings for `mode`. A generic-information entry named
    /// after a property key overrides the configured value.
    pub fn settings(&self, mode: Mode, bindings: &Bindings) -> Settings {
        let info = bindings.generic_information();
        let props = self
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let lookup = |key: &str| -> Option<String> {
            info.text(key)
                .or_else(|| props.get(key))
                .map(str::to_string)
        };

        Settings {
            mode,
            command: lookup(&mode.command_key())
                .unwrap_or_else(|| mode.default_command().to_string()),
            sudo_command: lookup(&mode.key("sudo.command"))
                .unwrap_or_else(|| DEFAULT_SUDO.to_string()),
            use_sudo: lookup(&mode.key("use.sudo")).is_some_and(|v| parse_bool(&v)),
            docker_host: lookup(DOCKER_HOST_KEY).unwrap_or_default(),
            keep: lookup(&mode.key("keep")).map_or(mode.default_keep(), |v| parse_bool(&v)),
        }
    }
}

fn read_layers(path: Option<&Path>) -> Result<Properties> {
    let mut properties = loader::load_file(path)?;
    properties.merge(loader::env_overrides(|key| std::env::var(key).ok()));
    Ok(properties)
}

/// Every property key either mode reads, including the platform variants
/// of the compose binary.
pub fn known_keys() -> Vec<String> {
    let mut keys: Vec<String> = [Mode::Dockerfile, Mode::Compose]
        .iter()
        .flat_map(Mode::keys)
        .collect();
    keys.push(Mode::Compose.key("command"));
    keys.push(Mode::Compose.key("command.windows"));
    keys.sort();
    keys.dedup();
    keys
}

/// `"true"` in any case is true; everything else is false.
pub fn parse_bool(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::GENERIC_INFORMATION;

    fn settings(props: &[(&str, &str)], info: &[(&str, &str)], mode: Mode) -> Settings {
        let cfg = EngineConfig::from_properties(props.iter().copied().collect());
        let mut bindings = Bindings::new();
        for (k, v) in info {
            bindings.insert_nested(GENERIC_INFORMATION, *k, *v);
        }
        cfg.settings(mode, &bindings)
    }

    #[test]
    fn dockerfile_defaults() {
        let s = settings(&[], &[], Mode::Dockerfile);
        assert_eq!(s.command, "docker");
        assert_eq!(s.sudo_command, "/usr/bin/sudo");
        assert!(!s.use_sudo);
        assert!(!s.keep);
        assert_eq!(s.docker_host, "");
        assert_eq!(s.base_command(), vec!["docker"]);
    }

    #[test]
    fn compose_keeps_file_by_default() {
        let s = settings(&[], &[], Mode::Compose);
        assert!(s.keep);
        assert!(s.command.ends_with("docker-compose"));
    }

    #[test]
    fn sudo_token_comes_first() {
        let s = settings(
            &[("docker.file.use.sudo", "TRUE"), ("docker.file.sudo.command", "doas")],
            &[],
            Mode::Dockerfile,
        );
        assert_eq!(s.base_command(), vec!["doas", "docker"]);
    }

    #[test]
    fn generic_information_overrides_properties() {
        let s = settings(
            &[("docker.host", "tcp://file:2375"), ("docker.file.keep", "false")],
            &[("docker.host", "tcp://task:2375"), ("docker.file.keep", "true")],
            Mode::Dockerfile,
        );
        assert_eq!(s.docker_host, "tcp://task:2375");
        assert!(s.keep);
    }

    #[test]
    fn mode_keys_do_not_leak() {
        let s = settings(&[("docker.compose.use.sudo", "true")], &[], Mode::Dockerfile);
        assert!(!s.use_sudo);
    }

    #[test]
    fn parse_bool_is_strict_about_true() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" True "));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool("1"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn reload_rereads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docktask.yaml");
        std::fs::write(&path, "docker.file.command: podman\n").unwrap();

        let cfg = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.property("docker.file.command").as_deref(), Some("podman"));

        std::fs::write(&path, "docker.file.command: nerdctl\n").unwrap();
        cfg.reload().unwrap();
        assert_eq!(cfg.property("docker.file.command").as_deref(), Some("nerdctl"));
    }

    #[test]
    fn reload_keeps_fixed_table() {
        let cfg = EngineConfig::from_properties([("docker.host", "tcp://h")].into_iter().collect());
        cfg.reload().unwrap();
        assert_eq!(cfg.property("docker.host").as_deref(), Some("tcp://h"));
    }

    #[test]
    fn known_keys_cover_both_modes() {
        let keys = known_keys();
        assert!(keys.contains(&"docker.file.command".to_string()));
        assert!(keys.contains(&"docker.compose.command.windows".to_string()));
        assert!(keys.contains(&"docker.host".to_string()));
        assert_eq!(keys.iter().filter(|k| *k == "docker.host").count(), 1);
    }
}
