// Engine configuration: YAML property file, environment overrides, per-mode settings.

pub mod loader;
mod types;

pub use loader::{DEFAULT_FILE, env_key};
pub use types::{
    DOCKER_HOST_KEY, EngineConfig, Mode, Properties, Settings, known_keys, parse_bool,
};
