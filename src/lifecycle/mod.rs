// Container lifecycle: action resolution, command assembly, orchestration, teardown.

pub mod commands;
mod error;
pub mod orchestrator;
pub mod shutdown;
mod types;

pub use error::LifecycleError;
pub use orchestrator::{DOCKER_HOST_ENV, Lifecycle};
pub use types::{
    ACTIONS_KEY, Action, ActionSet, CONTAINER_TAG_KEY, CommandSpec, IMAGE_TAG_KEY, Outcome,
    Report, State, Tags,
};
