use thiserror::Error;

use crate::docker::ProcessError;
use crate::render::RenderError;

use super::types::Action;

/// First failure of a lifecycle. Cleanup has always run by the time one of
/// these is returned.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to render template: {0}")]
    Render(#[from] RenderError),
    #[error("`{action}` could not be launched: {source}")]
    Launch {
        action: Action,
        #[source]
        source: ProcessError,
    },
    #[error("`{action}` exited with code {code}")]
    NonZeroExit { action: Action, code: i32 },
}

impl LifecycleError {
    /// Exit code a CLI should report for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::NonZeroExit { code, .. } => *code,
            _ => 1,
        }
    }
}
