// Container runtime plumbing: child processes, stream wiring, cancellation.

pub mod engine;
pub mod run;
pub mod types;

pub use engine::{ensure_available, runtime_version};
pub use run::{ProcessHandle, spawn};
pub use types::{
    CancelToken, IoEndpoints, ProcessError, ProcessExit, SharedWriter, StdinFeed,
};
