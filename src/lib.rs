//! Render a Dockerfile or compose template and drive its container
//! lifecycle (build, run, exec) with guaranteed teardown of everything it
//! created.
//!
//! ```no_run
//! use docktask::{Bindings, EngineConfig, Lifecycle, Mode, Outcome};
//!
//! let config = EngineConfig::load(None)?;
//! let bindings = Bindings::from_json_str(r#"{"genericInformation": {"docker-actions": "build"}}"#)?;
//! let outcome = Lifecycle::new(&config, Mode::Dockerfile, "FROM busybox\n", bindings).execute()?;
//! assert_eq!(outcome, Outcome::Completed(0));
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod bindings;
pub mod config;
pub mod docker;
pub mod lifecycle;
pub mod logging;
pub mod render;

pub use bindings::{Binding, Bindings};
pub use config::{EngineConfig, Mode, Settings};
pub use docker::{CancelToken, IoEndpoints};
pub use lifecycle::{Action, ActionSet, Lifecycle, LifecycleError, Outcome, Report, State};
