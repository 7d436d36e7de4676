use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::bindings::{Bindings, JOB_ID, TASK_ID};
use crate::config::Mode;

use super::error::LifecycleError;

/// Generic-information key holding the comma-separated action list.
pub const ACTIONS_KEY: &str = "docker-actions";
pub const IMAGE_TAG_KEY: &str = "docker-image-tag";
pub const CONTAINER_TAG_KEY: &str = "docker-container-tag";

const DEFAULT_IMAGE_TAG: &str = "image";
const DEFAULT_CONTAINER_TAG: &str = "container";

static ACTION_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*,\s*").expect("separator pattern is valid"));

/// One lifecycle step. Variants are declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Build,
    Run,
    Exec,
    Stop,
    Rm,
    Rmi,
    /// Compose teardown. Issued by cleanup only; never requested.
    Down,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Build => "build",
            Action::Run => "run",
            Action::Exec => "exec",
            Action::Stop => "stop",
            Action::Rm => "rm",
            Action::Rmi => "rmi",
            Action::Down => "down",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "build" => Ok(Action::Build),
            "run" => Ok(Action::Run),
            "exec" => Ok(Action::Exec),
            "stop" => Ok(Action::Stop),
            "rm" => Ok(Action::Rm),
            "rmi" => Ok(Action::Rmi),
            _ => Err(format!("unknown action `{s}`")),
        }
    }
}

/// The requested actions. Iteration follows execution order regardless of
/// how the set was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionSet(BTreeSet<Action>);

impl ActionSet {
    pub const DEFAULT: &'static str = "build,run,stop,rmi";

    /// Parse a comma-separated list. Items are trimmed; unknown items are
    /// logged and skipped.
    pub fn parse(raw: &str) -> Self {
        ACTION_SEPARATOR
            .split(raw.trim())
            .filter(|item| !item.is_empty())
            .filter_map(|item| match item.parse::<Action>() {
                Ok(action) => Some(action),
                Err(e) => {
                    warn!(target: "docktask::lifecycle", item, "{e}, ignoring");
                    None
                }
            })
            .collect()
    }

    /// The action set for `mode`: compose always brings the project up;
    /// dockerfile mode reads `docker-actions` with the default as fallback.
    pub fn resolve(mode: Mode, bindings: &Bindings) -> Self {
        match mode {
            Mode::Compose => [Action::Build].into_iter().collect(),
            Mode::Dockerfile => {
                let info = bindings.generic_information();
                Self::parse(info.text(ACTIONS_KEY).unwrap_or(Self::DEFAULT))
            }
        }
    }

    pub fn contains(&self, action: Action) -> bool {
        self.0.contains(&action)
    }

    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ActionSet {
    fn default() -> Self {
        Self::parse(Self::DEFAULT)
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(|a| a.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

/// Image and container names used by every command of one lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tags {
    pub image: String,
    pub container: String,
}

impl Tags {
    /// Defaults are `image` / `container`, suffixed with `_<job>t<task>`
    /// when both ids are bound. Explicit tag overrides win.
    pub fn resolve(bindings: &Bindings) -> Self {
        let vars = bindings.variables();
        let suffix = match (vars.text(JOB_ID), vars.text(TASK_ID)) {
            (Some(job), Some(task)) => format!("_{job}t{task}"),
            _ => String::new(),
        };

        let info = bindings.generic_information();
        Self {
            image: info
                .text(IMAGE_TAG_KEY)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{DEFAULT_IMAGE_TAG}{suffix}")),
            container: info
                .text(CONTAINER_TAG_KEY)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{DEFAULT_CONTAINER_TAG}{suffix}")),
        }
    }
}

/// One external invocation, tagged with the action it performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub action: Action,
    pub args: Vec<String>,
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// Controller states, recorded in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Init,
    Resolved,
    Building,
    SkipBuild,
    Running,
    SkipRun,
    Executing,
    SkipExec,
    Cleanup,
    Terminal,
}

/// How a lifecycle ended when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Exit code of the last forward action that ran; 0 if none ran.
    Completed(i32),
    /// Cancelled before the forward actions finished.
    Incomplete,
}

/// Everything a lifecycle did.
#[derive(Debug)]
pub struct Report {
    pub states: Vec<State>,
    /// Every command issued, forward and cleanup, in order.
    pub commands: Vec<CommandSpec>,
    pub rendered_file: Option<PathBuf>,
    pub result: Result<Outcome, LifecycleError>,
}

impl Report {
    pub fn commands_for(&self, action: Action) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter().filter(move |c| c.action == action)
    }

    /// Number of times `state` was entered.
    pub fn entered(&self, state: State) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{Binding, GENERIC_INFORMATION, VARIABLES};

    #[test]
    fn default_action_set() {
        let set = ActionSet::default();
        let actions: Vec<_> = set.iter().collect();
        assert_eq!(actions, vec![Action::Build, Action::Run, Action::Stop, Action::Rmi]);
    }

    #[test]
    fn parse_trims_and_orders() {
        let set = ActionSet::parse(" rmi ,exec,  build ");
        let actions: Vec<_> = set.iter().collect();
        assert_eq!(actions, vec![Action::Build, Action::Exec, Action::Rmi]);
        assert_eq!(set.to_string(), "build,exec,rmi");
    }

    #[test]
    fn parse_skips_unknown_and_down() {
        let set = ActionSet::parse("build,deploy,down");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Action::Build]);
        assert!(ActionSet::parse("").is_empty());
    }

    #[test]
    fn resolve_reads_generic_information() {
        let mut b = Bindings::new();
        b.insert_nested(GENERIC_INFORMATION, ACTIONS_KEY, "run,stop");
        let set = ActionSet::resolve(Mode::Dockerfile, &b);
        assert!(!set.contains(Action::Build));
        assert!(set.contains(Action::Run));

        assert_eq!(ActionSet::resolve(Mode::Dockerfile, &Bindings::new()), ActionSet::default());
    }

    #[test]
    fn compose_action_set_is_fixed() {
        let mut b = Bindings::new();
        b.insert_nested(GENERIC_INFORMATION, ACTIONS_KEY, "run,stop");
        let set = ActionSet::resolve(Mode::Compose, &b);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Action::Build]);
    }

    #[test]
    fn tags_default_without_ids() {
        let tags = Tags::resolve(&Bindings::new());
        assert_eq!(tags.image, "image");
        assert_eq!(tags.container, "container");
    }

    #[test]
    fn tags_suffixed_with_job_and_task() {
        let mut b = Bindings::new();
        b.insert(VARIABLES, Binding::from_iter([(JOB_ID, "1"), (TASK_ID, "2")]));
        let tags = Tags::resolve(&b);
        assert_eq!(tags.image, "image_1t2");
        assert_eq!(tags.container, "container_1t2");
    }

    #[test]
    fn tags_need_both_ids() {
        let mut b = Bindings::new();
        b.insert(VARIABLES, Binding::from_iter([(JOB_ID, "1")]));
        assert_eq!(Tags::resolve(&b).image, "image");
    }

    #[test]
    fn tag_overrides_win() {
        let mut b = Bindings::new();
        b.insert(VARIABLES, Binding::from_iter([(JOB_ID, "1"), (TASK_ID, "2")]));
        b.insert_nested(GENERIC_INFORMATION, IMAGE_TAG_KEY, "myimage");
        let tags = Tags::resolve(&b);
        assert_eq!(tags.image, "myimage");
        assert_eq!(tags.container, "container_1t2");
    }
}
