use crate::bindings::{Bindings, extract};
use crate::config::Mode;

use super::types::{Action, CommandSpec, Tags};

pub const FILE_SPLIT_KEY: &str = "docker-file-options-split-regex";
pub const COMPOSE_SPLIT_KEY: &str = "docker-compose-options-split-regex";
pub const COMPOSE_OPTIONS_KEY: &str = "docker-compose-options";
pub const COMPOSE_UP_OPTIONS_KEY: &str = "docker-compose-up-options";

const NO_ANSI: &str = "--no-ansi";

/// Generic-information key holding the custom options of `action`.
pub fn option_key(mode: Mode, action: Action) -> Option<&'static str> {
    match (mode, action) {
        (Mode::Compose, Action::Build) => Some(COMPOSE_UP_OPTIONS_KEY),
        (Mode::Compose, _) => None,
        (Mode::Dockerfile, Action::Build) => Some("docker-build-options"),
        (Mode::Dockerfile, Action::Run) => Some("docker-run-options"),
        (Mode::Dockerfile, Action::Exec) => Some("docker-exec-command"),
        (Mode::Dockerfile, Action::Stop) => Some("docker-stop-options"),
        (Mode::Dockerfile, Action::Rm) => Some("docker-rm-options"),
        (Mode::Dockerfile, Action::Rmi) => Some("docker-rmi-options"),
        (Mode::Dockerfile, Action::Down) => None,
    }
}

pub fn split_key(mode: Mode) -> &'static str {
    match mode {
        Mode::Dockerfile => FILE_SPLIT_KEY,
        Mode::Compose => COMPOSE_SPLIT_KEY,
    }
}

/// Custom tokens for one command. `general` is placed before the compose
/// subcommand and is always empty in dockerfile mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOptions {
    pub general: Vec<String>,
    pub specific: Vec<String>,
}

impl ActionOptions {
    pub fn extract(mode: Mode, action: Action, bindings: &Bindings) -> Self {
        let split = Some(split_key(mode));
        let general = match (mode, action) {
            (Mode::Compose, Action::Build) => {
                extract(bindings, COMPOSE_OPTIONS_KEY, split)
            }
            _ => Vec::new(),
        };
        let specific = option_key(mode, action)
            .map(|key| extract(bindings, key, split))
            .unwrap_or_default();
        Self { general, specific }
    }
}

/// Assemble the argument list for `action`. `base` is the sudo prefix (if
/// any) followed by the runtime binary.
pub fn build(
    mode: Mode,
    action: Action,
    base: &[String],
    tags: &Tags,
    options: &ActionOptions,
) -> CommandSpec {
    let mut args: Vec<String> = base.to_vec();
    let specific = options.specific.iter().cloned();

    match (mode, action) {
        (Mode::Compose, Action::Build) => {
            args.push(NO_ANSI.into());
            args.extend(options.general.iter().cloned());
            args.extend(["-f".into(), mode.file_name().into(), "up".into()]);
            args.extend(specific);
        }
        (_, Action::Down) => {
            args.extend([NO_ANSI.into(), "down".into(), "--volumes".into()]);
        }
        (Mode::Dockerfile, Action::Build) => {
            args.push("build".into());
            args.extend(specific);
            args.extend(["-t".into(), tags.image.clone(), ".".into()]);
        }
        (_, Action::Run) => {
            args.push("run".into());
            args.extend(specific);
            args.extend(["--name".into(), tags.container.clone(), tags.image.clone()]);
        }
        (_, Action::Exec) => {
            args.extend(["exec".into(), tags.container.clone()]);
            args.extend(specific);
        }
        (_, Action::Stop | Action::Rm) => {
            args.push(action.as_str().into());
            args.extend(specific);
            args.push(tags.container.clone());
        }
        (_, Action::Rmi) => {
            args.push("rmi".into());
            args.extend(specific);
            args.push(tags.image.clone());
        }
    }

    CommandSpec { action, args }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::GENERIC_INFORMATION;

    fn tags() -> Tags {
        Tags {
            image: "image_1t2".into(),
            container: "container_1t2".into(),
        }
    }

    fn opts(specific: &[&str]) -> ActionOptions {
        ActionOptions {
            general: Vec::new(),
            specific: specific.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn base() -> Vec<String> {
        vec!["docker".into()]
    }

    fn args(spec: &CommandSpec) -> Vec<&str> {
        spec.args.iter().map(String::as_str).collect()
    }

    #[test]
    fn build_ends_with_tag_and_context() {
        let spec = build(Mode::Dockerfile, Action::Build, &base(), &tags(), &opts(&["--pull"]));
        assert_eq!(spec.action, Action::Build);
        assert_eq!(args(&spec), vec!["docker", "build", "--pull", "-t", "image_1t2", "."]);
    }

    #[test]
    fn run_names_container_then_image() {
        let spec = build(Mode::Dockerfile, Action::Run, &base(), &tags(), &opts(&["-d"]));
        assert_eq!(
            args(&spec),
            vec!["docker", "run", "-d", "--name", "container_1t2", "image_1t2"]
        );
    }

    #[test]
    fn exec_tokens_follow_container() {
        let spec = build(
            Mode::Dockerfile,
            Action::Exec,
            &base(),
            &tags(),
            &opts(&["/bin/sh", "-c", "echo 'hi there'"]),
        );
        assert_eq!(
            args(&spec),
            vec!["docker", "exec", "container_1t2", "/bin/sh", "-c", "echo 'hi there'"]
        );
    }

    #[test]
    fn stop_rm_rmi_target_the_right_tag() {
        let stop = build(Mode::Dockerfile, Action::Stop, &base(), &tags(), &opts(&["-t", "5"]));
        assert_eq!(args(&stop), vec!["docker", "stop", "-t", "5", "container_1t2"]);
        let rm = build(Mode::Dockerfile, Action::Rm, &base(), &tags(), &opts(&[]));
        assert_eq!(args(&rm), vec!["docker", "rm", "container_1t2"]);
        let rmi = build(Mode::Dockerfile, Action::Rmi, &base(), &tags(), &opts(&["-f"]));
        assert_eq!(args(&rmi), vec!["docker", "rmi", "-f", "image_1t2"]);
    }

    #[test]
    fn sudo_prefix_is_kept_first() {
        let base = vec!["/usr/bin/sudo".to_string(), "docker".to_string()];
        for action in [Action::Build, Action::Run, Action::Stop, Action::Rmi] {
            let spec = build(Mode::Dockerfile, action, &base, &tags(), &opts(&[]));
            assert_eq!(&spec.args[..2], &base[..]);
        }
    }

    #[test]
    fn compose_up_places_general_before_file() {
        let options = ActionOptions {
            general: vec!["--verbose".into()],
            specific: vec!["--build".into()],
        };
        let spec = build(
            Mode::Compose,
            Action::Build,
            &["docker-compose".to_string()],
            &tags(),
            &options,
        );
        assert_eq!(
            args(&spec),
            vec![
                "docker-compose",
                "--no-ansi",
                "--verbose",
                "-f",
                "docker-compose.yml",
                "up",
                "--build"
            ]
        );
    }

    #[test]
    fn compose_down_removes_volumes() {
        let spec = build(
            Mode::Compose,
            Action::Down,
            &["docker-compose".to_string()],
            &tags(),
            &ActionOptions::default(),
        );
        assert_eq!(
            args(&spec),
            vec!["docker-compose", "--no-ansi", "down", "--volumes"]
        );
    }

    #[test]
    fn extract_uses_mode_keys() {
        let mut b = Bindings::new();
        for (k, v) in [
            ("docker-rm-options", "-f!-v"),
            (FILE_SPLIT_KEY, "!"),
            (COMPOSE_OPTIONS_KEY, "--verbose"),
            (COMPOSE_UP_OPTIONS_KEY, "--build --abort-on-container-exit"),
        ] {
            b.insert_nested(GENERIC_INFORMATION, k, v);
        }

        let rm = ActionOptions::extract(Mode::Dockerfile, Action::Rm, &b);
        assert_eq!(rm, opts(&["-f", "-v"]));

        let up = ActionOptions::extract(Mode::Compose, Action::Build, &b);
        assert_eq!(up.general, vec!["--verbose"]);
        assert_eq!(up.specific, vec!["--build", "--abort-on-container-exit"]);

        let down = ActionOptions::extract(Mode::Compose, Action::Down, &b);
        assert_eq!(down, ActionOptions::default());
    }
}
