use std::collections::BTreeMap;
use std::path::PathBuf;

use tempfile::TempDir;
use tracing::{debug, info, info_span, warn};

use crate::bindings::{Bindings, SCRATCH_DIR};
use crate::config::{EngineConfig, Mode, Settings};
use crate::docker::{self, CancelToken, IoEndpoints, ProcessExit, ProcessHandle};
use crate::render::{self, RenderError};

use super::commands::{self, ActionOptions};
use super::error::LifecycleError;
use super::shutdown::{self, Registration};
use super::types::{Action, ActionSet, CommandSpec, Outcome, Report, State, Tags};

/// Environment variable carrying the runtime endpoint.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// One container lifecycle: render the template, run the requested forward
/// actions, then tear down whatever was created.
pub struct Lifecycle<'c> {
    config: &'c EngineConfig,
    mode: Mode,
    template: String,
    bindings: Bindings,
    io: IoEndpoints,
    cancel: CancelToken,
    shutdown_hook: bool,
}

impl<'c> Lifecycle<'c> {
    pub fn new(
        config: &'c EngineConfig,
        mode: Mode,
        template: impl Into<String>,
        bindings: Bindings,
    ) -> Self {
        Self {
            config,
            mode,
            template: template.into(),
            bindings,
            io: IoEndpoints::inherit(),
            cancel: CancelToken::new(),
            shutdown_hook: true,
        }
    }

    pub fn io(mut self, io: IoEndpoints) -> Self {
        self.io = io;
        self
    }

    /// Token that aborts the forward actions. Cleanup still runs.
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether to register with the process-wide shutdown hook (default on).
    pub fn shutdown_hook(mut self, enabled: bool) -> Self {
        self.shutdown_hook = enabled;
        self
    }

    /// Run to completion and return the outcome only.
    pub fn execute(self) -> Result<Outcome, LifecycleError> {
        self.run().result
    }

    /// Run to completion. Cleanup has run exactly once when this returns.
    pub fn run(self) -> Report {
        let settings = self.config.settings(self.mode, &self.bindings);
        let actions = ActionSet::resolve(self.mode, &self.bindings);
        let tags = Tags::resolve(&self.bindings);

        let span = info_span!(
            "lifecycle",
            mode = self.mode.as_str(),
            image = %tags.image,
            container = %tags.container
        );
        let _enter = span.enter();
        info!(target: "docktask::lifecycle", %actions, "starting");

        let mut env = self.bindings.string_entries();
        env.insert(DOCKER_HOST_ENV.to_string(), settings.docker_host.clone());

        let registration = self
            .shutdown_hook
            .then(|| shutdown::register(self.cancel.clone()));

        let mut session = Session {
            mode: self.mode,
            base: settings.base_command(),
            settings,
            actions,
            tags,
            bindings: self.bindings,
            env,
            io: self.io,
            cancel: self.cancel,
            work_dir: PathBuf::new(),
            temp_dir: None,
            rendered: None,
            file_written: false,
            live: None,
            image_created: false,
            container_started: false,
            cleaned: false,
            states: vec![State::Init],
            commands: Vec::new(),
            registration,
        };

        let result = session.prepare(&self.template).and_then(|()| session.forward());
        session.cleanup();

        match &result {
            Ok(outcome) => info!(target: "docktask::lifecycle", ?outcome, "finished"),
            Err(e) => warn!(target: "docktask::lifecycle", error = %e, "failed"),
        }
        session.into_report(result)
    }
}

/// Mutable state of a running lifecycle. Dropping a session that has not
/// been cleaned up runs cleanup, so unwinding out of a forward action still
/// tears everything down.
struct Session {
    mode: Mode,
    settings: Settings,
    base: Vec<String>,
    actions: ActionSet,
    tags: Tags,
    bindings: Bindings,
    env: BTreeMap<String, String>,
    io: IoEndpoints,
    cancel: CancelToken,
    work_dir: PathBuf,
    temp_dir: Option<TempDir>,
    rendered: Option<PathBuf>,
    file_written: bool,
    live: Option<ProcessHandle>,
    image_created: bool,
    container_started: bool,
    cleaned: bool,
    states: Vec<State>,
    commands: Vec<CommandSpec>,
    registration: Option<Registration<'static>>,
}

impl Session {
    /// Pick the working directory and write the rendered file.
    fn prepare(&mut self, template: &str) -> Result<(), LifecycleError> {
        self.work_dir = match self.bindings.text(SCRATCH_DIR) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let temp = tempfile::Builder::new()
                    .prefix("docktask-")
                    .tempdir()
                    .map_err(|source| RenderError::WorkDir {
                        path: std::env::temp_dir(),
                        source,
                    })?;
                let path = temp.path().to_path_buf();
                self.temp_dir = Some(temp);
                path
            }
        };
        debug!(target: "docktask::lifecycle", dir = %self.work_dir.display(), "working directory");

        let path = self.work_dir.join(self.mode.file_name());
        self.rendered = Some(path.clone());
        let text = render::render(template, &self.env);
        render::persist(&text, &path)?;
        self.file_written = true;
        debug!(target: "docktask::lifecycle", file = %path.display(), "rendered");

        self.states.push(State::Resolved);
        Ok(())
    }

    fn forward(&mut self) -> Result<Outcome, LifecycleError> {
        const STEPS: [(Action, State, State); 3] = [
            (Action::Build, State::Building, State::SkipBuild),
            (Action::Run, State::Running, State::SkipRun),
            (Action::Exec, State::Executing, State::SkipExec),
        ];

        for (action, active, skipped) in STEPS {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Incomplete);
            }
            if !self.actions.contains(action) {
                self.states.push(skipped);
                self.mark_created(action);
                continue;
            }

            self.states.push(active);
            match self.launch(action)? {
                ProcessExit::Exited(0) => {}
                ProcessExit::Exited(code) => {
                    return Err(LifecycleError::NonZeroExit { action, code });
                }
                ProcessExit::Cancelled => return Ok(Outcome::Incomplete),
            }
        }
        Ok(Outcome::Completed(0))
    }

    // A skipped build or run means the image or container already exists.
    // A launched one may leave a resource behind even when it fails.
    fn mark_created(&mut self, action: Action) {
        match action {
            Action::Build => self.image_created = true,
            Action::Run => self.container_started = true,
            _ => {}
        }
    }

    fn launch(&mut self, action: Action) -> Result<ProcessExit, LifecycleError> {
        let spec = self.command(action);
        info!(target: "docktask::lifecycle", %action, command = %spec, "running");

        let handle = docker::spawn(&spec.args, &self.work_dir, &self.env, &self.io)
            .map_err(|source| LifecycleError::Launch { action, source })?;
        self.mark_created(action);
        let handle = self.live.insert(handle);

        let exit = handle
            .wait(&self.cancel)
            .map_err(|source| LifecycleError::Launch { action, source });
        self.live = None;
        exit
    }

    fn command(&mut self, action: Action) -> CommandSpec {
        let options = ActionOptions::extract(self.mode, action, &self.bindings);
        let spec = commands::build(self.mode, action, &self.base, &self.tags, &options);
        self.commands.push(spec.clone());
        spec
    }

    /// Tear down in fixed order. Runs at most once; failures are logged.
    fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        self.states.push(State::Cleanup);

        if let Some(mut live) = self.live.take() {
            live.destroy();
        }

        // The forward token may be cancelled; teardown gets its own.
        let cancel = CancelToken::new();
        if self.container_started {
            if self.actions.contains(Action::Stop) {
                self.teardown(Action::Stop, &cancel);
            }
            if self.actions.contains(Action::Stop) || self.actions.contains(Action::Rm) {
                self.teardown(Action::Rm, &cancel);
            }
        }
        if self.image_created && self.actions.contains(Action::Rmi) {
            self.teardown(Action::Rmi, &cancel);
        }
        if self.mode == Mode::Compose && self.file_written {
            self.teardown(Action::Down, &cancel);
        }

        self.remove_files();
        self.states.push(State::Terminal);
        self.registration = None;
    }

    fn teardown(&mut self, action: Action, cancel: &CancelToken) {
        let spec = self.command(action);
        info!(target: "docktask::lifecycle", %action, command = %spec, "cleanup");
        match docker::run::run(&spec.args, &self.work_dir, &self.env, &self.io, cancel) {
            Ok(ProcessExit::Exited(0)) => {}
            Ok(exit) => warn!(target: "docktask::lifecycle", %action, ?exit, "cleanup command failed"),
            Err(e) => warn!(target: "docktask::lifecycle", %action, error = %e, "cleanup command could not run"),
        }
    }

    fn remove_files(&mut self) {
        if self.settings.keep {
            if let Some(temp) = self.temp_dir.take() {
                let kept = temp.keep();
                info!(target: "docktask::lifecycle", dir = %kept.display(), "keeping working directory");
            } else if let Some(path) = &self.rendered {
                info!(target: "docktask::lifecycle", file = %path.display(), "keeping rendered file");
            }
            return;
        }

        if let Some(path) = &self.rendered {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(target: "docktask::lifecycle", file = %path.display(), "removed rendered file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(target: "docktask::lifecycle", file = %path.display(), error = %e, "failed to remove rendered file"),
            }
        }
        if let Some(temp) = self.temp_dir.take() {
            let path = temp.path().to_path_buf();
            if let Err(e) = temp.close() {
                warn!(target: "docktask::lifecycle", dir = %path.display(), error = %e, "failed to remove working directory");
            }
        }
    }

    fn into_report(mut self, result: Result<Outcome, LifecycleError>) -> Report {
        Report {
            states: std::mem::take(&mut self.states),
            commands: std::mem::take(&mut self.commands),
            rendered_file: self.rendered.take(),
            result,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.cleaned {
            warn!(target: "docktask::lifecycle", "lifecycle interrupted, cleaning up");
            self.cleanup();
        }
    }
}
