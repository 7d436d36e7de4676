use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error};

use docktask::bindings::{GENERIC_INFORMATION, SCRATCH_DIR, VARIABLES};
use docktask::lifecycle::shutdown;
use docktask::logging::{self, LogFormat};
use docktask::{Bindings, EngineConfig, IoEndpoints, Lifecycle, Mode, Outcome, docker};

#[derive(Debug, Parser)]
#[command(name = "docktask", version, about = "Render a container template and run its lifecycle")]
struct Cli {
    /// Property file (default: ./docktask.yaml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `docktask::lifecycle=debug`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render TEMPLATE and run the configured actions, then clean up.
    Run(RunArgs),
    /// Print the resolved settings as YAML.
    Config(ConfigArgs),
    /// Print the tool version and probe the configured runtime.
    Version {
        #[arg(long, value_enum, default_value_t = Mode::Dockerfile)]
        mode: Mode,
    },
}

#[derive(Debug, Args)]
struct BindingArgs {
    /// JSON object with the task bindings.
    #[arg(long)]
    bindings: Option<PathBuf>,

    /// Top-level string binding, KEY=VALUE. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_pair)]
    sets: Vec<(String, String)>,

    /// Generic-information entry, KEY=VALUE. Repeatable.
    #[arg(long = "info", value_name = "KEY=VALUE", value_parser = parse_pair)]
    infos: Vec<(String, String)>,

    /// Runner variable, KEY=VALUE. Repeatable.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_pair)]
    vars: Vec<(String, String)>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, value_enum, default_value_t = Mode::Dockerfile)]
    mode: Mode,

    /// Working directory for the rendered file (default: a fresh temp dir).
    #[arg(long)]
    scratch: Option<PathBuf>,

    #[command(flatten)]
    bindings: BindingArgs,

    /// Template file, or `-` to read it from stdin.
    template: PathBuf,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[arg(long, value_enum, default_value_t = Mode::Dockerfile)]
    mode: Mode,

    #[command(flatten)]
    bindings: BindingArgs,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.log_format, cli.log_level.as_deref()) {
        eprintln!("docktask: {e}");
        return ExitCode::from(2);
    }

    match dispatch(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{e:#}");
            eprintln!("docktask: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    let config = EngineConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run(&config, args),
        Command::Config(args) => {
            let bindings = args.bindings.load()?;
            let settings = config.settings(args.mode, &bindings);
            print!("{}", serde_yaml::to_string(&settings)?);
            Ok(0)
        }
        Command::Version { mode } => {
            println!("docktask {}", env!("CARGO_PKG_VERSION"));
            let settings = config.settings(mode, &Bindings::new());
            match docker::runtime_version(&settings) {
                Ok(version) => {
                    println!("{}: {version}", settings.command);
                    Ok(0)
                }
                Err(e) => {
                    println!("{}: unavailable ({e:#})", settings.command);
                    Ok(1)
                }
            }
        }
    }
}

fn run(config: &EngineConfig, args: RunArgs) -> Result<i32> {
    let mut bindings = args.bindings.load()?;
    if let Some(dir) = &args.scratch {
        bindings.insert(SCRATCH_DIR, dir.display().to_string());
    }

    let from_stdin = args.template == Path::new("-");
    let template = read_template(&args.template)?;

    let mut io = IoEndpoints::inherit();
    if from_stdin {
        io.stdin = None;
    }

    shutdown::install_handlers();
    let report = Lifecycle::new(config, args.mode, template, bindings)
        .io(io)
        .run();
    for command in &report.commands {
        debug!(action = %command.action, "issued: {command}");
    }

    match report.result {
        Ok(Outcome::Completed(code)) => Ok(code),
        Ok(Outcome::Incomplete) => Ok(shutdown::pending_signal().map_or(130, |sig| 128 + sig)),
        Err(e) => {
            eprintln!("docktask: {e}");
            Ok(e.exit_code())
        }
    }
}

fn read_template(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read template from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read template {}", path.display()))
}

impl BindingArgs {
    fn load(&self) -> Result<Bindings> {
        let mut bindings = match &self.bindings {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read bindings {}", path.display()))?;
                Bindings::from_json_str(&raw)
                    .with_context(|| format!("invalid bindings {}", path.display()))?
            }
            None => Bindings::new(),
        };

        for (k, v) in &self.sets {
            if k == GENERIC_INFORMATION || k == VARIABLES {
                bail!("`{k}` is a map; use --info or --var");
            }
            bindings.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.infos {
            bindings.insert_nested(GENERIC_INFORMATION, k.clone(), v.clone());
        }
        for (k, v) in &self.vars {
            bindings.insert_nested(VARIABLES, k.clone(), v.clone());
        }
        Ok(bindings)
    }
}
