use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

use crate::config::Settings;

/// Ask the configured runtime CLI for its version (`<base> --version`).
/// Returns the first line of its output.
pub fn runtime_version(settings: &Settings) -> Result<String> {
    let base = settings.base_command();
    let (program, prefix) = base
        .split_first()
        .context("runtime command is empty")?;

    let output = Command::new(program)
        .args(prefix)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to invoke `{program}`: is it installed and on PATH?"))?;

    if !output.status.success() {
        bail!(
            "`{} --version` failed ({}): {}",
            base.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// Verify that the configured runtime CLI can be invoked.
pub fn ensure_available(settings: &Settings) -> Result<()> {
    runtime_version(settings).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn settings(command: &str) -> Settings {
        Settings {
            mode: Mode::Dockerfile,
            command: command.to_string(),
            sudo_command: "/usr/bin/sudo".to_string(),
            use_sudo: false,
            docker_host: String::new(),
            keep: false,
        }
    }

    #[test]
    fn ensure_available_does_not_panic() {
        // CI may or may not have Docker.
        let _ = ensure_available(&settings("docker"));
    }

    #[test]
    fn missing_binary_is_reported() {
        let err = runtime_version(&settings("/nonexistent/docktask-runtime")).unwrap_err();
        assert!(err.to_string().contains("failed to invoke"));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_reported() {
        // `false` exits 1 even when asked for its version.
        let err = runtime_version(&settings("false")).unwrap_err();
        assert!(err.to_string().contains("--version"));
    }
}
