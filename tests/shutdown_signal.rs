//! A termination signal delivered mid-lifecycle cancels it and cleanup
//! still runs. Kept in its own test binary because the handlers are
//! process-wide.
#![cfg(unix)]

use std::time::{Duration, Instant};

use docktask::bindings::{GENERIC_INFORMATION, SCRATCH_DIR};
use docktask::config::Properties;
use docktask::lifecycle::{ACTIONS_KEY, shutdown};
use docktask::{Bindings, EngineConfig, IoEndpoints, Lifecycle, Mode, Outcome};

#[test]
fn sigterm_cancels_running_lifecycle() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let calls = tools.path().join("calls.log");
    let script = tools.path().join("runtime.sh");
    std::fs::write(
        &script,
        format!(
            "echo \"$*\" >> '{}'\ncase \"$1\" in run) sleep 30 ;; esac\n",
            calls.display()
        ),
    )
    .unwrap();

    let mut props = Properties::new();
    props.set("docker.file.command", script.display().to_string());
    props.set("docker.file.use.sudo", "true");
    props.set("docker.file.sudo.command", "sh");
    let cfg = EngineConfig::from_properties(props);

    let mut b = Bindings::new();
    b.insert(SCRATCH_DIR, scratch.path().display().to_string());
    b.insert_nested(GENERIC_INFORMATION, ACTIONS_KEY, "run,stop");

    shutdown::install_handlers();

    let log = calls.clone();
    let sender = std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(20);
        while Instant::now() < deadline {
            let seen = std::fs::read_to_string(&log).unwrap_or_default();
            if seen.lines().any(|l| l.starts_with("run ")) {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        // SAFETY: signalling our own process; the handler only records it
        // while a lifecycle is registered.
        unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
    });

    let started = Instant::now();
    let outcome = Lifecycle::new(&cfg, Mode::Dockerfile, "FROM busybox\n", b)
        .io(IoEndpoints::null())
        .execute()
        .unwrap();
    sender.join().unwrap();

    assert_eq!(outcome, Outcome::Incomplete);
    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(shutdown::pending_signal(), Some(libc::SIGTERM));
    let issued = std::fs::read_to_string(&calls).unwrap();
    let lines: Vec<_> = issued.lines().collect();
    assert_eq!(lines, vec!["run --name container image", "stop container", "rm container"]);
    assert!(!scratch.path().join("Dockerfile").exists());
}
