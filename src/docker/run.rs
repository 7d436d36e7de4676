use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::types::{
    CancelToken, Feed, IoEndpoints, ProcessError, ProcessExit, SharedWriter, StdinFeed,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const COPY_BUF: usize = 8 * 1024;
/// Time between SIGTERM and SIGKILL when destroying a process group.
const KILL_GRACE: Duration = Duration::from_secs(3);
/// How long to wait for output to drain after the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// One live child process and the threads copying its streams.
///
/// On Unix the child leads its own process group, so destroying it also
/// reaches whatever it forked (e.g. `docker` under `sudo`). Dropping a
/// handle whose process is still running destroys the process.
#[derive(Debug)]
pub struct ProcessHandle {
    program: String,
    child: Option<Child>,
    pumps: Vec<JoinHandle<()>>,
    stdin_done: Arc<AtomicBool>,
}

/// Spawn `args[0]` with the remaining tokens as arguments. `env` is overlaid
/// on the inherited environment. The child's streams are attached to `io`
/// right away.
pub fn spawn(
    args: &[String],
    work_dir: &Path,
    env: &BTreeMap<String, String>,
    io: &IoEndpoints,
) -> Result<ProcessHandle, ProcessError> {
    let (program, rest) = args.split_first().ok_or(ProcessError::EmptyCommand)?;

    let mut command = Command::new(program);
    command
        .args(rest)
        .current_dir(work_dir)
        .envs(env)
        .stdin(if io.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!(target: "docktask::process", pid = child.id(), ?args, dir = %work_dir.display(), "spawned");

    let mut pumps = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        pumps.push(copy_out(out, io.stdout.clone()));
    }
    if let Some(err) = child.stderr.take() {
        pumps.push(copy_out(err, io.stderr.clone()));
    }

    let stdin_done = Arc::new(AtomicBool::new(false));
    if let (Some(feed), Some(sink)) = (io.stdin.clone(), child.stdin.take()) {
        pump_stdin(feed, sink, stdin_done.clone());
    }

    Ok(ProcessHandle {
        program: program.clone(),
        child: Some(child),
        pumps,
        stdin_done,
    })
}

/// Spawn and wait in one call.
pub fn run(
    args: &[String],
    work_dir: &Path,
    env: &BTreeMap<String, String>,
    io: &IoEndpoints,
    cancel: &CancelToken,
) -> Result<ProcessExit, ProcessError> {
    spawn(args, work_dir, env, io)?.wait(cancel)
}

impl ProcessHandle {
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// True while the process has not been reaped.
    pub fn is_alive(&self) -> bool {
        self.child.is_some()
    }

    /// Block until the process exits or `cancel` fires. Output still in
    /// flight is given a short deadline to reach the caller's writers. A
    /// handle that was already reaped or destroyed reports `Cancelled`.
    pub fn wait(&mut self, cancel: &CancelToken) -> Result<ProcessExit, ProcessError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(ProcessExit::Cancelled);
        };

        let outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Ok(ProcessExit::Exited(exit_code(status))),
                Ok(None) => {}
                Err(source) => {
                    break Err(ProcessError::Wait {
                        program: self.program.clone(),
                        source,
                    });
                }
            }

            if cancel.is_cancelled() {
                debug!(target: "docktask::process", program = %self.program, "cancelled, destroying");
                terminate(child);
                break Ok(ProcessExit::Cancelled);
            }

            std::thread::sleep(POLL_INTERVAL);
        };

        if outcome.is_err() {
            terminate(child);
        }
        self.release();
        if let Ok(ProcessExit::Exited(code)) = &outcome {
            debug!(target: "docktask::process", program = %self.program, code, "exited");
        }
        outcome
    }

    /// Terminate the process and its group if still running. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                warn!(target: "docktask::process", pid = child.id(), program = %self.program, "destroying live process");
                terminate(child);
            }
            let _ = child.wait();
            self.release();
        }
    }

    fn release(&mut self) {
        self.child = None;
        self.stdin_done.store(true, Ordering::Release);

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while !self.pumps.iter().all(JoinHandle::is_finished) {
            if Instant::now() >= deadline {
                // A descendant still holds the pipes open.
                warn!(target: "docktask::process", program = %self.program, "output not drained, detaching copy threads");
                self.pumps.clear();
                return;
            }
            std::thread::sleep(DRAIN_POLL);
        }
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// SIGTERM to the whole group, SIGKILL to whatever is left after
/// `KILL_GRACE`, then reap the direct child.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    signal_group(child, libc::SIGTERM);
    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if !matches!(child.try_wait(), Ok(None)) {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    signal_group(child, libc::SIGKILL);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn signal_group(child: &Child, sig: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers. The group id is the child's pid,
    // which stays reserved while any member of the group is alive.
    unsafe { libc::kill(-pgid, sig) };
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn copy_out(mut from: impl Read + Send + 'static, to: SharedWriter) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; COPY_BUF];
        loop {
            let n = match from.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let mut w = to.lock().unwrap_or_else(PoisonError::into_inner);
            if w.write_all(&buf[..n]).and_then(|()| w.flush()).is_err() {
                // Keep draining so the child never blocks on a full pipe.
                trace!(target: "docktask::process", "caller writer failed, discarding output");
            }
        }
    })
}

// Detached: a write to a child that stops reading may block until it exits.
// Chunks taken after `done` or refused by the child go back to the feed.
fn pump_stdin(feed: Arc<StdinFeed>, mut to: impl Write + Send + 'static, done: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        while !done.load(Ordering::Acquire) {
            let chunk = match feed.next(POLL_INTERVAL) {
                Feed::Data(chunk) => chunk,
                Feed::Idle => continue,
                Feed::Closed => break,
            };
            if done.load(Ordering::Acquire) {
                feed.settle(&chunk);
                break;
            }
            let written = write_some(&mut to, &chunk);
            feed.settle(&chunk[written..]);
            if written < chunk.len() {
                break;
            }
            let _ = to.flush();
        }
        // Dropping `to` closes the child's stdin.
    });
}

fn write_some(to: &mut impl Write, chunk: &[u8]) -> usize {
    let mut written = 0;
    while written < chunk.len() {
        match to.write(&chunk[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    written
}
