use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;

/// Cooperative cancellation token backed by an `AtomicBool`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

const FEED_CHUNK: usize = 8 * 1024;

/// Caller input handed to consecutive processes of one lifecycle.
///
/// A single reader thread, started on first use, owns the source and
/// queues what it reads. Process pumps take chunks from the queue and give
/// back whatever their process did not accept, so input that arrives after
/// one process exits goes to the next.
pub struct StdinFeed {
    state: Mutex<FeedState>,
}

struct FeedState {
    source: Option<Box<dyn Read + Send>>,
    chunks: Option<Receiver<Vec<u8>>>,
    pending: VecDeque<Vec<u8>>,
    /// Chunks handed out and not yet settled.
    lent: usize,
}

pub(crate) enum Feed {
    Data(Vec<u8>),
    Idle,
    Closed,
}

impl StdinFeed {
    pub fn new(source: impl Read + Send + 'static) -> Self {
        Self {
            state: Mutex::new(FeedState {
                source: Some(Box::new(source)),
                chunks: None,
                pending: VecDeque::new(),
                lent: 0,
            }),
        }
    }

    /// Next chunk of input, waiting at most `timeout` for one. Every `Data`
    /// must be answered with [`StdinFeed::settle`]. End of input is only
    /// reported once no chunk is still out.
    pub(crate) fn next(&self, timeout: Duration) -> Feed {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(chunk) = state.pending.pop_front() {
            state.lent += 1;
            return Feed::Data(chunk);
        }
        if let Some(source) = state.source.take() {
            state.chunks = Some(read_source(source));
        }
        let received = match &state.chunks {
            Some(chunks) => chunks.recv_timeout(timeout),
            None => Err(RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(chunk) => {
                state.lent += 1;
                Feed::Data(chunk)
            }
            Err(RecvTimeoutError::Timeout) => Feed::Idle,
            Err(RecvTimeoutError::Disconnected) if state.lent > 0 => {
                drop(state);
                std::thread::sleep(timeout);
                Feed::Idle
            }
            Err(RecvTimeoutError::Disconnected) => Feed::Closed,
        }
    }

    /// Return a chunk from [`StdinFeed::next`]. `rest` is the part the
    /// process did not take; it is served first next time.
    pub(crate) fn settle(&self, rest: &[u8]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.lent = state.lent.saturating_sub(1);
        if !rest.is_empty() {
            state.pending.push_front(rest.to_vec());
        }
    }
}

impl std::fmt::Debug for StdinFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdinFeed").finish_non_exhaustive()
    }
}

// Detached: reading the caller's source may block forever. The thread ends
// at end of input or once the feed is dropped.
fn read_source(mut source: Box<dyn Read + Send>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = [0u8; FEED_CHUNK];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            if tx.send(buf[..n].to_vec()).is_err() {
                break;
            }
        }
    });
    rx
}

/// The three caller-side endpoints a child process is wired to.
///
/// Endpoints are shared so that the same reader and writers serve every
/// process of a lifecycle in turn.
#[derive(Clone)]
pub struct IoEndpoints {
    /// `None` gives the child an empty stdin.
    pub stdin: Option<Arc<StdinFeed>>,
    pub stdout: SharedWriter,
    pub stderr: SharedWriter,
}

impl IoEndpoints {
    /// Forward to this process's own standard streams.
    pub fn inherit() -> Self {
        Self {
            stdin: Some(Arc::new(StdinFeed::new(io::stdin()))),
            stdout: Arc::new(Mutex::new(io::stdout())),
            stderr: Arc::new(Mutex::new(io::stderr())),
        }
    }

    /// No input; output goes to the given writers.
    pub fn writers(stdout: SharedWriter, stderr: SharedWriter) -> Self {
        Self {
            stdin: None,
            stdout,
            stderr,
        }
    }

    /// No input; output is discarded.
    pub fn null() -> Self {
        Self::writers(
            Arc::new(Mutex::new(io::sink())),
            Arc::new(Mutex::new(io::sink())),
        )
    }

    pub fn with_stdin(mut self, source: impl Read + Send + 'static) -> Self {
        self.stdin = Some(Arc::new(StdinFeed::new(source)));
        self
    }
}

impl std::fmt::Debug for IoEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoEndpoints")
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

/// How a waited-on process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exit code; `128 + signal` for signal-terminated children on Unix.
    Exited(i32),
    /// The cancel token fired and the process was destroyed.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("empty command line")]
    EmptyCommand,
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}
