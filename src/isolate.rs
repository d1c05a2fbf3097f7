// Trial isolation in a child process.
//
// A crash or hang inside the foreign decoder cannot always be caught in
// process. In subprocess mode the parent runs the (trusted) reference
// decoder itself and hands only the foreign call to a child: the candidate
// goes to the child's stdin as raw bytes, the outcome comes back as the exit
// status. Any other termination is an instability; exceeding the timeout is
// a hang.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::oracle::{Decoder, Outcome};

/// Child exit status for an accepted input.
pub const TRIAL_ACCEPTED: i32 = 10;
/// Child exit status for a rejected input.
pub const TRIAL_REJECTED: i32 = 11;

/// Default per-trial time limit.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_MIN: Duration = Duration::from_micros(200);
const POLL_MAX: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("cannot spawn trial child {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("waiting for trial child: {0}")]
    Wait(#[source] io::Error),
}

/// Result of running the foreign decoder in a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    Completed(Outcome),
    /// Exited with an unexpected status, or `None` if killed by a signal.
    Crashed(Option<i32>),
    TimedOut,
}

/// How trials are executed.
#[derive(Debug, Clone, Default)]
pub enum Isolation {
    /// Call the foreign decoder on the driver's own thread.
    #[default]
    InProcess,
    Subprocess(ChildTrial),
}

/// Command line for a child that runs one foreign decode.
///
/// The child must read the whole of stdin, decode it, and exit with
/// `TRIAL_ACCEPTED` or `TRIAL_REJECTED` (see [`run_child`]).
#[derive(Debug, Clone)]
pub struct ChildTrial {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

impl ChildTrial {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn run(&self, input: &[u8]) -> Result<ChildOutcome, IsolationError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| IsolationError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let status = thread::scope(|scope| {
            // Feed stdin from a helper so a child that stops reading cannot
            // block the parent past the deadline.
            if let Some(mut stdin) = stdin {
                scope.spawn(move || {
                    // The child may exit before reading everything.
                    let _ = stdin.write_all(input);
                });
            }
            wait_with_deadline(&mut child, self.timeout)
        })?;

        Ok(match status {
            None => ChildOutcome::TimedOut,
            Some(status) => classify_exit(status),
        })
    }
}

/// Wait for `child`, killing it once `timeout` has elapsed. `None` means it
/// was killed.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>, IsolationError> {
    let deadline = Instant::now() + timeout;
    let mut poll = POLL_MIN;
    loop {
        if let Some(status) = child.try_wait().map_err(IsolationError::Wait)? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            // Kill fails only if the child already exited; reap it either way.
            let _ = child.kill();
            child.wait().map_err(IsolationError::Wait)?;
            return Ok(None);
        }
        thread::sleep(poll.min(deadline - now));
        poll = (poll * 2).min(POLL_MAX);
    }
}

fn classify_exit(status: ExitStatus) -> ChildOutcome {
    match status.code() {
        Some(TRIAL_ACCEPTED) => ChildOutcome::Completed(Outcome::Accepted),
        Some(TRIAL_REJECTED) => ChildOutcome::Completed(Outcome::Rejected),
        code => ChildOutcome::Crashed(code),
    }
}

/// Child side: decode all of `stdin` and return the exit status to use.
pub fn run_child(decoder: &dyn Decoder, mut stdin: impl Read) -> io::Result<i32> {
    let mut input = Vec::new();
    stdin.read_to_end(&mut input)?;
    Ok(match decoder.decode(&input) {
        Outcome::Accepted => TRIAL_ACCEPTED,
        Outcome::Rejected => TRIAL_REJECTED,
    })
}
