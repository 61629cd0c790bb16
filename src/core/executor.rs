//! Resource-limited execution of query operations.
//!
//! [`run_bounded`] forks a fresh worker process for each call. The worker
//! lowers its own address-space and CPU-time ceilings, runs the operation,
//! writes one newline-terminated JSON report to a socket, and exits. The
//! parent waits on that socket for at most the configured wall-clock
//! duration, polling the child's exit status as it goes, and escalates
//! `SIGTERM` to `SIGKILL` when the deadline passes.
//!
//! Exactly one [`ExecutionOutcome`] is produced per call and the caller never
//! blocks past `max_duration` plus the termination grace period.
//!
//! The worker must not log: it inherits the parent's locks as they were at
//! the moment of the fork.

use crate::core::error::{MotifStudioError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ORIGIN: &str = "executor";

/// Interval between checks of the result channel and the child's status.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time a worker gets to exit after `SIGTERM` before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Time to wait for a buffered report after the child has already exited.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Ceilings applied to a single bounded call. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    pub max_ram_bytes: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl ResourceLimits {
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_ram_bytes(mut self, bytes: u64) -> Self {
        self.max_ram_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }
}

/// Result of one bounded call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome<T> {
    Success(T),
    /// The wall-clock deadline passed and the worker was terminated.
    TimedOut { after: Duration },
    /// The worker died without reporting, most likely at its memory ceiling.
    ResourceExhausted { limit_bytes: Option<u64> },
    /// The operation itself returned an error (or panicked).
    Failed(MotifStudioError),
}

impl<T> ExecutionOutcome<T> {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::TimedOut { .. } => "timed_out",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Failed(_) => "failed",
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Collapses the outcome into a `Result`, mapping limit violations to
    /// their structured errors.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Success(value) => Ok(value),
            Self::TimedOut { after } => Err(MotifStudioError::timed_out(after, ORIGIN)),
            Self::ResourceExhausted { limit_bytes } => {
                Err(MotifStudioError::resource_exhausted(limit_bytes, ORIGIN))
            }
            Self::Failed(err) => Err(err),
        }
    }
}

/// What a worker writes back on its socket.
#[derive(Debug, Serialize, Deserialize)]
enum WorkerReport<T> {
    Success(T),
    Failed(MotifStudioError),
}

/// Runs `job` in a forked worker subject to `limits`.
///
/// `operation` names the call in logs. The job's return value crosses the
/// process boundary as JSON, so `T` must round-trip through serde.
pub fn run_bounded<T, F>(operation: &str, limits: &ResourceLimits, job: F) -> ExecutionOutcome<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    let (parent_end, child_end) = match UnixStream::pair() {
        Ok(pair) => pair,
        Err(e) => {
            return ExecutionOutcome::Failed(MotifStudioError::system(
                "worker_spawn_failed",
                format!("Failed to create worker channel: {e}"),
                ORIGIN,
            ))
        }
    };

    // SAFETY: the child only runs `job`, writes to its socket, and calls
    // `_exit`; it never returns into the caller's stack.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let e = std::io::Error::last_os_error();
        return ExecutionOutcome::Failed(MotifStudioError::system(
            "worker_spawn_failed",
            format!("Failed to fork worker: {e}"),
            ORIGIN,
        ));
    }
    if pid == 0 {
        drop(parent_end);
        run_worker(child_end, limits, job);
    }
    drop(child_end);

    let started = Instant::now();
    let outcome = supervise(pid, parent_end, limits, started);
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &outcome {
        ExecutionOutcome::Success(_) | ExecutionOutcome::Failed(_) => {
            info!(operation, pid, elapsed_ms, outcome = outcome.label(), "bounded call finished");
        }
        _ => {
            warn!(operation, pid, elapsed_ms, outcome = outcome.label(), "bounded call stopped");
        }
    }
    outcome
}

fn run_worker<T, F>(mut channel: UnixStream, limits: &ResourceLimits, job: F) -> !
where
    T: Serialize,
    F: FnOnce() -> Result<T>,
{
    apply_limits(limits);

    let report = match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(value)) => WorkerReport::Success(value),
        Ok(Err(err)) => WorkerReport::Failed(err),
        Err(payload) => WorkerReport::Failed(MotifStudioError::system(
            "worker_panicked",
            format!("Query worker panicked: {}", panic_message(payload.as_ref())),
            ORIGIN,
        )),
    };

    let encoded = serde_json::to_vec(&report).or_else(|e| {
        serde_json::to_vec(&WorkerReport::<T>::Failed(MotifStudioError::system(
            "worker_protocol",
            format!("Failed to encode worker result: {e}"),
            ORIGIN,
        )))
    });
    let status = match encoded {
        Ok(mut line) => {
            line.push(b'\n');
            i32::from(channel.write_all(&line).and_then(|()| channel.flush()).is_err())
        }
        Err(_) => 1,
    };

    // SAFETY: `_exit` ends the worker without running the parent's atexit
    // handlers or destructors for state copied across the fork.
    unsafe { libc::_exit(status) }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type RlimitResource = libc::c_int;

fn apply_limits(limits: &ResourceLimits) {
    if let Some(bytes) = limits.max_ram_bytes {
        lower_soft_limit(libc::RLIMIT_AS, bytes);
    }
    if let Some(duration) = limits.max_duration {
        let seconds = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        lower_soft_limit(libc::RLIMIT_CPU, seconds.max(1));
    }
}

/// Sets the soft limit to `min(value, hard limit)`. Failures are ignored;
/// the parent's wall-clock deadline still applies.
fn lower_soft_limit(resource: RlimitResource, value: u64) {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `current` is a valid, exclusively borrowed rlimit.
    if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
        return;
    }
    let wanted = libc::rlim_t::try_from(value).unwrap_or(libc::RLIM_INFINITY);
    let lowered = libc::rlimit {
        rlim_cur: wanted.min(current.rlim_max),
        rlim_max: current.rlim_max,
    };
    // SAFETY: `lowered` is a valid rlimit that outlives the call.
    unsafe {
        libc::setrlimit(resource, &lowered);
    }
}

fn supervise<T: DeserializeOwned>(
    pid: libc::pid_t,
    channel: UnixStream,
    limits: &ResourceLimits,
    started: Instant,
) -> ExecutionOutcome<T> {
    let reader_end = match channel.try_clone() {
        Ok(stream) => stream,
        Err(e) => {
            terminate(pid);
            return ExecutionOutcome::Failed(MotifStudioError::system(
                "worker_spawn_failed",
                format!("Failed to clone worker channel: {e}"),
                ORIGIN,
            ));
        }
    };

    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || {
        let mut line = String::new();
        let read = BufReader::new(reader_end).read_line(&mut line).map(|_| line);
        let _ = tx.send(read);
    });

    let outcome = loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(line)) if !line.trim().is_empty() => {
                reap(pid);
                break decode_report(&line);
            }
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                let status = reap(pid);
                break exhausted(pid, limits, status);
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(status) = try_reap(pid) {
            // The report, if one was written, is already buffered in the socket.
            break match rx.recv_timeout(DRAIN_GRACE) {
                Ok(Ok(line)) if !line.trim().is_empty() => decode_report(&line),
                _ => exhausted(pid, limits, Some(status)),
            };
        }

        if let Some(max) = limits.max_duration {
            if started.elapsed() >= max {
                terminate(pid);
                break ExecutionOutcome::TimedOut {
                    after: started.elapsed(),
                };
            }
        }
    };

    // Unblocks the reader thread if the worker never wrote a full line.
    let _ = channel.shutdown(Shutdown::Both);
    let _ = reader.join();
    outcome
}

fn decode_report<T: DeserializeOwned>(line: &str) -> ExecutionOutcome<T> {
    match serde_json::from_str::<WorkerReport<T>>(line) {
        Ok(WorkerReport::Success(value)) => ExecutionOutcome::Success(value),
        Ok(WorkerReport::Failed(err)) => ExecutionOutcome::Failed(err),
        Err(e) => ExecutionOutcome::Failed(MotifStudioError::system(
            "worker_protocol",
            format!("Failed to decode worker result: {e}"),
            ORIGIN,
        )),
    }
}

/// A worker that exits without a report is classified as resource
/// exhaustion whatever its exit status; the status is only logged.
fn exhausted<T>(pid: libc::pid_t, limits: &ResourceLimits, status: Option<i32>) -> ExecutionOutcome<T> {
    match status {
        Some(status) if libc::WIFSIGNALED(status) => {
            debug!(pid, signal = libc::WTERMSIG(status), "worker killed by signal without a report");
        }
        Some(status) if libc::WIFEXITED(status) => {
            debug!(pid, exit_code = libc::WEXITSTATUS(status), "worker exited without a report");
        }
        _ => debug!(pid, "worker vanished without a report"),
    }
    ExecutionOutcome::ResourceExhausted {
        limit_bytes: limits.max_ram_bytes,
    }
}

/// Non-blocking reap. Returns the raw wait status once the child has exited.
fn try_reap(pid: libc::pid_t) -> Option<i32> {
    let mut status = 0;
    // SAFETY: `status` is a valid out-pointer; `pid` is our own child.
    let reaped = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    (reaped == pid).then_some(status)
}

/// Blocking reap, retried on `EINTR`.
fn reap(pid: libc::pid_t) -> Option<i32> {
    loop {
        let mut status = 0;
        // SAFETY: as in `try_reap`.
        let reaped = unsafe { libc::waitpid(pid, &mut status, 0) };
        if reaped == pid {
            return Some(status);
        }
        if reaped < 0 && std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        return None;
    }
}

/// `SIGTERM`, a short grace period, then `SIGKILL`.
fn terminate(pid: libc::pid_t) {
    // SAFETY: signalling our own, not yet reaped, child.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if try_reap(pid).is_some() {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
    debug!(pid, "worker ignored SIGTERM; killing");
    // SAFETY: as above.
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    reap(pid);
}
