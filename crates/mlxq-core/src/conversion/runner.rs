//! Supervision of the external conversion process.
//!
//! One job at a time. The running job's number lives in a single slot
//! (0 = idle) behind a mutex. `start` claims it, and the supervisor task
//! publishes the terminal state and frees the slot under the same lock. So a
//! caller that has observed the end of a job can start the next one
//! immediately, and no second job runs while the first still reads `Running`.
//!
//! On unix the child's stdout and stderr share one pipe, so lines arrive in
//! the order the process wrote them. Elsewhere the two pipes are read
//! concurrently and cross-stream order is arrival order.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::types::{JobOutcome, JobState};
use crate::cancel::CancellationToken;
use crate::config::RunnerConfig;
use crate::error::{MlxqError, Result};
use crate::platform;

/// Runtime tunables for the runner.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Time between SIGTERM and a forced kill on cancel.
    pub grace_period: Duration,
    /// Lines of output kept for the failure diagnostic.
    pub tail_lines: usize,
    /// Capacity of the live output channel.
    pub channel_capacity: usize,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            grace_period: RunnerConfig::CANCEL_GRACE_PERIOD,
            tail_lines: RunnerConfig::TAIL_LINES,
            channel_capacity: RunnerConfig::CHANNEL_CAPACITY,
        }
    }
}

/// Launches and supervises at most one conversion process.
#[derive(Debug)]
pub struct ConversionRunner {
    active: Arc<Mutex<u64>>,
    id_counter: AtomicU64,
    options: RunnerOptions,
}

impl Default for ConversionRunner {
    fn default() -> Self {
        Self::new(RunnerOptions::default())
    }
}

impl ConversionRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self {
            active: Arc::new(Mutex::new(0)),
            id_counter: AtomicU64::new(0),
            options,
        }
    }

    /// Whether a job currently holds the slot.
    pub fn is_running(&self) -> bool {
        *lock_slot(&self.active) != 0
    }

    /// Id of the job holding the slot, if any.
    pub fn active_id(&self) -> Option<String> {
        match *lock_slot(&self.active) {
            0 => None,
            number => Some(conversion_id(number)),
        }
    }

    /// Start `argv` with an inherited environment.
    pub fn start(&self, argv: &[String]) -> Result<ConversionHandle> {
        self.start_with_env(argv, &[])
    }

    /// Start `argv` with extra environment variables.
    ///
    /// Must be called from within a Tokio runtime. Returns as soon as the
    /// process is spawned; output and the final state arrive through the
    /// returned handle.
    pub fn start_with_env(
        &self,
        argv: &[String],
        env: &[(String, String)],
    ) -> Result<ConversionHandle> {
        self.start_with_cleanup(argv, env, || {})
    }

    /// Like `start_with_env`, running `on_finish` after the process is done
    /// and before the terminal state is published. Not run if spawning fails.
    pub(crate) fn start_with_cleanup<F>(
        &self,
        argv: &[String],
        env: &[(String, String)],
        on_finish: F,
    ) -> Result<ConversionHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let number = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut active = lock_slot(&self.active);
            if *active != 0 {
                return Err(MlxqError::ConcurrentJob {
                    running_id: conversion_id(*active),
                });
            }
            *active = number;
        }
        let slot = SlotGuard {
            active: self.active.clone(),
            number,
        };
        let id = conversion_id(number);

        let Some((program, args)) = argv.split_first() else {
            return Err(MlxqError::ProcessSpawn {
                program: String::new(),
                message: "empty command".to_string(),
                source: None,
            });
        };

        let (status_tx, status_rx) = watch::channel(JobOutcome {
            state: JobState::Pending,
            exit_code: None,
            diagnostic: None,
            tail: Vec::new(),
        });

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        let merged = {
            let (reader, out, err) =
                platform::merged_output_pipe().map_err(|e| spawn_error(program, e))?;
            command.stdout(out).stderr(err);
            reader
        };
        #[cfg(not(unix))]
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let spawned = command.spawn();
        // The command holds our copies of the pipe's write ends.
        drop(command);
        let child = spawned.map_err(|e| spawn_error(program, e))?;

        #[cfg(unix)]
        let (stdout, stderr) = (
            Some(
                tokio::net::unix::pipe::Receiver::from_owned_fd(merged.into())
                    .map_err(|e| spawn_error(program, e))?,
            ),
            None::<tokio::process::ChildStderr>,
        );
        #[cfg(not(unix))]
        let mut child = child;
        #[cfg(not(unix))]
        let (stdout, stderr) = (child.stdout.take(), child.stderr.take());

        info!(
            "Starting conversion {} (pid {:?}): {}",
            id,
            child.id(),
            program
        );

        let (lines_tx, lines_rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let lines_taken = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        status_tx.send_modify(|s| s.state = JobState::Running);

        let supervisor = Supervisor {
            id: id.clone(),
            child,
            cancel: cancel.clone(),
            output: OutputCollector::new(lines_tx, lines_taken.clone(), self.options.tail_lines),
            grace_period: self.options.grace_period,
        };
        tokio::spawn(async move {
            let outcome = supervisor.run(stdout, stderr).await;
            on_finish();
            slot.publish(&status_tx, outcome);
        });

        Ok(ConversionHandle {
            control: JobControl {
                id,
                cancel,
                status: status_rx,
            },
            lines: Some(lines_rx),
            lines_taken,
            output_path: None,
        })
    }
}

fn conversion_id(number: u64) -> String {
    format!("conv-{number}")
}

fn spawn_error(program: &str, e: std::io::Error) -> MlxqError {
    MlxqError::ProcessSpawn {
        program: program.to_string(),
        message: e.to_string(),
        source: Some(e),
    }
}

fn lock_slot(active: &Mutex<u64>) -> MutexGuard<'_, u64> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the runner slot for one job. Frees it when dropped, even if the
/// supervisor panics.
struct SlotGuard {
    active: Arc<Mutex<u64>>,
    number: u64,
}

impl SlotGuard {
    /// Publish the terminal state and free the slot as one step.
    fn publish(self, status: &watch::Sender<JobOutcome>, outcome: JobOutcome) {
        {
            let mut active = lock_slot(&self.active);
            status.send_replace(outcome);
            if *active == self.number {
                *active = 0;
            }
        }
        // Drop finds the slot already free.
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut active = lock_slot(&self.active);
        if *active == self.number {
            *active = 0;
        }
    }
}

/// Cloneable view of a job: state, cancellation and completion.
#[derive(Debug, Clone)]
pub struct JobControl {
    id: String,
    cancel: CancellationToken,
    status: watch::Receiver<JobOutcome>,
}

impl JobControl {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> JobState {
        self.status.borrow().state
    }

    /// The terminal outcome, once reached.
    pub fn outcome(&self) -> Option<JobOutcome> {
        let status = self.status.borrow();
        status.state.is_terminal().then(|| status.clone())
    }

    /// Request cancellation.
    ///
    /// Returns `false` if the job has already settled its outcome or cancel
    /// was already requested. Once accepted, the job ends `Cancelled`
    /// whatever the process exit code turns out to be.
    pub fn cancel(&self) -> bool {
        let accepted = self.cancel.cancel();
        if accepted {
            info!("Cancelling conversion {}", self.id);
        }
        accepted
    }

    /// Wait for the terminal outcome.
    pub async fn wait(&self) -> JobOutcome {
        let mut status = self.status.clone();
        let outcome = match status.wait_for(|s| s.state.is_terminal()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => JobOutcome {
                state: JobState::Failed,
                exit_code: None,
                diagnostic: Some("conversion supervisor stopped unexpectedly".to_string()),
                tail: Vec::new(),
            },
        };
        outcome
    }
}

/// Handle to a started conversion.
#[derive(Debug)]
pub struct ConversionHandle {
    control: JobControl,
    lines: Option<mpsc::Receiver<String>>,
    lines_taken: Arc<AtomicBool>,
    output_path: Option<PathBuf>,
}

impl ConversionHandle {
    pub fn id(&self) -> &str {
        self.control.id()
    }

    pub fn state(&self) -> JobState {
        self.control.state()
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub async fn wait(&self) -> JobOutcome {
        self.control.wait().await
    }

    /// Directory the tool writes to, when started through the facade.
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub(crate) fn with_output_path(mut self, path: PathBuf) -> Self {
        self.output_path = Some(path);
        self
    }

    /// A cloneable control for other tasks (e.g. a Ctrl-C handler).
    pub fn control(&self) -> JobControl {
        self.control.clone()
    }

    /// Take the live output receiver. Lines arrive oldest first; the channel
    /// closes when the process is done. Returns `None` on the second call.
    ///
    /// Until the receiver is taken, output is buffered only up to the channel
    /// capacity and later lines go to the tail alone, so a caller that only
    /// waits never stalls the process. Once taken, a slow reader applies
    /// back-pressure instead.
    pub fn take_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        let lines = self.lines.take();
        if lines.is_some() {
            self.lines_taken.store(true, Ordering::SeqCst);
        }
        lines
    }
}

// ---------------------------------------------------------------------------
// Supervisor task
// ---------------------------------------------------------------------------

struct Supervisor {
    id: String,
    child: Child,
    cancel: CancellationToken,
    output: OutputCollector,
    grace_period: Duration,
}

impl Supervisor {
    async fn run<O, E>(mut self, stdout: Option<O>, stderr: Option<E>) -> JobOutcome
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let mut out = stdout.map(LineReader::new);
        let mut err = stderr.map(LineReader::new);
        let mut cancelled = false;

        // Forward output until every stream closes or cancel fires.
        while out.is_some() || err.is_some() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                line = next_line(&mut out), if out.is_some() => match line {
                    Some(line) => {
                        if !self.output.push(line, &self.cancel).await {
                            cancelled = true;
                            break;
                        }
                    }
                    None => out = None,
                },
                line = next_line(&mut err), if err.is_some() => match line {
                    Some(line) => {
                        if !self.output.push(line, &self.cancel).await {
                            cancelled = true;
                            break;
                        }
                    }
                    None => err = None,
                },
            }
        }

        let mut status = None;
        if !cancelled {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => cancelled = true,
                waited = self.child.wait() => match waited {
                    Ok(s) => status = Some(s),
                    Err(e) => warn!("Error waiting for conversion {}: {}", self.id, e),
                },
            }
        }

        if cancelled {
            status = self.terminate().await;
        }

        // Settles a racing cancel: accepted before this point it wins,
        // after it `cancel()` returns false.
        let cancelled = !self.cancel.close();
        self.output.close();
        let outcome = finish(status, cancelled, self.output.tail());
        info!("Conversion {} finished: {}", self.id, outcome.state);
        outcome
    }

    /// SIGTERM, wait for the grace period, then kill.
    async fn terminate(&mut self) -> Option<ExitStatus> {
        if let Some(pid) = self.child.id() {
            match platform::request_termination(pid) {
                Ok(true) => {
                    if let Ok(Ok(status)) =
                        tokio::time::timeout(self.grace_period, self.child.wait()).await
                    {
                        debug!("Conversion {} stopped after SIGTERM", self.id);
                        return Some(status);
                    }
                    warn!(
                        "Conversion {} ignored termination for {:?}, killing",
                        self.id, self.grace_period
                    );
                }
                Ok(false) => {}
                Err(e) => warn!("Graceful stop of conversion {} failed: {}", self.id, e),
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill conversion {}: {}", self.id, e);
        }
        self.child.try_wait().ok().flatten()
    }
}

async fn next_line<R: AsyncRead + Unpin>(reader: &mut Option<LineReader<R>>) -> Option<String> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => None,
    }
}

fn finish(status: Option<ExitStatus>, cancelled: bool, tail: Vec<String>) -> JobOutcome {
    let exit_code = status.and_then(|s| s.code());

    if cancelled {
        return JobOutcome {
            state: JobState::Cancelled,
            exit_code,
            diagnostic: None,
            tail,
        };
    }

    match status {
        Some(s) if s.success() => JobOutcome {
            state: JobState::Succeeded,
            exit_code,
            diagnostic: None,
            tail,
        },
        _ => {
            let summary = match (status, exit_code) {
                (_, Some(code)) => format!("Conversion process exited with code {code}"),
                (Some(s), None) => format!("Conversion process terminated: {s}"),
                (None, None) => "Conversion process ended without an exit status".to_string(),
            };
            let diagnostic = if tail.is_empty() {
                summary
            } else {
                format!("{summary}\n{}", tail.join("\n"))
            };
            JobOutcome {
                state: JobState::Failed,
                exit_code,
                diagnostic: Some(diagnostic),
                tail,
            }
        }
    }
}

/// Line splitter that tolerates invalid UTF-8 and is safe to use in `select!`.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at EOF.
    ///
    /// Partial reads stay in `buf` when the future is dropped, so no bytes
    /// are lost if another `select!` branch wins.
    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf)
                    .trim_end_matches(&['\n', '\r'][..])
                    .to_string();
                self.buf.clear();
                Some(line)
            }
            Err(e) => {
                warn!("Error reading conversion output: {}", e);
                None
            }
        }
    }
}

/// Pushes lines to the live channel and keeps the tail for diagnostics.
struct OutputCollector {
    tx: Option<mpsc::Sender<String>>,
    consumer: Arc<AtomicBool>,
    tail: VecDeque<String>,
    tail_capacity: usize,
}

impl OutputCollector {
    fn new(tx: mpsc::Sender<String>, consumer: Arc<AtomicBool>, tail_capacity: usize) -> Self {
        Self {
            tx: Some(tx),
            consumer,
            tail: VecDeque::with_capacity(tail_capacity),
            tail_capacity,
        }
    }

    /// Record and forward one line. Returns `false` if cancellation fired
    /// while waiting for channel capacity.
    async fn push(&mut self, line: String, cancel: &CancellationToken) -> bool {
        if self.tail_capacity > 0 {
            if self.tail.len() == self.tail_capacity {
                self.tail.pop_front();
            }
            self.tail.push_back(line.clone());
        }

        let Some(tx) = &self.tx else {
            return true;
        };
        if !self.consumer.load(Ordering::SeqCst) {
            // Nobody reads yet: buffer what fits and never block the process.
            if let Err(TrySendError::Closed(_)) = tx.try_send(line) {
                self.tx = None;
            }
            return true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = tx.send(line) => {
                if sent.is_err() {
                    // Receiver dropped: keep supervising, stop forwarding.
                    self.tx = None;
                }
                true
            }
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }

    fn tail(&self) -> Vec<String> {
        self.tail.iter().cloned().collect()
    }
}
