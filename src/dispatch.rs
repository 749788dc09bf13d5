//! Bounded-concurrency execution of external engine processes.
//!
//! A fixed pool of worker threads pulls jobs from a shared channel; each
//! worker owns at most one child process at a time and keeps its results in
//! a worker-local buffer, so the queue is the only shared mutable state.
//! Every submitted job yields exactly one outcome, failures included — one
//! job timing out or crashing never blocks or cancels its siblings.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::DispatchError;
use crate::surface::SurfaceId;

/// How often a worker polls its child for exit, timeout and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bytes of stderr kept when reporting an engine failure.
const STDERR_TAIL_BYTES: usize = 512;

/// One unit of external work: a single engine invocation computing the
/// factors from one emitter towards an ordered batch of receivers.
#[derive(Debug, Clone)]
pub struct ComputationJob {
    pub emitter: SurfaceId,
    /// Receiver order matches the order of values in the engine output.
    pub receivers: Vec<SurfaceId>,
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

/// Raw engine stdout for one job.
pub type RawOutput = String;

pub type JobOutcome = (ComputationJob, std::result::Result<RawOutput, DispatchError>);

/// Cooperative cancellation signal shared between the orchestrator and the
/// worker pool. Cancelling stops new jobs from being dequeued and kills
/// in-flight child processes; completed results are retained.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct JobDispatcher {
    workers: usize,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl JobDispatcher {
    pub fn new(workers: usize, timeout: Option<Duration>) -> Self {
        Self {
            workers: workers.max(1),
            timeout,
            retry: RetryPolicy::none(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs all jobs on the worker pool and blocks until each has resolved
    /// to success, failure, timeout or cancellation. The returned outcomes
    /// are in submission order regardless of completion order.
    pub fn dispatch(&self, jobs: Vec<ComputationJob>) -> Vec<JobOutcome> {
        let n = jobs.len();
        if n == 0 {
            return Vec::new();
        }
        let workers = self.workers.min(n);
        debug!("dispatching {n} jobs on {workers} workers");

        let (tx, rx) = crossbeam_channel::unbounded();
        for entry in jobs.into_iter().enumerate() {
            // The receiver is alive until the scope below ends.
            tx.send(entry).expect("job queue receiver disconnected");
        }
        drop(tx);

        let mut resolved: Vec<(usize, ComputationJob, Result<RawOutput, DispatchError>)> =
            Vec::with_capacity(n);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let rx = rx.clone();
                    scope.spawn(move || {
                        let mut local = Vec::new();
                        while let Ok((idx, job)) = rx.recv() {
                            let outcome = if self.cancel.is_cancelled() {
                                Err(DispatchError::Cancelled)
                            } else {
                                self.run_with_retry(&job)
                            };
                            local.push((idx, job, outcome));
                        }
                        local
                    })
                })
                .collect();

            for handle in handles {
                resolved.extend(handle.join().expect("dispatch worker panicked"));
            }
        });

        resolved.sort_by_key(|(idx, _, _)| *idx);
        resolved
            .into_iter()
            .map(|(_, job, outcome)| (job, outcome))
            .collect()
    }

    fn run_with_retry(
        &self,
        job: &ComputationJob,
    ) -> std::result::Result<RawOutput, DispatchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.run_once(job);
            match &outcome {
                Ok(_) => return outcome,
                // Cancellation and a missing binary are not transient.
                Err(DispatchError::Cancelled) | Err(DispatchError::Spawn { .. }) => return outcome,
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(
                        "job for emitter {} failed on attempt {attempt}/{}: {err}; retrying",
                        job.emitter, self.retry.max_attempts
                    );
                }
                Err(_) => return outcome,
            }
        }
    }

    fn run_once(&self, job: &ComputationJob) -> std::result::Result<RawOutput, DispatchError> {
        let started = Instant::now();
        let mut child = Command::new(&job.program)
            .args(&job.args)
            .current_dir(&job.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                program: job.program.clone(),
                source,
            })?;

        // Poll instead of a blocking wait so the per-job timeout and the
        // global cancel signal stay responsive.
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    kill_and_reap(&mut child);
                    return Err(DispatchError::EngineFailure {
                        exit_code: None,
                        stderr_tail: format!("failed to poll engine process: {source}"),
                    });
                }
            }
            if self.cancel.is_cancelled() {
                kill_and_reap(&mut child);
                return Err(DispatchError::Cancelled);
            }
            if let Some(limit) = self.timeout
                && started.elapsed() >= limit
            {
                kill_and_reap(&mut child);
                return Err(DispatchError::Timeout {
                    elapsed: started.elapsed(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        // The engine emits a handful of numbers per receiver, so the pipes
        // are safely drained after exit.
        let stdout = read_pipe(child.stdout.take());
        let stderr = read_pipe(child.stderr.take());

        if !status.success() {
            return Err(DispatchError::EngineFailure {
                exit_code: status.code(),
                stderr_tail: tail(&stderr, STDERR_TAIL_BYTES),
            });
        }
        debug!(
            "job for emitter {} finished in {:.1?}",
            job.emitter,
            started.elapsed()
        );
        Ok(stdout)
    }
}

fn kill_and_reap(child: &mut std::process::Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn read_pipe(pipe: Option<impl Read>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

fn tail(text: &str, max_bytes: usize) -> String {
    let trimmed = text.trim_end();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let start = trimmed.len() - max_bytes;
    // Back off to a char boundary.
    let start = (start..trimmed.len())
        .find(|&i| trimmed.is_char_boundary(i))
        .unwrap_or(trimmed.len());
    trimmed[start..].to_string()
}
