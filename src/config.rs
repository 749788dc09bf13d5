//! Run and engine configuration.
//!
//! Both structs are built once at run start and passed by reference into
//! generation and dispatch; nothing mutates them mid-run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VfError};

/// Parameters forwarded to the ray-tracing engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Number of sampled ray directions per emitter (`rfluxmtx -c`).
    pub ray_count: u32,
    /// Indirect-reflection depth (`rfluxmtx -ab`); 0 disables indirect
    /// contributions, which is the standard setting for geometric view
    /// factors.
    pub ambient_bounces: u32,
    /// Minimum-contribution cutoff (`rfluxmtx -lw`).
    pub precision: f64,
}

impl EngineParams {
    pub fn new() -> Self {
        Self {
            ray_count: 10_000,
            ambient_bounces: 0,
            precision: 1e-5,
        }
    }
}

impl Default for EngineParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Automatic re-dispatch policy for failed jobs.
///
/// The default is a single attempt: a failing engine invocation usually
/// means a systematic misconfiguration, and silent retries would mask it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per job, including the first. Must be at least 1.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_attempts: 1 }
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Orchestration parameters for one computation run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker-pool size; each worker owns one external process at a time.
    pub workers: usize,
    /// Per-job wall-clock limit; `None` waits indefinitely.
    pub job_timeout: Option<Duration>,
    /// Receivers grouped into one engine invocation against a single
    /// emitter. Radiance starts misbehaving somewhere around 100 surfaces
    /// per receiver file.
    pub receivers_per_batch: usize,
    /// Monte-Carlo noise tolerance accepted around the physical [0, 1]
    /// range when validating engine output.
    pub epsilon: f64,
    /// Replace an already-stored pair value instead of raising a conflict.
    pub overwrite: bool,
    pub retry: RetryPolicy,
    /// Engine executable; override to point at a stub in tests.
    pub rfluxmtx_program: String,
}

impl RunConfig {
    pub fn new() -> Self {
        Self {
            workers: default_worker_count(),
            job_timeout: Some(Duration::from_secs(300)),
            receivers_per_batch: 1,
            epsilon: 0.01,
            overwrite: false,
            retry: RetryPolicy::none(),
            rfluxmtx_program: "rfluxmtx".to_string(),
        }
    }

    /// Checks the global invariants that must hold before any dispatch.
    pub fn validate(&self, params: &EngineParams) -> Result<()> {
        if self.workers == 0 {
            return Err(VfError::InvalidConfig("worker count must be > 0".into()));
        }
        if self.receivers_per_batch == 0 {
            return Err(VfError::InvalidConfig(
                "receivers_per_batch must be > 0".into(),
            ));
        }
        if !(self.epsilon >= 0.0) {
            return Err(VfError::InvalidConfig(format!(
                "epsilon must be non-negative, got {}",
                self.epsilon
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(VfError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if params.ray_count == 0 {
            return Err(VfError::InvalidConfig("ray_count must be > 0".into()));
        }
        if !(params.precision > 0.0) {
            return Err(VfError::InvalidConfig(format!(
                "precision must be positive, got {}",
                params.precision
            )));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
