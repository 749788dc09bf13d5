//! Error types for the view-factor pipeline.
//!
//! Errors local to a single pair (serialization, dispatch, parse) are
//! captured in the run report and never abort sibling pairs. Errors global
//! to a run (registry misuse, invalid configuration) abort before any
//! dispatch occurs.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VfError>;

#[derive(Error, Debug)]
pub enum VfError {
    #[error("surface id {0:?} is already registered")]
    DuplicateId(String),

    #[error("surface id {0:?} is not registered")]
    UnknownSurface(String),

    #[error("surface {id:?} cannot be serialized to a Radiance scene: {reason}")]
    GeometrySerialization { id: String, reason: String },

    #[error("engine dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("engine output could not be parsed: {0}")]
    Parse(#[from] ParseError),

    #[error(
        "conflicting view factor for pair ({a}, {b}): stored {stored}, new {new} \
         (use overwrite mode to replace)"
    )]
    Conflict {
        a: String,
        b: String,
        stored: f64,
        new: f64,
    },

    #[error("view factor for pair ({a}, {b}) has not been computed")]
    NotComputed { a: String, b: String },

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of one external engine invocation. Attached to the affected
/// pair(s); sibling jobs keep running.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to spawn engine process {program:?}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("engine process exceeded the job timeout after {elapsed:.1?}")]
    Timeout { elapsed: Duration },

    #[error("engine process exited with status {exit_code:?}: {stderr_tail}")]
    EngineFailure {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("job was cancelled before completion")]
    Cancelled,
}

/// Malformed or physically implausible engine output.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed engine output: {0}")]
    Malformed(String),

    #[error("view factor {value} at position {index} outside [-epsilon, 1+epsilon] (epsilon = {epsilon})")]
    OutOfRange {
        value: f64,
        index: usize,
        epsilon: f64,
    },
}
