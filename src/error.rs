// src/error.rs
//
// Recoverable engine failures. None of these abort the process; hosts are
// expected to substitute a fallback (usually silence).

use thiserror::Error;

/// Error raised by engine operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Materialization on a sound that did not terminate within the bound.
    #[error("sound did not terminate within {bound} samples")]
    UnboundedStream { bound: i64 },

    /// No routine is bound for this combination of input classes.
    #[error("no routine for interpolation code {code} with {arity} inputs")]
    UnsupportedInterpolationCombination { arity: usize, code: u32 },

    /// Inverse lookup reached the end of the sound.
    #[error("value {value} not reached before the sound terminated")]
    NotFound { value: f64 },

    /// Forward-only cursor asked for an already consumed sample.
    #[error("cursor is at sample {current}, cannot read sample {requested} without a copy")]
    InvalidBackwardAccess { current: i64, requested: i64 },

    /// Start-time adjustment on a cursor that has already been read.
    #[error("sound has already been read")]
    CursorAlreadyRead,

    /// Inputs of a sequential operator disagree on their sample rate.
    #[error("sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch { expected: f64, actual: f64 },

    /// Registry has no factory under this name.
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),

    /// Operator factory rejected its arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result of an engine operation.
pub type EngineResult<T> = Result<T, EngineError>;
