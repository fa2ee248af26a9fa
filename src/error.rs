use thiserror::Error;

use crate::timing::PlaybackStatus;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the scheduling core.
///
/// Validation and state errors are fatal to the call that produced them.
/// `NotFound` and `BufferFull` are recoverable: the cue loop logs them and
/// carries on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid {kind} event: {hint}")]
    InvalidEvent { kind: String, hint: &'static str },

    #[error("unknown event kind \"{0}\"")]
    UnknownKind(String),

    #[error("{what} does not accept negative values (got {value})")]
    Negative { what: &'static str, value: f64 },

    #[error("{what} must be finite (got {value})")]
    NonFinite { what: &'static str, value: f64 },

    #[error("automation curve \"target\" must have a duration")]
    MissingDuration,

    #[error("curve \"{curve}\" is not valid for {what}")]
    InvalidCurve { what: &'static str, curve: String },

    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: f64 },

    #[error("cannot {operation} while {status}")]
    State {
        operation: &'static str,
        status: PlaybackStatus,
    },

    #[error("event buffer is full")]
    BufferFull,

    #[error("sequence {0} not found")]
    NotFound(String),
}

/// Checks that `value` is a usable number.
pub(crate) fn finite(what: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::NonFinite { what, value })
    }
}

/// Checks that `value` is finite and not below zero.
pub(crate) fn non_negative(what: &'static str, value: f64) -> Result<f64> {
    let value = finite(what, value)?;
    if value < 0.0 {
        return Err(Error::Negative { what, value });
    }
    Ok(value)
}

/// Errors from loading or saving project and config documents.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("serialization error: {0}")]
    Serialize(#[from] ron::Error),

    #[error("invalid config: {0}")]
    Config(#[from] Error),

    #[error("no project loaded")]
    NoProject,
}
