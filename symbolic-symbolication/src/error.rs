use std::error::Error;
use std::fmt;

use thiserror::Error;

/// A malformed symbolication request.
///
/// The message describes the problem and is safe to return to the client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub(crate) fn new<S: Into<String>>(message: S) -> Self {
        ValidationError {
            message: message.into(),
        }
    }

    pub(crate) fn json(error: serde_json::Error) -> Self {
        Self::new(format!("malformed request: {error}"))
    }
}

/// The error type for [`SymbolicationError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolicationErrorKind {
    /// The request was rejected before any symbols were loaded.
    InvalidRequest,

    /// No symbol source could be reached for any module of the request.
    BackendUnavailable,
}

impl fmt::Display for SymbolicationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "invalid symbolication request"),
            Self::BackendUnavailable => write!(f, "symbol storage unavailable"),
        }
    }
}

/// An error that fails a whole symbolication request.
///
/// Missing or broken symbols for individual modules never cause this error. Their frames are
/// rendered as unknown instead.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct SymbolicationError {
    kind: SymbolicationErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl SymbolicationError {
    /// Returns the corresponding [`SymbolicationErrorKind`] for this error.
    pub fn kind(&self) -> SymbolicationErrorKind {
        self.kind
    }
}

impl From<SymbolicationErrorKind> for SymbolicationError {
    fn from(kind: SymbolicationErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<ValidationError> for SymbolicationError {
    fn from(error: ValidationError) -> Self {
        Self {
            kind: SymbolicationErrorKind::InvalidRequest,
            source: Some(Box::new(error)),
        }
    }
}
