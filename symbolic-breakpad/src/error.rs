use std::error::Error;
use std::fmt;

use thiserror::Error;

/// The error type for [`ParseError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The file is empty or contains only whitespace.
    Empty,

    /// The symbol header (`MODULE` record) is missing or malformed.
    InvalidMagic,

    /// The symbol header is not encoded in valid UTF-8.
    BadEncoding,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty symbol file"),
            Self::InvalidMagic => write!(f, "missing breakpad symbol header"),
            Self::BadEncoding => write!(f, "bad utf-8 sequence in symbol header"),
        }
    }
}

/// An error returned when a symbol file cannot be turned into a
/// [`SymbolTable`](crate::SymbolTable).
///
/// Malformed records within an otherwise valid file do not cause this error. They are skipped and
/// counted in [`SymbolTable::skipped_lines`](crate::SymbolTable::skipped_lines).
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ParseError {
    kind: ParseErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ParseError {
    /// Creates a new parse error from a known kind of error as well as an arbitrary error
    /// payload.
    pub(crate) fn new<E>(kind: ParseErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`ParseErrorKind`] for this error.
    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }
}

impl From<ParseErrorKind> for ParseError {
    fn from(kind: ParseErrorKind) -> Self {
        Self { kind, source: None }
    }
}
