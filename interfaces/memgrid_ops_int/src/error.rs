use std::error::Error as StdError;
use std::fmt::{Debug, Display, Formatter};

/// Generic error kinds of the scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An operation was routed in a way its metadata forbids.
    InvalidRouting,
    /// Client specified an invalid argument.
    InvalidArgument,
    /// A queue refused the submission.
    Rejected,
    /// A packet could not be deserialized.
    Deserialization,
    /// A user handler failed.
    Operation,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRouting => "invalid routing",
            ErrorKind::InvalidArgument => "invalid argument specified",
            ErrorKind::Rejected => "submission rejected",
            ErrorKind::Deserialization => "deserialization failed",
            ErrorKind::Operation => "operation failed",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type of the scheduler entry points.
///
/// Pairs an [`ErrorKind`] with a message and an optional source:
///
/// ```
/// use memgrid_ops_int::{Error, ErrorKind};
///
/// let error = Error::new(ErrorKind::Rejected, "work queue is full");
/// assert_eq!(error.kind(), ErrorKind::Rejected);
/// ```
pub struct Error {
    kind: ErrorKind,
    message: Box<str>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Creates a new error from a kind and a message.
    pub fn new(kind: ErrorKind, message: impl Into<Box<str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new error wrapping an underlying one.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<Box<str>>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message attached at construction.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}
