//! Tagged error taxonomy shared by fetchkit crates.
//!
//! Failures are classified by [`Kind`] and carried as a [`struct@Error`] value:
//! a kind, a human-readable message, and an optional wrapped cause. The cause
//! chain is preserved through [`std::error::Error::source`], so callers can
//! both branch on the kind and dig out a concrete source type:
//!
//! ```
//! use fetchkit_errors::{Error, Kind};
//!
//! let cause = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
//! let err = Error::wrap(cause, Kind::Unavailable, "upstream connection failed");
//!
//! assert!(err.is(Kind::Unavailable));
//! assert!(err.find_source::<std::io::Error>().is_some());
//! ```

use std::error::Error as StdError;
use std::fmt;

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Kind {
    /// The caller supplied something unusable (bad URL, missing rewind thunk,
    /// disallowed media type, oversized body).
    InvalidInput,
    /// The upstream reported the resource does not exist.
    NotFound,
    /// The upstream refused access.
    Forbidden,
    /// Transient upstream or network trouble; usually worth retrying.
    Unavailable,
    /// A non-transient execution failure (TLS identity, closed fetcher).
    ExecutionFailed,
    /// The caller canceled the operation.
    Canceled,
    /// The caller's deadline expired.
    DeadlineExceeded,
    /// Anything that could not be classified.
    Unknown,
}

impl Kind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::InvalidInput => "invalid_input",
            Kind::NotFound => "not_found",
            Kind::Forbidden => "forbidden",
            Kind::Unavailable => "unavailable",
            Kind::ExecutionFailed => "execution_failed",
            Kind::Canceled => "canceled",
            Kind::DeadlineExceeded => "deadline_exceeded",
            Kind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure with an optional wrapped cause.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    message: String,
    source: Option<BoxedCause>,
}

impl Error {
    /// Create a new error with no cause.
    #[must_use]
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a cause, reclassifying it under `kind`.
    #[must_use]
    pub fn wrap(cause: impl Into<BoxedCause>, kind: Kind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Classifier: does this error carry the given kind?
    #[must_use]
    pub fn is(&self, kind: Kind) -> bool {
        self.kind == kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Walk the cause chain looking for a concrete error type.
    #[must_use]
    pub fn find_source<T: StdError + 'static>(&self) -> Option<&T> {
        let mut current: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<T>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|s| s as _)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
