//! Error types for cancellation causes.
//!
//! Errors here are explicit and typed (no stringly-typed errors). Exactly two
//! recoverable terminal causes exist, and both are surfaced to callers rather
//! than retried internally:
//!
//! - [`ErrorKind::Cancelled`]: the cancel trigger was invoked
//! - [`ErrorKind::DeadlineExceeded`]: the deadline timer fired first
//!
//! Construction-time misuse (for instance a cancelled context that reports
//! no cause) is a programming defect and panics; it is not modelled as a
//! returned error. Everything else (already cancelled, ancestor not found,
//! parent lacks the cancellation capability) is a silent no-op, not an error.
//!
//! # Recovery Classification
//!
//! Causes are classified by [`Recoverability`] so callers that branch on
//! retryability can do so without matching kinds directly: deadline expiry is
//! transient (the operation may succeed given more time), explicit
//! cancellation is permanent.

use core::fmt;

/// The kind of terminal cancellation cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The cancel trigger was invoked.
    Cancelled,
    /// The deadline passed before the work completed.
    DeadlineExceeded,
}

impl ErrorKind {
    /// Returns the recoverability classification for this cause.
    #[must_use]
    pub const fn recoverability(self) -> Recoverability {
        match self {
            Self::Cancelled => Recoverability::Permanent,
            Self::DeadlineExceeded => Recoverability::Transient,
        }
    }

    /// Returns true if this cause is typically retryable.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context cancelled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// Classification of a cause's recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry (deadline expiry).
    Transient,
    /// Permanent failure that will not succeed on retry (explicit cancel).
    Permanent,
}

impl Recoverability {
    /// Returns true if this cause is safe to retry.
    #[must_use]
    pub const fn should_retry(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if this cause should never be retried.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// A terminal cancellation cause recorded on a context node.
///
/// An `Error` is set at most once per node, at the moment of cancellation,
/// and is read-only thereafter. The optional message is static so that causes
/// stay cheap to clone through an arbitrarily deep cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    message: Option<&'static str>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates an explicit-cancellation cause.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates a deadline-expiry cause.
    #[must_use]
    pub const fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded)
    }

    /// Attaches a static message to the cause.
    #[must_use]
    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    /// Returns the cause kind.
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        self.kind
    }

    /// Returns the attached message, if any.
    #[must_use]
    pub const fn message(self) -> Option<&'static str> {
        self.message
    }

    /// Returns true if this cause is an explicit cancellation.
    #[must_use]
    pub const fn is_cancelled(self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this cause is a deadline/timeout condition.
    #[must_use]
    pub const fn is_timeout(self) -> bool {
        matches!(self.kind, ErrorKind::DeadlineExceeded)
    }

    /// Returns true if this cause is temporary and the operation may be
    /// retried with a fresh context.
    #[must_use]
    pub const fn is_temporary(self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(self) -> Recoverability {
        self.kind.recoverability()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(message) = self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for context operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_message() {
        assert_eq!(Error::cancelled().to_string(), "context cancelled");
        assert_eq!(
            Error::deadline_exceeded().to_string(),
            "context deadline exceeded"
        );
    }

    #[test]
    fn display_with_message() {
        let err = Error::cancelled().with_message("shutting down");
        assert_eq!(err.to_string(), "context cancelled: shutting down");
    }

    #[test]
    fn predicates_match_kind() {
        let cancel = Error::cancelled();
        assert!(cancel.is_cancelled());
        assert!(!cancel.is_timeout());
        assert!(!cancel.is_temporary());

        let timeout = Error::deadline_exceeded();
        assert!(!timeout.is_cancelled());
        assert!(timeout.is_timeout());
        assert!(timeout.is_temporary());
    }

    #[test]
    fn recoverability_classification() {
        assert!(ErrorKind::DeadlineExceeded.recoverability().should_retry());
        assert!(ErrorKind::Cancelled.recoverability().is_permanent());
        assert!(ErrorKind::DeadlineExceeded.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }
}
