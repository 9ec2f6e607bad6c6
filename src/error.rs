//! Error types for the cell and its combinators.
//!
//! Error handling follows these principles:
//!
//! - The cell never synthesises failures of its own; an [`Error`] stored in
//!   a cell is whatever the producing computation yielded.
//! - Errors are clonable so a single failure can be broadcast to every
//!   reader. The payload is shared (`Arc`), not copied.
//! - Panics in user computations are isolated on the executor and converted
//!   into an [`ErrorKind::Panic`] error.

use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// The kind of failure transported through a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A user computation returned an error.
    User,
    /// A user computation panicked on the executor.
    Panic,
}

impl ErrorKind {
    /// Returns a human-readable label for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user computation failed",
            Self::Panic => "user computation panicked",
        }
    }
}

/// A clonable failure produced by a user computation.
///
/// Every reader of a failed cell receives the same error, so the underlying
/// source is reference-counted rather than owned.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind and no payload.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Creates a `User` error wrapping an underlying source.
    #[must_use]
    pub fn user(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            kind: ErrorKind::User,
            context: None,
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a `User` error from a bare message.
    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_context(msg)
    }

    /// Creates a `Panic` error from a panic message.
    #[must_use]
    pub fn panic(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panic).with_context(msg)
    }

    /// Converts a payload caught by `catch_unwind` into a `Panic` error.
    ///
    /// String payloads (the overwhelmingly common case) are preserved;
    /// anything else is reported opaquely.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let msg = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .map_or_else(|| "non-string panic payload".to_string(), Clone::clone)
            },
            |s| (*s).to_string(),
        );
        Self::panic(msg)
    }

    /// Attaches context to this error, replacing any prior context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context message, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns true if this error originated from a panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self.kind, ErrorKind::Panic)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(context) = &self.context {
            write!(f, ": {context}")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result alias for operations that transport cell errors.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying failure")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_includes_kind_and_context() {
        let err = Error::message("boom");
        assert_eq!(err.to_string(), "user computation failed: boom");
        assert_eq!(err.kind(), ErrorKind::User);
        assert!(!err.is_panic());
    }

    #[test]
    fn display_includes_source() {
        let err = Error::user(Underlying);
        assert_eq!(
            err.to_string(),
            "user computation failed: underlying failure"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn clone_shares_source() {
        let err = Error::user(Underlying);
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn from_panic_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("exploded");
        let err = Error::from_panic(payload.as_ref());
        assert!(err.is_panic());
        assert_eq!(err.context(), Some("exploded"));
    }

    #[test]
    fn from_panic_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new("exploded".to_string());
        let err = Error::from_panic(payload.as_ref());
        assert_eq!(err.context(), Some("exploded"));
    }

    #[test]
    fn from_panic_opaque_payload() {
        let payload: Box<dyn Any + Send> = Box::new(17u32);
        let err = Error::from_panic(payload.as_ref());
        assert_eq!(err.context(), Some("non-string panic payload"));
    }
}
