//! Error types for the block system.

use std::fmt;
use std::sync::Arc;

/// The main error type for the block system.
///
/// Errors are cheap to clone so a single fault can be handed to every
/// downstream block that a completion propagates into.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A block was faulted with an arbitrary error
    #[error("Block faulted: {0}")]
    Fault(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The external event source reported a failure
    #[error("Watch error: {0}")]
    Watch(String),

    /// A block went away before resolving its completion
    #[error("Block was shut down before completing")]
    Shutdown,

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),

    /// Multiple errors occurred
    #[error("Multiple errors occurred: {}", join_errors(.0))]
    Multiple(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|error| format!("[{}]", error))
        .collect::<Vec<_>>()
        .join(", ")
}

// Convenience constructors
impl Error {
    /// Create a fault from any error type
    pub fn fault<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Fault(Arc::new(error))
    }

    /// Create a watch error with a message
    pub fn watch<S: Into<String>>(message: S) -> Self {
        Error::Watch(message.into())
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }
}

// Common conversions
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Custom(format!("Task failed: {}", e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// An item refused by a block that no longer accepts input.
///
/// Refusal is part of the offer protocol rather than a failure of the block,
/// so the item is handed back for the caller to retry elsewhere or drop.
pub struct Declined<T>(pub T);

impl<T> Declined<T> {
    /// Take back the refused item
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Declined<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Declined(..)")
    }
}

impl<T> fmt::Display for Declined<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Item declined: block no longer accepts input")
    }
}

impl<T> std::error::Error for Declined<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_errors_are_listed() {
        let error = Error::Multiple(vec![Error::custom("first"), Error::Shutdown]);
        assert_eq!(
            error.to_string(),
            "Multiple errors occurred: [first], [Block was shut down before completing]"
        );
    }

    #[test]
    fn io_errors_keep_their_source() {
        let error: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(std::error::Error::source(&error).is_some());
        assert_eq!(error.to_string(), "I/O error: gone");
    }

    #[test]
    fn declined_hands_the_item_back() {
        let declined = Declined(7);
        assert_eq!(declined.to_string(), "Item declined: block no longer accepts input");
        assert_eq!(declined.into_inner(), 7);
    }
}
