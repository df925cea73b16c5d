//! Unified error handling for the ratecast crate
//!
//! Each subsystem has its own error enum ([`StoreError`], [`RenderError`],
//! [`ChannelError`]); this module folds them into one [`Error`] and classifies
//! them with [`ErrorCategory`] so callers can pick a handling strategy:
//!
//! - `Connectivity` - retried by the connection manager, then fatal for a producer run
//! - `Resolution` - logged, the run ends with no matches
//! - `Render` - the queue item is dropped without retry
//! - `Delivery` - isolated to the failing channel
//!
//! ```rust,ignore
//! use ratecast::error::{Error, ErrorCategory};
//!
//! fn exit_code(err: &Error) -> i32 {
//!     if err.category() == ErrorCategory::Connectivity { 1 } else { 0 }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::delivery::ChannelError;
pub use crate::processor::render::RenderError;
pub use crate::storage::StoreError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The document store cannot be reached
    Connectivity,
    /// A store query or document failed
    Storage,
    /// Subscriptions could not be resolved or enriched
    Resolution,
    /// The render service failed
    Render,
    /// A delivery channel failed
    Delivery,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::Storage => "storage",
            Self::Resolution => "resolution",
            Self::Render => "render",
            Self::Delivery => "delivery",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the ratecast crate
#[derive(Error, Debug)]
pub enum Error {
    /// Document store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Render service errors
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Delivery channel errors
    #[error("Delivery error: {0}")]
    Delivery(#[from] ChannelError),

    /// Subscription resolution errors
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a resolution error
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) if e.is_connectivity() => ErrorCategory::Connectivity,
            Self::Store(_) => ErrorCategory::Storage,
            Self::Render(_) => ErrorCategory::Render,
            Self::Delivery(_) => ErrorCategory::Delivery,
            Self::Resolution(_) | Self::Json(_) => ErrorCategory::Resolution,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Delivery(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Render(_)
            | Self::Resolution(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Other { .. } => false,
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_category() {
        let err = Error::from(StoreError::CannotConnect {
            attempts: 5,
            reason: "refused".to_string(),
        });
        assert_eq!(err.category(), ErrorCategory::Connectivity);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_query_error_is_storage() {
        let err = Error::from(StoreError::Query {
            collection: "app.processing-q".to_string(),
            reason: "timeout".to_string(),
        });
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_render_error_not_recoverable() {
        let err = Error::from(RenderError::EmptyResult);
        assert_eq!(err.category(), ErrorCategory::Render);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing bot token");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Config error: missing bot token");
    }

    #[test]
    fn test_resolution_error() {
        let err = Error::resolution("pl subscriptions-users at 12:00: bad cursor");
        assert_eq!(err.category(), ErrorCategory::Resolution);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(ErrorCategory::Other.as_str(), "other");
    }
}
