//! Custom error types for rustcapes.
//!
//! Every fallible operation returns `Result<T, CapesError>`. Each variant
//! carries a human-readable message and an optional wrapped cause, and
//! [`CapesError::kind`] exposes the category so callers can branch on it
//! (the binary maps it to a process exit code).

use thiserror::Error;

/// Boxed inner cause carried by [`CapesError`] variants.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for rustcapes operations.
#[derive(Debug, Error)]
pub enum CapesError {
    /// Missing or invalid inputs
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// Failure reading interactive input
    #[error("Input error: {message}")]
    Input {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// Open/navigate/wait failures in a browser session
    #[error("Navigation error: {message}")]
    Navigation {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// A selector that was assumed present could not be read
    #[error("Extraction error: {message}")]
    Extraction {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// I/O failure while persisting results
    #[error("Export error: {message}")]
    Export {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// The run was cancelled before completion
    #[error("Run cancelled")]
    Cancelled,

    /// The run exceeded its overall time limit
    #[error("Run timed out after {limit:?}")]
    Timeout { limit: std::time::Duration },
}

/// Error category, used for caller-side branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Input,
    Navigation,
    Extraction,
    Export,
    Cancelled,
    Timeout,
}

/// Result type alias using `CapesError`
pub type Result<T> = std::result::Result<T, CapesError>;

impl CapesError {
    /// Configuration error without an inner cause
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Input error wrapping a cause
    pub fn input(message: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::Input {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Navigation error without an inner cause
    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation {
            message: message.into(),
            source: None,
        }
    }

    /// Navigation error wrapping a cause
    pub fn navigation_with(message: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::Navigation {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Extraction error wrapping a cause
    pub fn extraction_with(message: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::Extraction {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Export error without an inner cause
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export {
            message: message.into(),
            source: None,
        }
    }

    /// Export error wrapping a cause
    pub fn export_with(message: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::Export {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Input { .. } => ErrorKind::Input,
            Self::Navigation { .. } => ErrorKind::Navigation,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::Export { .. } => ErrorKind::Export,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Returns true if this error belongs to `kind`
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }
}

impl From<std::io::Error> for CapesError {
    fn from(err: std::io::Error) -> Self {
        Self::export_with("I/O failure", err)
    }
}

impl From<csv::Error> for CapesError {
    fn from(err: csv::Error) -> Self {
        Self::export_with("CSV write failure", err)
    }
}

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with an extraction error message
    fn ok_or_extraction(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_extraction(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| CapesError::Extraction {
            message: msg.to_string(),
            source: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_kind_discriminant() {
        assert_eq!(CapesError::config("x").kind(), ErrorKind::Configuration);
        assert_eq!(CapesError::navigation("x").kind(), ErrorKind::Navigation);
        assert_eq!(CapesError::export("x").kind(), ErrorKind::Export);
        assert!(CapesError::Cancelled.is(ErrorKind::Cancelled));
        let timeout = CapesError::Timeout {
            limit: std::time::Duration::from_secs(600),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(timeout.to_string(), "Run timed out after 600s");
    }

    #[test]
    fn test_io_error_maps_to_export() {
        let err: CapesError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert_eq!(err.kind(), ErrorKind::Export);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_display_includes_message() {
        let err = CapesError::navigation_with("failed to open page 3", "timeout");
        assert_eq!(err.to_string(), "Navigation error: failed to open page 3");
        assert_eq!(err.source().map(|s| s.to_string()), Some("timeout".to_string()));
    }

    #[test]
    fn test_option_ext() {
        let missing: Option<u32> = None;
        let err = missing.ok_or_extraction("no anchors").expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Extraction);
    }
}
