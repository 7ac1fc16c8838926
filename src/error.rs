/*!
 * Error types for Tunegate
 */

use std::io;
use thiserror::Error;
use tunegate_core_resilience::ResilienceError;

pub type Result<T> = std::result::Result<T, TunegateError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum TunegateError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("Invalid configuration file: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Configuration could not be rendered
    #[error("Failed to serialize configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// A resilience primitive refused or failed
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// No settings exist for the named upstream
    #[error("Unknown upstream: {0}")]
    UnknownUpstream(String),
}

impl TunegateError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TunegateError::Config(_)
            | TunegateError::TomlDe(_)
            | TunegateError::TomlSer(_)
            | TunegateError::UnknownUpstream(_) => EXIT_FATAL,
            TunegateError::Resilience(_) | TunegateError::Io(_) => EXIT_PARTIAL,
        }
    }

    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        self.exit_code() == EXIT_FATAL
    }

    /// Suggested retry delay when an open circuit refused the call
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            TunegateError::Resilience(e) => e.retry_after(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_code_constants() {
        assert_eq!(EXIT_SUCCESS, 0);
        assert_eq!(EXIT_PARTIAL, 1);
        assert_eq!(EXIT_FATAL, 2);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            TunegateError::Config("bad".to_string()).exit_code(),
            EXIT_FATAL
        );
        assert_eq!(
            TunegateError::UnknownUpstream("nope".to_string()).exit_code(),
            EXIT_FATAL
        );
        assert_eq!(
            TunegateError::Io(io::Error::other("disk")).exit_code(),
            EXIT_PARTIAL
        );

        let open = TunegateError::from(ResilienceError::CircuitOpen {
            name: "groq".to_string(),
            retry_after: Duration::from_secs(5),
        });
        assert_eq!(open.exit_code(), EXIT_PARTIAL);
        assert!(!open.is_fatal());
    }

    #[test]
    fn test_retry_after_passthrough() {
        let open = TunegateError::from(ResilienceError::CircuitOpen {
            name: "groq".to_string(),
            retry_after: Duration::from_secs(5),
        });
        assert_eq!(open.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(
            TunegateError::Config("x".to_string()).retry_after(),
            None
        );
    }

    #[test]
    fn test_error_display() {
        let err = TunegateError::UnknownUpstream("spotify".to_string());
        assert_eq!(err.to_string(), "Unknown upstream: spotify");

        let err = TunegateError::from(ResilienceError::Persistence("locked".to_string()));
        assert_eq!(err.to_string(), "Persistence error: locked");
    }
}
