//! Error handling for qubes-automation
//!
//! All library errors go through [`QubesError`]. The binary wraps them in
//! `anyhow` at the top level for context.

use thiserror::Error;

/// Main error type for qubes-automation
#[derive(Error, Debug)]
pub enum QubesError {
    /// IO errors (config file, pillar files, state templates)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (declarations that cannot be resolved)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Profile or template inheritance errors (unknown parents, cycles)
    #[error("Inheritance error: {0}")]
    Inheritance(String),

    /// An external command could not be spawned or exited non-zero
    #[error("Command failed: {0}")]
    Command(String),

    /// State template rendering or dispatch errors
    #[error("Salt error: {0}")]
    Salt(String),

    /// The host is not in a state we can work with (missing VM, root template)
    #[error("Host error: {0}")]
    Host(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for qubes-automation operations
pub type Result<T> = std::result::Result<T, QubesError>;

impl QubesError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn inheritance(msg: impl Into<String>) -> Self {
        Self::Inheritance(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    pub fn salt(msg: impl Into<String>) -> Self {
        Self::Salt(msg.into())
    }

    pub fn host(msg: impl Into<String>) -> Self {
        Self::Host(msg.into())
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QubesError::validation("AppVM bank has no label");
        assert_eq!(err.to_string(), "Validation error: AppVM bank has no label");

        let err = QubesError::host("template debian-11 does not exist");
        assert_eq!(err.to_string(), "Host error: template debian-11 does not exist");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "top.sls");
        let err: QubesError = io_err.into();
        assert!(matches!(err, QubesError::Io(_)));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(QubesError::command("qvm-ls"), QubesError::Command(_)));
        assert!(matches!(QubesError::salt("render"), QubesError::Salt(_)));
        assert!(matches!(QubesError::inheritance("cycle"), QubesError::Inheritance(_)));
    }
}
