//! Common error types for the vrrpd crates.

use std::fmt;

/// A specialized Result type for vrrpd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for vrrpd operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("Interface error: {0}")]
    Interface(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("PID file error: {0}")]
    PidFile(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a new network interface error.
    pub fn interface(msg: impl fmt::Display) -> Self {
        Error::Interface(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new PID file error.
    pub fn pidfile(msg: impl fmt::Display) -> Self {
        Error::PidFile(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing interface name");
        assert_eq!(err.to_string(), "Configuration error: missing interface name");

        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "eth9").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
