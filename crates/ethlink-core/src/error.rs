//! Error types for the link manager
//!
//! This module defines all error types used throughout the crate.
//!
//! Note that the administrative surface of the tracker (enable, disable,
//! teardown, reconnect) deliberately reports plain `bool` success. The
//! [`Error`] type is used for construction, configuration, settings I/O and
//! address acquisition.

use thiserror::Error;

/// Result type alias for link manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the link manager
#[derive(Error, Debug)]
pub enum Error {
    /// Driver control errors
    #[error("Driver error: {0}")]
    Driver(String),

    /// Address acquisition errors (DHCP or static configuration)
    #[error("Addressing error: {0}")]
    Addressing(String),

    /// Settings source errors
    #[error("Settings error: {0}")]
    Settings(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The tracker's inbound queue is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a driver error
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    /// Create an addressing error
    pub fn addressing(msg: impl Into<String>) -> Self {
        Self::Addressing(msg.into())
    }

    /// Create a settings error
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a channel closed error
    pub fn channel_closed(msg: impl Into<String>) -> Self {
        Self::ChannelClosed(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::driver("DRIVER START rejected");
        assert_eq!(err.to_string(), "Driver error: DRIVER START rejected");

        let err = Error::addressing("no offer received");
        assert_eq!(err.to_string(), "Addressing error: no offer received");
    }

    #[test]
    fn test_from_anyhow() {
        let err: Error = anyhow::anyhow!("lease timed out").into();
        assert!(matches!(err, Error::Other(ref m) if m == "lease timed out"));
    }
}
