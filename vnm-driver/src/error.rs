//! Error types for the network driver.

use thiserror::Error;

/// Errors that can occur while resolving NICs or running a driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The VM description is not well-formed XML.
    #[error("Failed to parse VM description: {0}")]
    Parse(String),

    /// The VM description is not valid base64.
    #[error("Failed to decode VM description: {0}")]
    Decode(String),

    /// A host-state probe failed or returned an unexpected format.
    #[error("Host probe failed: {0}")]
    Probe(String),

    /// An external command could not be run or exited with an error.
    #[error("Command failed: {0}")]
    Command(String),

    /// The driver lock could not be opened or acquired.
    #[error("Failed to acquire driver lock: {0}")]
    LockFailed(String),

    /// The settings file could not be read or parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<quick_xml::Error> for DriverError {
    fn from(err: quick_xml::Error) -> Self {
        DriverError::Parse(err.to_string())
    }
}

impl From<base64::DecodeError> for DriverError {
    fn from(err: base64::DecodeError) -> Self {
        DriverError::Decode(err.to_string())
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
