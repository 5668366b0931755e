//! Error types for key agreement operations

use thiserror::Error;

/// Errors that can occur while decoding or validating key material
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyAgreementError {
    /// Text is not a bare hexadecimal integer
    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    /// Peer public value is outside `[1, P - 1]`
    #[error("Public value out of range")]
    PublicValueOutOfRange,
}

/// Result type alias for key agreement operations
pub type Result<T> = std::result::Result<T, KeyAgreementError>;
