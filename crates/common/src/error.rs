//! Common error types for the TFACC client
//!
//! This module defines all error types used across the TFACC crates.
//! Errors raised while constructing a client are fatal: no partially
//! initialized client is ever handed out.

use std::num::TryFromIntError;
use thiserror::Error;

/// Main error type for the TFACC client
#[derive(Error, Debug)]
pub enum TfaccError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Accelerator device could not be opened
    #[error("Device error: {0}")]
    Device(String),

    /// Memory mapping errors
    #[error("Memory mapping error: {0}")]
    MemoryMap(String),

    /// Malformed server-info response
    #[error("Malformed server info: {0}")]
    ServerInfo(String),

    /// Tensor descriptor errors
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A partition did not clear its flag in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TryFromIntError> for TfaccError {
    fn from(err: TryFromIntError) -> Self {
        TfaccError::InvalidInput(format!("value does not fit the wire format: {}", err))
    }
}

impl TfaccError {
    /// Whether this error aborts client construction
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TfaccError::Device(_) | TfaccError::MemoryMap(_) | TfaccError::ServerInfo(_)
        )
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        TfaccError::Config(msg.into())
    }

    /// Create a device error
    pub fn device(msg: impl Into<String>) -> Self {
        TfaccError::Device(msg.into())
    }

    /// Create a memory mapping error
    pub fn memory_map(msg: impl Into<String>) -> Self {
        TfaccError::MemoryMap(msg.into())
    }

    /// Create a server-info error
    pub fn server_info(msg: impl Into<String>) -> Self {
        TfaccError::ServerInfo(msg.into())
    }

    /// Create a tensor error
    pub fn tensor(msg: impl Into<String>) -> Self {
        TfaccError::Tensor(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        TfaccError::InvalidInput(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        TfaccError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        TfaccError::Internal(msg.into())
    }
}

/// Result type alias for TFACC operations
pub type Result<T> = std::result::Result<T, TfaccError>;
