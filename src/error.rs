//! Error types for UdsVault

use thiserror::Error;
use std::io;

/// Result type alias for UdsVault operations
pub type Result<T> = std::result::Result<T, UdsVaultError>;

/// Custom error types for UdsVault
#[derive(Error, Debug)]
pub enum UdsVaultError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol parse error: {0}")]
    Protocol(String),

    #[error("Invalid format")]
    InvalidFormat,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Store full: capacity of {capacity} entries reached")]
    StoreFull { capacity: usize },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),
}
