//! Error types for interface configuration operations

use thiserror::Error;

/// Main error type for configuration operations
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("System error: {0}")]
    System(#[from] SystemError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors in staged or stored configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid interface name: {name}")]
    InvalidInterfaceName { name: String },

    #[error("Duplicate interface: {name}")]
    DuplicateInterface { name: String },

    #[error("Unknown interface: {name}")]
    UnknownInterface { name: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Interface {name} validation failed: {reason}")]
    Interface { name: String, reason: String },

    #[error("Address conflict: {message}")]
    AddressConflict { message: String },

    #[error("Invariant {invariant} violated: {reason}")]
    InvariantViolated { invariant: String, reason: String },

    #[error("State validation failed: {message}")]
    State { message: String },
}

/// System operation errors
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Command execution failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Command timed out: {command}")]
    Timeout { command: String },

    #[error("Interface operation failed on {interface}: {operation}")]
    InterfaceOperation {
        interface: String,
        operation: String,
    },

    #[error("Partial rollback: reverted {reverted:?}, stranded {stranded:?}")]
    PartialRollback {
        reverted: Vec<String>,
        stranded: Vec<String>,
    },

    #[error("Snapshot operation failed: {path}")]
    Snapshot { path: String },
}
