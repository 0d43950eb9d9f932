//! nettx core
//!
//! Data model and error types for transactional interface configuration

pub mod error;
pub mod interface;
pub mod invariant;
pub mod types;

pub use error::NetError;
pub use interface::{InterfaceConfig, InterfaceValidator};
pub use invariant::{Invariant, InvariantSet};
pub use types::*;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, NetError>;
