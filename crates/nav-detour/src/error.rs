//! Error type for file and configuration boundaries
//!
//! Navigation operations report [`Status`]; this error wraps a status
//! together with the I/O and JSON failures that occur when meshes or
//! settings are loaded from disk.

use crate::Status;

/// Error types for loading and saving navigation data
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("navigation operation failed: {0}")]
    Status(#[from] Status),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serialization")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
