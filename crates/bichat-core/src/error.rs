//! Error types for the bichat session core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the bichat session core.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait. The variants map onto the
/// three recovery paths the controller distinguishes: transport failures
/// (retry affordance), local validation failures (input-level error state),
/// and application failures (dismissible panel error, prior state intact).
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum BichatError {
    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound { entity_type: String, id: String },

    /// Local validation error (empty submission, invalid answer, illegal transition)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limit exceeded; surfaced as an input-level throttling error
    #[error("Too many messages, slow down")]
    Throttled,

    /// Stream/network failure; partial content is preserved by the caller
    #[error("Transport error: {0}")]
    Transport(String),

    /// Data source rejected an operation (non-stream request/response call)
    #[error("Data source error: {0}")]
    DataSource(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "JSON", etc.
        message: String,
    },

    /// Capability not available on the configured data source
    #[error("Capability not supported: {0}")]
    Unsupported(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BichatError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a NotFound error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a DataSource error
    pub fn data_source(message: impl Into<String>) -> Self {
        Self::DataSource(message.into())
    }

    /// Creates an Unsupported error for a missing capability
    pub fn unsupported(capability: impl Into<String>) -> Self {
        Self::Unsupported(capability.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error should surface as input-level error state
    /// (rejected locally, before any network call).
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Throttled)
    }

    /// Check if this is a transport error
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this is a data source error
    pub fn is_data_source(&self) -> bool {
        matches!(self, Self::DataSource(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for BichatError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(format!("{} (kind: {:?})", err, err.kind()))
    }
}

impl From<serde_json::Error> for BichatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for BichatError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, BichatError>`.
pub type Result<T> = std::result::Result<T, BichatError>;
