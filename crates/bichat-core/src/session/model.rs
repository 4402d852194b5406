//! Session domain model.
//!
//! This module contains the core `Session` entity. The controller holds a
//! read-only cached copy owned by the backend; it is refreshed on fetch and
//! after rename/pin/archive side effects.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// The session accepts new messages.
    Active,
    /// The session is archived and hidden from the default listing.
    Archived,
}

/// Represents a chat session in the domain layer.
///
/// This is the "pure" domain model the controller caches; persistence is
/// owned entirely by the host's data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (UUID format)
    pub id: String,
    /// Human-readable session title
    pub title: String,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Whether the session is pinned to the top of the sidebar
    #[serde(default)]
    pub pinned: bool,
    /// Timestamp when the session was created (ISO 8601 format)
    pub created_at: String,
    /// Timestamp when the session was last updated (ISO 8601 format)
    pub updated_at: String,
}

impl Session {
    /// Creates a fresh active session with the given id and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.into(),
            title: title.into(),
            status: SessionStatus::Active,
            pinned: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Whether the session still accepts new messages.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// A named downloadable or previewable output associated with a session
/// (chart export, generated file, code-interpreter output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact identifier
    pub id: String,
    /// Display name (usually the filename)
    pub name: String,
    /// MIME type of the artifact payload
    pub mime_type: String,
    /// Payload size in bytes
    pub size: u64,
    /// Download/preview URL
    pub url: String,
    /// Timestamp when the artifact was created (ISO 8601 format)
    pub created_at: String,
}
