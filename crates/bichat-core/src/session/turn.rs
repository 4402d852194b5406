//! Conversation turn types.
//!
//! A turn pairs one user message with its (optional) assistant response.
//! Turns are kept in strictly increasing creation order; the `UserTurn` is
//! immutable once persisted (edits are a state transition handled by the
//! controller) and the `AssistantTurn` is the only part mutated while a
//! response is streaming.

use serde::{Deserialize, Serialize};

use super::attachment::Attachment;
use super::telemetry::DebugTrace;
use crate::session::model::Artifact;

/// One user message paired with its (optional) assistant response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Unique turn identifier (UUID format)
    pub id: String,
    /// Parent session identifier
    pub session_id: String,
    /// The user side of the turn
    pub user: UserTurn,
    /// The assistant side; absent until the first content delta arrives
    pub assistant: Option<AssistantTurn>,
    /// Timestamp when the turn was created (ISO 8601 format)
    pub created_at: String,
}

/// The user-authored half of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTurn {
    /// Unique message identifier
    pub id: String,
    /// Text content
    pub content: String,
    /// Attached files, if any
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Timestamp when the message was submitted (ISO 8601 format)
    pub timestamp: String,
}

/// The assistant-generated half of a turn.
///
/// `content` grows incrementally while the response streams; the remaining
/// payload fields arrive with the final message or via tool events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AssistantTurn {
    /// Unique message identifier
    pub id: String,
    /// Response text (grows during streaming)
    pub content: String,
    /// Optional natural-language explanation of a generated query/chart
    pub explanation: Option<String>,
    /// Source citations referenced by the response
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Chart payload for chart cards, opaque to the controller
    pub chart: Option<serde_json::Value>,
    /// Artifacts produced while generating this response
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Code-interpreter outputs produced while generating this response
    #[serde(default)]
    pub code_outputs: Vec<CodeOutput>,
    /// Timestamp when generation finished (ISO 8601 format)
    pub timestamp: String,
    /// Debug trace (tool calls, usage) when debug mode was on
    pub debug: Option<DebugTrace>,
}

/// A source citation attached to an assistant response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Display title of the cited source
    pub title: String,
    /// Link to the source, if resolvable
    pub url: Option<String>,
    /// Quoted snippet, if provided
    pub snippet: Option<String>,
}

/// Output of a single code-interpreter execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeOutput {
    /// Language of the executed snippet
    pub language: String,
    /// The executed code
    pub code: String,
    /// Captured stdout/result, if any
    pub output: Option<String>,
}

impl ConversationTurn {
    /// Creates a turn from a user message, with no assistant response yet.
    pub fn from_user(session_id: impl Into<String>, user: UserTurn) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            user,
            assistant: None,
        }
    }
}

impl UserTurn {
    /// Creates a user message with a fresh id and the current timestamp.
    pub fn new(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            attachments,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl AssistantTurn {
    /// Creates an empty assistant message ready to receive streamed content.
    pub fn streaming() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }
}
