//! External data-source contracts.
//!
//! The transport to the backend is abstracted behind `ChatDataSource`,
//! supplied by the host application. Optional capabilities (artifacts,
//! clipboard) are separate traits resolved once at controller construction,
//! never probed per call.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::session::attachment::Attachment;
use crate::session::model::{Artifact, Session};
use crate::session::question::{PendingQuestion, QuestionAnswer};
use crate::session::stream::StreamChunk;
use crate::session::turn::ConversationTurn;

/// The ordered chunk stream returned by [`ChatDataSource::send_message`].
///
/// The data source must yield chunks in generation order; the controller
/// applies them in arrival order, exactly once.
pub type StreamHandle = BoxStream<'static, StreamChunk>;

/// Everything needed to (re)issue a message-generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Target session
    pub session_id: String,
    /// Message text
    pub content: String,
    /// Attached files
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Whether to include debug telemetry in the stream
    #[serde(default)]
    pub debug_mode: bool,
    /// When set, the backend discards this turn's assistant message and all
    /// later turns before generating (regenerate/edit flows).
    pub replace_from_turn_id: Option<String>,
}

/// A session loaded from the data source on bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// The session record
    pub session: Session,
    /// All persisted turns, in creation order
    pub turns: Vec<ConversationTurn>,
    /// An unresolved question interrupt, if the session has one
    pub pending_question: Option<PendingQuestion>,
}

/// Pagination parameters for artifact listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPage {
    pub limit: usize,
    pub offset: usize,
}

/// One page of session artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBatch {
    pub artifacts: Vec<Artifact>,
    pub has_more: bool,
    pub next_offset: Option<usize>,
}

/// A file to upload as a session artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadFile {
    pub filename: String,
    pub mime_type: String,
    /// Payload, base64-encoded
    pub base64_data: String,
}

/// An abstract backend for session CRUD, streaming message generation, and
/// question-answer submission.
///
/// Implementations are supplied by the host application; the session core
/// never opens network connections itself.
///
/// # Implementation Notes
///
/// Implementations should handle:
/// - Honoring the cancellation token by closing the stream promptly
/// - Yielding chunks strictly in generation order
/// - Terminating every stream with either `Error` or `Done`
#[async_trait]
pub trait ChatDataSource: Send + Sync {
    /// Creates a new session.
    ///
    /// # Returns
    ///
    /// The freshly created session record.
    async fn create_session(&self) -> Result<Session>;

    /// Fetches a session with its turns and any unresolved question.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The ID of the session to fetch
    ///
    /// # Returns
    ///
    /// - `Ok(Some(snapshot))`: Session found
    /// - `Ok(None)`: Session not found
    /// - `Err(_)`: Error occurred during retrieval
    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>>;

    /// Opens a message-generation stream.
    ///
    /// # Arguments
    ///
    /// * `request` - The message to send and how to send it
    /// * `cancel` - Cancellation signal; the stream must close promptly once
    ///   cancelled
    ///
    /// # Returns
    ///
    /// The ordered chunk stream for this generation.
    async fn send_message(
        &self,
        request: SendMessageRequest,
        cancel: CancellationToken,
    ) -> Result<StreamHandle>;

    /// Submits answers for a pending question, resuming generation.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session owning the question
    /// * `question_id` - The pending question being answered
    /// * `answers` - One answer per question in the set
    async fn submit_question_answers(
        &self,
        session_id: &str,
        question_id: &str,
        answers: &[QuestionAnswer],
    ) -> Result<()>;

    /// Cancels a pending question; generation continues without answers.
    ///
    /// # Arguments
    ///
    /// * `question_id` - The pending question to cancel
    async fn cancel_pending_question(&self, question_id: &str) -> Result<()>;

    /// Renames a session.
    ///
    /// # Returns
    ///
    /// The updated session record for the controller's cache.
    async fn rename_session(&self, session_id: &str, title: &str) -> Result<Session>;

    /// Pins or unpins a session.
    ///
    /// # Returns
    ///
    /// The updated session record for the controller's cache.
    async fn set_pinned(&self, session_id: &str, pinned: bool) -> Result<Session>;

    /// Archives or unarchives a session.
    ///
    /// # Returns
    ///
    /// The updated session record for the controller's cache.
    async fn set_archived(&self, session_id: &str, archived: bool) -> Result<Session>;
}

/// Optional artifact listing/upload capability.
///
/// Hosts that support session artifacts pass an implementation at controller
/// construction; hosts that don't simply pass `None` and the artifact
/// operations report `Unsupported`.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetches one page of session artifacts.
    async fn fetch_artifacts(&self, session_id: &str, page: ArtifactPage) -> Result<ArtifactBatch>;

    /// Uploads files as session artifacts.
    ///
    /// # Returns
    ///
    /// The created artifact records.
    async fn upload_artifacts(
        &self,
        session_id: &str,
        files: Vec<UploadFile>,
    ) -> Result<Vec<Artifact>>;
}

/// Optional clipboard capability for the copy affordance.
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Places text on the host clipboard.
    async fn set_text(&self, text: &str) -> Result<()>;
}
