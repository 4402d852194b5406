//! Session domain module.
//!
//! This module contains all session-related domain models, the streaming wire
//! unit, and the external data-source contracts.
//!
//! # Module Structure
//!
//! - `model`: Core session domain model (`Session`, `SessionStatus`)
//! - `turn`: Conversation turn types (`ConversationTurn`, `UserTurn`, `AssistantTurn`)
//! - `attachment`: File/image attachment model (`Attachment`)
//! - `question`: Human-in-the-loop question types (`PendingQuestion`, `Question`)
//! - `telemetry`: Debug/usage telemetry (`TokenUsage`, `DebugTrace`)
//! - `stream`: Streaming wire unit (`StreamChunk`)
//! - `data_source`: External collaborator contracts (`ChatDataSource`, `ArtifactSource`)

mod attachment;
mod data_source;
mod model;
mod question;
mod stream;
mod telemetry;
mod turn;

// Re-export public API
pub use attachment::{Attachment, PreviewSource};
pub use data_source::{
    ArtifactBatch, ArtifactPage, ArtifactSource, ChatDataSource, Clipboard, SendMessageRequest,
    SessionSnapshot, StreamHandle, UploadFile,
};
pub use model::{Artifact, Session, SessionStatus};
pub use question::{
    PendingQuestion, Question, QuestionAnswer, QuestionOption, QuestionStatus,
};
pub use stream::StreamChunk;
pub use telemetry::{DebugTrace, SessionDebugUsage, TokenUsage, ToolCallRecord};
pub use turn::{AssistantTurn, Citation, CodeOutput, ConversationTurn, UserTurn};
