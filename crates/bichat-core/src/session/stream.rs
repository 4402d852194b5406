//! Streaming wire unit.
//!
//! `StreamChunk` is the unit the data source emits while a response is being
//! generated. Chunks must be applied in arrival order, exactly once, up to
//! the point of cancellation; the transport is trusted to deliver them in
//! generation order (there are no sequence numbers in the payload).

use serde::{Deserialize, Serialize};

use super::question::PendingQuestion;
use super::telemetry::{TokenUsage, ToolCallRecord};
use super::turn::UserTurn;

/// One event in a message-generation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Content delta appended to the trailing assistant turn.
    Content { content: String },
    /// Server-confirmed echo of the optimistic user message.
    UserMessage { turn: UserTurn },
    /// Mid-stream HITL interrupt; generation pauses until answered.
    Question { question: PendingQuestion },
    /// Out-of-band token usage report.
    Usage { usage: TokenUsage },
    /// Completed tool invocation (debug telemetry).
    Tool { record: ToolCallRecord },
    /// Terminal failure; content received so far is preserved.
    Error { message: String },
    /// Generation finished; the assistant turn is final.
    Done,
}

impl StreamChunk {
    /// Whether this chunk terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_use_internally_tagged_encoding() {
        let chunk = StreamChunk::Content {
            content: "Revenue grew".to_string(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["content"], "Revenue grew");

        let done: StreamChunk = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(done, StreamChunk::Done);
        assert!(done.is_terminal());
    }
}
