//! Snapshot view-model exposed to the presentation layer.

use bichat_core::session::{
    Artifact, ConversationTurn, PendingQuestion, Session, SessionDebugUsage,
};
use serde::Serialize;

use crate::controller::ChatStatus;

/// State of the artifact side panel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactPanel {
    /// Artifacts fetched so far, in listing order
    pub artifacts: Vec<Artifact>,
    /// Whether another page can be loaded
    pub has_more: bool,
    /// Offset to request the next page with
    pub next_offset: Option<usize>,
    /// Dismissible error adjacent to the panel, if the last fetch failed
    pub error: Option<String>,
}

/// Unified render-ready snapshot of the controller state.
///
/// Cloned out under the state lock so the presentation layer never observes
/// a half-applied chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChatView {
    /// Cached session record, absent until bootstrap or first send
    pub session: Option<Session>,
    /// Current controller status
    pub status: ChatStatus,
    /// All turns in creation order, streaming buffer applied
    pub turns: Vec<ConversationTurn>,
    /// Number of messages waiting in the outbound queue
    pub queued_count: usize,
    /// The active question interrupt, if any
    pub pending_question: Option<PendingQuestion>,
    /// Accumulated session-scope telemetry
    pub usage: SessionDebugUsage,
    /// Whether debug telemetry is requested on sends
    pub debug_mode: bool,
    /// Input-level error (validation/throttle), sticky until the next
    /// accepted submission
    pub input_error: Option<String>,
    /// Terminal stream error backing the retry affordance
    pub stream_error: Option<String>,
    /// Artifact side-panel state
    pub artifact_panel: ArtifactPanel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_for_the_presentation_layer() {
        let view = ChatView {
            session: Some(Session::new("s-1", "Revenue analysis")),
            status: ChatStatus::Streaming,
            turns: Vec::new(),
            queued_count: 2,
            pending_question: None,
            usage: SessionDebugUsage::default(),
            debug_mode: false,
            input_error: None,
            stream_error: None,
            artifact_panel: ArtifactPanel::default(),
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "streaming");
        assert_eq!(json["queued_count"], 2);
        assert_eq!(json["session"]["title"], "Revenue analysis");
        assert!(json["pending_question"].is_null());
    }
}
