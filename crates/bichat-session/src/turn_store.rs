//! In-memory ordered turn list plus the transient streaming buffer.
//!
//! The store is mutated only by the session controller. Turns stay in
//! strictly increasing creation order; content deltas for the turn currently
//! being generated accumulate on its trailing `AssistantTurn`.

use bichat_core::session::{
    AssistantTurn, Attachment, ConversationTurn, TokenUsage, ToolCallRecord, UserTurn,
};
use bichat_core::{BichatError, Result};

/// Ordered list of conversation turns for one session.
#[derive(Debug, Default)]
pub struct TurnStore {
    turns: Vec<ConversationTurn>,
    /// Turn id of the optimistic user message not yet echoed by the server
    unconfirmed: Option<String>,
    /// Turn id currently receiving streamed assistant content
    streaming: Option<String>,
}

impl TurnStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole list (session bootstrap / reset).
    pub fn replace_all(&mut self, turns: Vec<ConversationTurn>) {
        self.turns = turns;
        self.unconfirmed = None;
        self.streaming = None;
    }

    /// Snapshot of the turns in order.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the store holds no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent turn.
    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Appends an optimistic user turn (not yet confirmed by the server)
    /// and returns its turn id.
    pub fn append_optimistic(
        &mut self,
        session_id: &str,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> String {
        let turn = ConversationTurn::from_user(session_id, UserTurn::new(content, attachments));
        let id = turn.id.clone();
        self.unconfirmed = Some(id.clone());
        self.turns.push(turn);
        id
    }

    /// Reconciles the optimistic user turn with its server-confirmed echo.
    ///
    /// The confirmed message replaces the optimistic one in place; no new
    /// turn is created. Echoes arriving with no optimistic turn outstanding
    /// are ignored.
    pub fn confirm_user_turn(&mut self, confirmed: UserTurn) {
        let Some(turn_id) = self.unconfirmed.take() else {
            tracing::debug!("user_message echo with no optimistic turn outstanding, ignoring");
            return;
        };
        if let Some(turn) = self.turns.iter_mut().find(|t| t.id == turn_id) {
            turn.user = confirmed;
        }
    }

    /// Appends a content delta to the streaming assistant turn, creating the
    /// assistant turn on the trailing turn if this is the first delta.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store has no turns at all.
    pub fn append_content(&mut self, delta: &str) -> Result<()> {
        let assistant = self
            .trailing_assistant_mut()
            .ok_or_else(|| BichatError::internal("content chunk with no turn to attach to"))?;
        assistant.content.push_str(delta);
        Ok(())
    }

    /// Attaches a tool-call record to the trailing turn's debug trace,
    /// creating the assistant turn if the record precedes the first content
    /// delta (the usual order when a tool runs before the answer).
    pub fn attach_tool_record(&mut self, record: ToolCallRecord) {
        if let Some(assistant) = self.trailing_assistant_mut() {
            assistant.debug.get_or_insert_default().tool_calls.push(record);
        }
    }

    /// Attaches a usage report to the trailing turn's debug trace, creating
    /// the assistant turn if the report precedes the first content delta.
    pub fn attach_usage(&mut self, usage: TokenUsage) {
        if let Some(assistant) = self.trailing_assistant_mut() {
            assistant.debug.get_or_insert_default().usage = Some(usage);
        }
    }

    /// Finalizes the streaming assistant turn, stamping its completion time.
    ///
    /// Partial content received before a cancellation or error stays in
    /// place; finalizing is idempotent when nothing is streaming.
    pub fn finalize_streaming(&mut self) {
        if let Some(turn_id) = self.streaming.take() {
            if let Some(turn) = self.turns.iter_mut().find(|t| t.id == turn_id) {
                if let Some(assistant) = turn.assistant.as_mut() {
                    assistant.timestamp = chrono::Utc::now().to_rfc3339();
                }
            }
        }
    }

    /// The id of the turn currently receiving streamed content, if any.
    pub fn streaming_turn_id(&self) -> Option<&str> {
        self.streaming.as_deref()
    }

    /// Removes and returns the assistant side of the given turn
    /// (regenerate flow keeps it around to restore on failure).
    ///
    /// # Errors
    ///
    /// Returns a NotFound error if the turn does not exist.
    pub fn clear_assistant(&mut self, turn_id: &str) -> Result<Option<AssistantTurn>> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| t.id == turn_id)
            .ok_or_else(|| BichatError::not_found("ConversationTurn", turn_id))?;
        Ok(turn.assistant.take())
    }

    /// Restores a previously cleared assistant turn (regenerate revert).
    pub fn restore_assistant(&mut self, turn_id: &str, assistant: AssistantTurn) {
        if let Some(turn) = self.turns.iter_mut().find(|t| t.id == turn_id) {
            turn.assistant = Some(assistant);
        }
    }

    /// Edit transition: replaces the user content of `turn_id`, discards its
    /// assistant turn, and removes every turn after it.
    ///
    /// Truncation is idempotent: repeating the call after a failed
    /// resubmission removes nothing further and leaves the turn count
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns a NotFound error if the turn does not exist.
    pub fn truncate_from(&mut self, turn_id: &str, new_content: &str) -> Result<()> {
        let index = self
            .turns
            .iter()
            .position(|t| t.id == turn_id)
            .ok_or_else(|| BichatError::not_found("ConversationTurn", turn_id))?;
        self.turns.truncate(index + 1);

        let turn = &mut self.turns[index];
        turn.user.content = new_content.to_string();
        turn.assistant = None;
        self.streaming = None;
        Ok(())
    }
}

impl TurnStore {
    /// The assistant side of the trailing turn, created on first access so
    /// content and telemetry land on it regardless of arrival order.
    fn trailing_assistant_mut(&mut self) -> Option<&mut AssistantTurn> {
        let turn = self.turns.last_mut()?;
        self.streaming = Some(turn.id.clone());
        Some(turn.assistant.get_or_insert_with(AssistantTurn::streaming))
    }
}
