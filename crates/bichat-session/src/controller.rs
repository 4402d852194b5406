//! Conversation session controller.
//!
//! `SessionController` orchestrates session bootstrap, message submission,
//! stream consumption, regenerate/edit/retry flows, the outbound queue, and
//! the pending-question slot, and exposes a unified view-model to the
//! presentation layer.
//!
//! The central invariant it enforces: at most one network stream is open per
//! session at any time. A `send_message` while a stream is in flight becomes
//! an outbound-queue entry, never a second stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use bichat_core::session::{
    ArtifactPage, ArtifactSource, Attachment, ChatDataSource, Clipboard, QuestionAnswer,
    SendMessageRequest, Session, SessionDebugUsage, StreamChunk, UploadFile,
};
use bichat_core::{BichatError, Result};

use crate::outbound_queue::{OutboundQueue, QueuedMessage};
use crate::pending_question::PendingQuestionTracker;
use crate::rate_limiter::RateLimiter;
use crate::turn_store::TurnStore;
use crate::view::{ArtifactPanel, ChatView};

const DEFAULT_ARTIFACT_PAGE_SIZE: usize = 20;

/// Controller status, per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    /// No send in flight.
    Idle,
    /// A send was accepted; the stream is being opened.
    Sending,
    /// Chunks are being applied.
    Streaming,
    /// Generation is paused on a pending question.
    AwaitingQuestion,
    /// The stream failed; partial content is retained and retry is available.
    Error,
}

/// What happened to a `send_message` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message opened a stream (and the stream has since finished).
    Dispatched,
    /// A send was already in flight; the message joined the outbound queue.
    Queued,
}

/// How a consumed stream ended.
enum StreamEnd {
    Done,
    Failed(String),
    /// The stream closed without a terminal chunk.
    Closed,
}

/// Cross-cutting session state, guarded by one lock so the presentation
/// layer never observes a half-applied chunk.
struct Inner {
    session: Option<Session>,
    status: ChatStatus,
    turns: TurnStore,
    queue: OutboundQueue,
    question: PendingQuestionTracker,
    usage: SessionDebugUsage,
    limiter: RateLimiter,
    debug_mode: bool,
    input_error: Option<String>,
    stream_error: Option<String>,
    artifact_panel: ArtifactPanel,
    cancel: Option<CancellationToken>,
    last_request: Option<SendMessageRequest>,
}

impl Inner {
    fn session_id(&self) -> Result<String> {
        self.session
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or_else(|| BichatError::validation("no session loaded"))
    }
}

/// Builder for [`SessionController`].
///
/// Capabilities are resolved here, once, at construction time. Hosts without
/// artifact or clipboard support simply never set them.
pub struct SessionControllerBuilder {
    data_source: Arc<dyn ChatDataSource>,
    artifact_source: Option<Arc<dyn ArtifactSource>>,
    clipboard: Option<Arc<dyn Clipboard>>,
    rate_limiter: RateLimiter,
    artifact_page_size: usize,
}

impl SessionControllerBuilder {
    /// Starts a builder over the host-supplied data source.
    pub fn new(data_source: Arc<dyn ChatDataSource>) -> Self {
        Self {
            data_source,
            artifact_source: None,
            clipboard: None,
            rate_limiter: RateLimiter::default(),
            artifact_page_size: DEFAULT_ARTIFACT_PAGE_SIZE,
        }
    }

    /// Enables the artifact panel capability.
    pub fn with_artifact_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.artifact_source = Some(source);
        self
    }

    /// Enables the clipboard capability.
    pub fn with_clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    /// Overrides the default send rate limiter.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = limiter;
        self
    }

    /// Overrides the artifact page size used for fetches.
    pub fn with_artifact_page_size(mut self, size: usize) -> Self {
        self.artifact_page_size = size;
        self
    }

    /// Builds the controller. One instance per active session.
    pub fn build(self) -> SessionController {
        SessionController {
            data_source: self.data_source,
            artifact_source: self.artifact_source,
            clipboard: self.clipboard,
            artifact_page_size: self.artifact_page_size,
            generation: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                session: None,
                status: ChatStatus::Idle,
                turns: TurnStore::new(),
                queue: OutboundQueue::new(),
                question: PendingQuestionTracker::new(),
                usage: SessionDebugUsage::default(),
                limiter: self.rate_limiter,
                debug_mode: false,
                input_error: None,
                stream_error: None,
                artifact_panel: ArtifactPanel::default(),
                cancel: None,
                last_request: None,
            }),
        }
    }
}

/// Orchestrates one chat session end to end.
///
/// Explicitly constructed and owned by the caller — one instance per active
/// session, never a singleton. All cross-cutting state (turns, queue,
/// pending question) lives in fields behind a single lock.
pub struct SessionController {
    data_source: Arc<dyn ChatDataSource>,
    artifact_source: Option<Arc<dyn ArtifactSource>>,
    clipboard: Option<Arc<dyn Clipboard>>,
    artifact_page_size: usize,
    inner: Mutex<Inner>,
    /// Monotonically increasing request sequence. A stream whose captured
    /// generation no longer matches is abandoned: its chunks are discarded
    /// so a stale stream cannot resurrect state.
    generation: AtomicU64,
}

impl SessionController {
    /// Shorthand for `SessionControllerBuilder::new(data_source).build()`.
    pub fn new(data_source: Arc<dyn ChatDataSource>) -> Self {
        SessionControllerBuilder::new(data_source).build()
    }

    // ============================================================================
    // Bootstrap & session side effects
    // ============================================================================

    /// Loads an existing session: its record, turns, and any unresolved
    /// question interrupt.
    ///
    /// A "new" session needs no bootstrap; it is created lazily on the first
    /// send.
    ///
    /// # Errors
    ///
    /// Returns a NotFound error if the data source has no such session.
    pub async fn bootstrap(&self, session_id: &str) -> Result<()> {
        let snapshot = self
            .data_source
            .fetch_session(session_id)
            .await?
            .ok_or_else(|| BichatError::not_found("Session", session_id))?;

        let mut inner = self.inner.lock().await;
        // Abandon any in-flight stream before installing the loaded state,
        // so its remaining chunks cannot mutate the new turn list.
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        inner.turns.replace_all(snapshot.turns);
        inner.queue.clear();
        inner.question.clear();
        if let Some(question) = snapshot.pending_question {
            if question.is_pending() {
                inner.question.activate(question)?;
            }
        }
        inner.session = Some(snapshot.session);
        inner.status = ChatStatus::Idle;
        inner.stream_error = None;
        inner.input_error = None;
        tracing::debug!(session_id, turns = inner.turns.len(), "session bootstrapped");
        Ok(())
    }

    /// Renames the session and refreshes the cached record.
    pub async fn rename(&self, title: &str) -> Result<()> {
        let session_id = self.inner.lock().await.session_id()?;
        let updated = self.data_source.rename_session(&session_id, title).await?;
        self.inner.lock().await.session = Some(updated);
        Ok(())
    }

    /// Pins or unpins the session and refreshes the cached record.
    pub async fn set_pinned(&self, pinned: bool) -> Result<()> {
        let session_id = self.inner.lock().await.session_id()?;
        let updated = self.data_source.set_pinned(&session_id, pinned).await?;
        self.inner.lock().await.session = Some(updated);
        Ok(())
    }

    /// Archives or unarchives the session and refreshes the cached record.
    pub async fn set_archived(&self, archived: bool) -> Result<()> {
        let session_id = self.inner.lock().await.session_id()?;
        let updated = self.data_source.set_archived(&session_id, archived).await?;
        self.inner.lock().await.session = Some(updated);
        Ok(())
    }

    // ============================================================================
    // Sending
    // ============================================================================

    /// UI-adjacent submission wrapper: applies the rate limiter and records
    /// input-level error state before delegating to [`Self::send_message`].
    ///
    /// # Errors
    ///
    /// Returns `Throttled` when the rate limit is exhausted and a validation
    /// error for an empty submission; both are also surfaced via
    /// [`ChatView::input_error`].
    pub async fn submit_input(
        &self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome> {
        let content = content.into();
        {
            let mut inner = self.inner.lock().await;
            if !inner.limiter.try_acquire() {
                let err = BichatError::Throttled;
                inner.input_error = Some(err.to_string());
                return Err(err);
            }
            if content.trim().is_empty() && attachments.is_empty() {
                let err =
                    BichatError::validation("message needs text or at least one attachment");
                inner.input_error = Some(err.to_string());
                return Err(err);
            }
            inner.input_error = None;
        }
        self.send_message(content, attachments).await
    }

    /// Sends a message, or queues it when a send is already in flight.
    ///
    /// On dispatch this appends an optimistic user turn, opens the stream,
    /// and consumes it to completion (including auto-flushing queued
    /// messages after each completed generation). Callers that need to
    /// observe intermediate state spawn this future and read
    /// [`Self::view`] snapshots.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome> {
        let content = content.into();
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(BichatError::validation(
                "message needs text or at least one attachment",
            ));
        }

        // Fast path: session already loaded. The lazy create below releases
        // the lock for the data-source call and re-checks on return.
        {
            let mut inner = self.inner.lock().await;
            if Self::enqueue_if_busy(&mut inner, &content, &attachments) {
                return Ok(SendOutcome::Queued);
            }
            if inner.session.is_some() {
                let (request, generation, token) =
                    self.prepare_send(&mut inner, content, attachments)?;
                drop(inner);
                self.run_stream(request, generation, token).await?;
                return Ok(SendOutcome::Dispatched);
            }
        }

        let session = self.data_source.create_session().await?;
        let (request, generation, token) = {
            let mut inner = self.inner.lock().await;
            if Self::enqueue_if_busy(&mut inner, &content, &attachments) {
                return Ok(SendOutcome::Queued);
            }
            if inner.session.is_none() {
                tracing::debug!(session_id = session.id, "session created lazily on first send");
                inner.session = Some(session);
            }
            self.prepare_send(&mut inner, content, attachments)?
        };

        self.run_stream(request, generation, token).await?;
        Ok(SendOutcome::Dispatched)
    }

    /// Re-generates the response of the last assistant turn.
    ///
    /// The prior assistant content is stashed and the request is re-issued
    /// from the turn's original user message; on failure the stashed content
    /// is restored.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless `turn_id` is the last turn, it has
    /// an assistant response, and the controller is idle.
    pub async fn regenerate(&self, turn_id: &str) -> Result<()> {
        let (request, generation, token, stashed) = {
            let mut inner = self.inner.lock().await;
            if inner.status != ChatStatus::Idle {
                return Err(BichatError::validation(
                    "cannot regenerate while a send is in flight",
                ));
            }
            let last = inner
                .turns
                .last_turn()
                .ok_or_else(|| BichatError::not_found("ConversationTurn", turn_id))?;
            if last.id != turn_id {
                return Err(BichatError::validation(
                    "only the last assistant turn can be regenerated",
                ));
            }
            let user = last.user.clone();
            let stashed = inner
                .turns
                .clear_assistant(turn_id)?
                .ok_or_else(|| BichatError::validation("turn has no assistant response"))?;

            let request = SendMessageRequest {
                session_id: inner.session_id()?,
                content: user.content,
                attachments: user.attachments,
                debug_mode: inner.debug_mode,
                replace_from_turn_id: Some(turn_id.to_string()),
            };
            let (request, generation, token) = self.begin_send(&mut inner, request);
            (request, generation, token, stashed)
        };

        match self.run_stream(request, generation, token).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut inner = self.inner.lock().await;
                // Revert only if the failed generation still owns the turn.
                if inner.turns.last_turn().is_some_and(|t| t.id == turn_id) {
                    inner.turns.restore_assistant(turn_id, stashed);
                    inner.status = ChatStatus::Idle;
                    inner.stream_error = None;
                    tracing::warn!(turn_id, "regeneration failed, prior content restored");
                }
                Err(err)
            }
        }
    }

    /// Edits the most recent user turn and resubmits it.
    ///
    /// The turn's assistant response and every later turn are discarded
    /// before the request is re-issued; the truncation is idempotent, so a
    /// repeated failure does not accumulate duplicate turns.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless `turn_id` is the most recent turn
    /// and no send is in flight.
    pub async fn edit(&self, turn_id: &str, new_content: &str) -> Result<()> {
        if new_content.trim().is_empty() {
            return Err(BichatError::validation("edited message needs text"));
        }
        let (request, generation, token) = {
            let mut inner = self.inner.lock().await;
            if matches!(
                inner.status,
                ChatStatus::Sending | ChatStatus::Streaming | ChatStatus::AwaitingQuestion
            ) {
                return Err(BichatError::validation(
                    "cannot edit while a send is in flight",
                ));
            }
            let last = inner
                .turns
                .last_turn()
                .ok_or_else(|| BichatError::not_found("ConversationTurn", turn_id))?;
            if last.id != turn_id {
                return Err(BichatError::validation(
                    "only the most recent user turn can be edited",
                ));
            }
            let attachments = last.user.attachments.clone();
            inner.turns.truncate_from(turn_id, new_content)?;

            let request = SendMessageRequest {
                session_id: inner.session_id()?,
                content: new_content.to_string(),
                attachments,
                debug_mode: inner.debug_mode,
                replace_from_turn_id: Some(turn_id.to_string()),
            };
            self.begin_send(&mut inner, request)
        };

        self.run_stream(request, generation, token).await
    }

    /// Replays the last request after a terminal stream error, without
    /// creating a duplicate user turn.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless the controller is in the error
    /// state with a replayable request.
    pub async fn retry(&self) -> Result<()> {
        let (request, generation, token) = {
            let mut inner = self.inner.lock().await;
            if inner.status != ChatStatus::Error {
                return Err(BichatError::validation(
                    "retry is only available after a stream error",
                ));
            }
            let request = inner
                .last_request
                .clone()
                .ok_or_else(|| BichatError::validation("no request to retry"))?;

            // Drop the partial content from the failed attempt so the replay
            // does not append to it.
            if let Some(last_id) = inner.turns.last_turn().map(|t| t.id.clone()) {
                inner.turns.clear_assistant(&last_id)?;
            }
            self.begin_send(&mut inner, request)
        };

        self.run_stream(request, generation, token).await
    }

    /// Aborts the in-flight stream and leaves any partially received
    /// assistant content as final.
    ///
    /// Chunks still in flight for the aborted request are discarded by the
    /// generation check. Safe to call in any state.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        inner.turns.finalize_streaming();
        if inner.question.is_pending() {
            // No stream left to resume; release the slot.
            let _ = inner.question.cancel();
        }
        if inner.status != ChatStatus::Idle {
            tracing::debug!("stream cancelled by user");
        }
        inner.status = ChatStatus::Idle;
    }

    /// Pops the most recently queued message for recall into the input box.
    ///
    /// The rest of the queue keeps its order.
    pub async fn unqueue(&self) -> Option<QueuedMessage> {
        self.inner.lock().await.queue.pop_latest()
    }

    // ============================================================================
    // Pending question
    // ============================================================================

    /// Submits answers for the pending question and resumes generation.
    ///
    /// Answers are validated locally first; the question transitions to
    /// `Answered` only after the data source accepts the submission, so a
    /// failed submission leaves it `Pending`. The state lock is released
    /// while the submission is in flight; the slot is re-checked before the
    /// transition is committed.
    pub async fn submit_question_answers(&self, answers: &[QuestionAnswer]) -> Result<()> {
        let (session_id, question_id) = {
            let inner = self.inner.lock().await;
            inner.question.validate(answers)?;
            let question_id = inner
                .question
                .current()
                .map(|q| q.id.clone())
                .ok_or_else(|| BichatError::validation("no pending question to answer"))?;
            (inner.session_id()?, question_id)
        };

        self.data_source
            .submit_question_answers(&session_id, &question_id, answers)
            .await?;

        let mut inner = self.inner.lock().await;
        match inner.question.current() {
            Some(q) if q.id == question_id && q.is_pending() => {
                inner.question.answer(answers)?;
                if inner.status == ChatStatus::AwaitingQuestion {
                    inner.status = ChatStatus::Streaming;
                }
                tracing::debug!(question_id, "question answered, generation resumed");
            }
            _ => {
                // Resolved locally while the submission was in flight; the
                // backend accepted the answers, nothing left to transition.
                tracing::warn!(question_id, "question resolved during submission");
            }
        }
        Ok(())
    }

    /// Cancels the pending question; generation continues without answers.
    ///
    /// As with submission, the data-source call happens with the state lock
    /// released and the slot is re-checked before the transition.
    pub async fn cancel_pending_question(&self) -> Result<()> {
        let question_id = {
            let inner = self.inner.lock().await;
            match inner.question.current() {
                Some(q) if q.is_pending() => q.id.clone(),
                _ => return Err(BichatError::validation("no pending question to cancel")),
            }
        };

        self.data_source.cancel_pending_question(&question_id).await?;

        let mut inner = self.inner.lock().await;
        if inner
            .question
            .current()
            .is_some_and(|q| q.id == question_id && q.is_pending())
        {
            inner.question.cancel()?;
            if inner.status == ChatStatus::AwaitingQuestion {
                inner.status = ChatStatus::Streaming;
            }
            tracing::debug!(question_id, "question cancelled");
        }
        Ok(())
    }

    // ============================================================================
    // Capabilities
    // ============================================================================

    /// Places text on the host clipboard.
    ///
    /// Failures are logged and returned; no controller state changes.
    pub async fn copy_text(&self, text: &str) -> Result<()> {
        let clipboard = self
            .clipboard
            .as_ref()
            .ok_or_else(|| BichatError::unsupported("clipboard"))?;
        clipboard.set_text(text).await.inspect_err(|err| {
            tracing::warn!(%err, "clipboard write failed");
        })
    }

    /// Fetches the first page of session artifacts, replacing the panel
    /// contents.
    ///
    /// On failure the prior list stays intact and the error is surfaced as
    /// a dismissible panel error.
    pub async fn refresh_artifacts(&self) -> Result<()> {
        let source = self
            .artifact_source
            .as_ref()
            .ok_or_else(|| BichatError::unsupported("artifacts"))?;
        let session_id = self.inner.lock().await.session_id()?;
        let page = ArtifactPage {
            limit: self.artifact_page_size,
            offset: 0,
        };

        match source.fetch_artifacts(&session_id, page).await {
            Ok(batch) => {
                let mut inner = self.inner.lock().await;
                inner.artifact_panel.artifacts = batch.artifacts;
                inner.artifact_panel.has_more = batch.has_more;
                inner.artifact_panel.next_offset = batch.next_offset;
                inner.artifact_panel.error = None;
                Ok(())
            }
            Err(err) => {
                self.inner.lock().await.artifact_panel.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Fetches the next page of session artifacts, appending to the panel.
    ///
    /// A no-op when there is no further page.
    pub async fn load_more_artifacts(&self) -> Result<()> {
        let source = self
            .artifact_source
            .as_ref()
            .ok_or_else(|| BichatError::unsupported("artifacts"))?;
        let (session_id, offset) = {
            let inner = self.inner.lock().await;
            match (inner.artifact_panel.has_more, inner.artifact_panel.next_offset) {
                (true, Some(offset)) => (inner.session_id()?, offset),
                _ => return Ok(()),
            }
        };
        let page = ArtifactPage {
            limit: self.artifact_page_size,
            offset,
        };

        match source.fetch_artifacts(&session_id, page).await {
            Ok(batch) => {
                let mut inner = self.inner.lock().await;
                inner.artifact_panel.artifacts.extend(batch.artifacts);
                inner.artifact_panel.has_more = batch.has_more;
                inner.artifact_panel.next_offset = batch.next_offset;
                inner.artifact_panel.error = None;
                Ok(())
            }
            Err(err) => {
                self.inner.lock().await.artifact_panel.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Uploads files as session artifacts, then refreshes the panel.
    pub async fn upload_artifacts(&self, files: Vec<UploadFile>) -> Result<()> {
        let source = self
            .artifact_source
            .as_ref()
            .ok_or_else(|| BichatError::unsupported("artifacts"))?;
        let session_id = self.inner.lock().await.session_id()?;
        source.upload_artifacts(&session_id, files).await?;
        self.refresh_artifacts().await
    }

    /// Applies an out-of-band artifact invalidation signal by refetching the
    /// first page. A no-op for hosts without the artifact capability.
    pub async fn invalidate_artifacts(&self) -> Result<()> {
        match self.refresh_artifacts().await {
            Err(BichatError::Unsupported(_)) => Ok(()),
            other => other,
        }
    }

    /// Dismisses the artifact panel error.
    pub async fn dismiss_artifact_error(&self) {
        self.inner.lock().await.artifact_panel.error = None;
    }

    // ============================================================================
    // Preferences & view
    // ============================================================================

    /// Sets the debug-telemetry preference for subsequent sends.
    pub async fn set_debug_mode(&self, enabled: bool) {
        self.inner.lock().await.debug_mode = enabled;
    }

    /// The current debug-telemetry preference.
    pub async fn debug_mode(&self) -> bool {
        self.inner.lock().await.debug_mode
    }

    /// Takes a render-ready snapshot of the controller state.
    pub async fn view(&self) -> ChatView {
        let inner = self.inner.lock().await;
        ChatView {
            session: inner.session.clone(),
            status: inner.status,
            turns: inner.turns.turns().to_vec(),
            queued_count: inner.queue.len(),
            pending_question: inner.question.current().cloned(),
            usage: inner.usage.clone(),
            debug_mode: inner.debug_mode,
            input_error: inner.input_error.clone(),
            stream_error: inner.stream_error.clone(),
            artifact_panel: inner.artifact_panel.clone(),
        }
    }

    // ============================================================================
    // Stream consumption
    // ============================================================================

    /// Queues the message when a send is already in flight.
    fn enqueue_if_busy(inner: &mut Inner, content: &str, attachments: &[Attachment]) -> bool {
        match inner.status {
            ChatStatus::Sending | ChatStatus::Streaming | ChatStatus::AwaitingQuestion => {
                inner
                    .queue
                    .enqueue(QueuedMessage::new(content, attachments.to_vec()));
                tracing::debug!(queued = inner.queue.len(), "send in flight, message queued");
                true
            }
            ChatStatus::Idle | ChatStatus::Error => false,
        }
    }

    /// Appends the optimistic user turn and marks the send as begun.
    fn prepare_send(
        &self,
        inner: &mut Inner,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<(SendMessageRequest, u64, CancellationToken)> {
        let session_id = inner.session_id()?;
        inner
            .turns
            .append_optimistic(&session_id, &content, attachments.clone());
        let request = SendMessageRequest {
            session_id,
            content,
            attachments,
            debug_mode: inner.debug_mode,
            replace_from_turn_id: None,
        };
        Ok(self.begin_send(inner, request))
    }

    /// Marks a new outbound request: bumps the generation, installs a fresh
    /// cancellation token, and records the request for retry.
    fn begin_send(
        &self,
        inner: &mut Inner,
        request: SendMessageRequest,
    ) -> (SendMessageRequest, u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        inner.cancel = Some(token.clone());
        inner.status = ChatStatus::Sending;
        inner.stream_error = None;
        inner.last_request = Some(request.clone());
        (request, generation, token)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Opens the stream for `request` and applies its chunks in arrival
    /// order, exactly once, until a terminal chunk or cancellation. After a
    /// completed generation, flushes one queued message and continues with
    /// it, so the conversation drains without re-entry.
    async fn run_stream(
        &self,
        mut request: SendMessageRequest,
        mut generation: u64,
        mut token: CancellationToken,
    ) -> Result<()> {
        loop {
            let mut stream = match self
                .data_source
                .send_message(request.clone(), token.clone())
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    let mut inner = self.inner.lock().await;
                    if self.is_current(generation) {
                        inner.status = ChatStatus::Error;
                        inner.stream_error = Some(err.to_string());
                        inner.turns.finalize_streaming();
                    }
                    tracing::error!(%err, "failed to open message stream");
                    return Err(err);
                }
            };

            {
                let mut inner = self.inner.lock().await;
                if !self.is_current(generation) {
                    return Ok(());
                }
                inner.status = ChatStatus::Streaming;
            }

            let mut end = StreamEnd::Closed;
            while let Some(chunk) = stream.next().await {
                let mut inner = self.inner.lock().await;
                if !self.is_current(generation) {
                    tracing::debug!("discarding chunk for abandoned request");
                    return Ok(());
                }
                match chunk {
                    StreamChunk::Content { content } => {
                        if let Err(err) = inner.turns.append_content(&content) {
                            inner.status = ChatStatus::Error;
                            inner.stream_error = Some(err.to_string());
                            return Err(err);
                        }
                    }
                    StreamChunk::UserMessage { turn } => {
                        inner.turns.confirm_user_turn(turn);
                    }
                    StreamChunk::Question { question } => match inner.question.activate(question) {
                        Ok(()) => inner.status = ChatStatus::AwaitingQuestion,
                        Err(err) => {
                            tracing::warn!(%err, "question chunk ignored");
                        }
                    },
                    StreamChunk::Usage { usage } => {
                        inner.usage.record_usage(&usage);
                        if request.debug_mode {
                            inner.turns.attach_usage(usage);
                        }
                    }
                    StreamChunk::Tool { record } => {
                        inner.usage.record_tool_call();
                        if request.debug_mode {
                            inner.turns.attach_tool_record(record);
                        }
                    }
                    StreamChunk::Error { message } => {
                        end = StreamEnd::Failed(message);
                        break;
                    }
                    StreamChunk::Done => {
                        end = StreamEnd::Done;
                        break;
                    }
                }
            }

            let next = {
                let mut inner = self.inner.lock().await;
                if !self.is_current(generation) {
                    return Ok(());
                }
                match end {
                    StreamEnd::Done => {
                        inner.turns.finalize_streaming();
                        if inner.question.is_pending() {
                            // The backend finished without resolving its own
                            // question; release the slot so the next
                            // activation is not wedged.
                            let _ = inner.question.cancel();
                        }
                        if let Some(queued) = inner.queue.dequeue() {
                            tracing::debug!(
                                remaining = inner.queue.len(),
                                "auto-flushing queued message"
                            );
                            let session_id = inner.session_id()?;
                            inner.turns.append_optimistic(
                                &session_id,
                                &queued.content,
                                queued.attachments.clone(),
                            );
                            let request = SendMessageRequest {
                                session_id,
                                content: queued.content,
                                attachments: queued.attachments,
                                debug_mode: inner.debug_mode,
                                replace_from_turn_id: None,
                            };
                            Some(self.begin_send(&mut inner, request))
                        } else {
                            inner.status = ChatStatus::Idle;
                            inner.cancel = None;
                            None
                        }
                    }
                    StreamEnd::Failed(message) => {
                        inner.turns.finalize_streaming();
                        inner.status = ChatStatus::Error;
                        inner.stream_error = Some(message.clone());
                        tracing::warn!(message, "stream ended with error");
                        return Err(BichatError::transport(message));
                    }
                    StreamEnd::Closed => {
                        inner.turns.finalize_streaming();
                        inner.status = ChatStatus::Error;
                        let message = "stream closed before completion".to_string();
                        inner.stream_error = Some(message.clone());
                        tracing::warn!("stream closed without a terminal chunk");
                        return Err(BichatError::transport(message));
                    }
                }
            };

            match next {
                Some((next_request, next_generation, next_token)) => {
                    request = next_request;
                    generation = next_generation;
                    token = next_token;
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bichat_core::session::{
        Artifact, ArtifactBatch, AssistantTurn, ConversationTurn, PendingQuestion, Question,
        QuestionOption, QuestionStatus, SessionSnapshot, SessionStatus, StreamHandle, TokenUsage,
        ToolCallRecord, UserTurn,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    // ============================================================================
    // Mocks & fixtures
    // ============================================================================

    struct MockDataSource {
        session: StdMutex<Session>,
        snapshot: StdMutex<Option<SessionSnapshot>>,
        streams: StdMutex<VecDeque<Result<StreamHandle>>>,
        sent: StdMutex<Vec<SendMessageRequest>>,
        submit_error: StdMutex<Option<BichatError>>,
        submit_gate: StdMutex<Option<Arc<tokio::sync::Notify>>>,
        submit_entered: StdMutex<bool>,
        submissions: StdMutex<Vec<(String, String, usize)>>,
        cancelled_questions: StdMutex<Vec<String>>,
    }

    impl MockDataSource {
        fn new() -> Self {
            Self {
                session: StdMutex::new(Session::new("session-1", "New analysis")),
                snapshot: StdMutex::new(None),
                streams: StdMutex::new(VecDeque::new()),
                sent: StdMutex::new(Vec::new()),
                submit_error: StdMutex::new(None),
                submit_gate: StdMutex::new(None),
                submit_entered: StdMutex::new(false),
                submissions: StdMutex::new(Vec::new()),
                cancelled_questions: StdMutex::new(Vec::new()),
            }
        }

        fn push_stream(&self, stream: Result<StreamHandle>) {
            self.streams.lock().unwrap().push_back(stream);
        }

        fn push_chunks(&self, chunks: Vec<StreamChunk>) {
            self.push_stream(Ok(futures::stream::iter(chunks).boxed()));
        }

        fn set_snapshot(&self, snapshot: Option<SessionSnapshot>) {
            *self.snapshot.lock().unwrap() = snapshot;
        }

        fn sent_requests(&self) -> Vec<SendMessageRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatDataSource for MockDataSource {
        async fn create_session(&self) -> Result<Session> {
            Ok(self.session.lock().unwrap().clone())
        }

        async fn fetch_session(&self, _session_id: &str) -> Result<Option<SessionSnapshot>> {
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn send_message(
            &self,
            request: SendMessageRequest,
            _cancel: CancellationToken,
        ) -> Result<StreamHandle> {
            self.sent.lock().unwrap().push(request);
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(futures::stream::iter(Vec::new()).boxed()))
        }

        async fn submit_question_answers(
            &self,
            session_id: &str,
            question_id: &str,
            answers: &[QuestionAnswer],
        ) -> Result<()> {
            let gate = self.submit_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                *self.submit_entered.lock().unwrap() = true;
                gate.notified().await;
            }
            if let Some(err) = self.submit_error.lock().unwrap().take() {
                return Err(err);
            }
            self.submissions.lock().unwrap().push((
                session_id.to_string(),
                question_id.to_string(),
                answers.len(),
            ));
            Ok(())
        }

        async fn cancel_pending_question(&self, question_id: &str) -> Result<()> {
            self.cancelled_questions
                .lock()
                .unwrap()
                .push(question_id.to_string());
            Ok(())
        }

        async fn rename_session(&self, _session_id: &str, title: &str) -> Result<Session> {
            let mut session = self.session.lock().unwrap();
            session.title = title.to_string();
            session.updated_at = chrono::Utc::now().to_rfc3339();
            Ok(session.clone())
        }

        async fn set_pinned(&self, _session_id: &str, pinned: bool) -> Result<Session> {
            let mut session = self.session.lock().unwrap();
            session.pinned = pinned;
            Ok(session.clone())
        }

        async fn set_archived(&self, _session_id: &str, archived: bool) -> Result<Session> {
            let mut session = self.session.lock().unwrap();
            session.status = if archived {
                SessionStatus::Archived
            } else {
                SessionStatus::Active
            };
            Ok(session.clone())
        }
    }

    struct MockArtifactSource {
        pages: StdMutex<VecDeque<Result<ArtifactBatch>>>,
        uploads: StdMutex<Vec<Vec<UploadFile>>>,
    }

    impl MockArtifactSource {
        fn new() -> Self {
            Self {
                pages: StdMutex::new(VecDeque::new()),
                uploads: StdMutex::new(Vec::new()),
            }
        }

        fn push_page(&self, page: Result<ArtifactBatch>) {
            self.pages.lock().unwrap().push_back(page);
        }
    }

    #[async_trait]
    impl ArtifactSource for MockArtifactSource {
        async fn fetch_artifacts(
            &self,
            _session_id: &str,
            _page: ArtifactPage,
        ) -> Result<ArtifactBatch> {
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BichatError::data_source("no page scripted")))
        }

        async fn upload_artifacts(
            &self,
            _session_id: &str,
            files: Vec<UploadFile>,
        ) -> Result<Vec<Artifact>> {
            self.uploads.lock().unwrap().push(files);
            Ok(Vec::new())
        }
    }

    struct MockClipboard {
        texts: StdMutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Clipboard for MockClipboard {
        async fn set_text(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(BichatError::internal("clipboard unavailable"));
            }
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn controller(data_source: Arc<MockDataSource>) -> Arc<SessionController> {
        Arc::new(SessionController::new(data_source))
    }

    fn channel_stream() -> (mpsc::UnboundedSender<StreamChunk>, StreamHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed();
        (tx, stream)
    }

    fn pending_question() -> PendingQuestion {
        PendingQuestion {
            id: "pq-1".to_string(),
            turn_id: "t-1".to_string(),
            status: QuestionStatus::Pending,
            questions: vec![Question {
                id: "q1".to_string(),
                text: "Which period?".to_string(),
                header: "Period".to_string(),
                multi_select: false,
                required: false,
                options: vec![
                    QuestionOption {
                        id: "q1_opt1".to_string(),
                        label: "Monthly".to_string(),
                        description: "Aggregate by month".to_string(),
                    },
                    QuestionOption {
                        id: "q1_opt2".to_string(),
                        label: "Quarterly".to_string(),
                        description: "Aggregate by quarter".to_string(),
                    },
                ],
            }],
        }
    }

    fn answer() -> QuestionAnswer {
        QuestionAnswer {
            question_id: "q1".to_string(),
            selected: vec!["Monthly".to_string()],
            custom_text: None,
        }
    }

    fn snapshot_with_turns(count: usize) -> SessionSnapshot {
        let turns = (0..count)
            .map(|i| {
                let mut turn = ConversationTurn::from_user(
                    "session-1",
                    UserTurn::new(format!("question {i}"), Vec::new()),
                );
                turn.assistant = Some(AssistantTurn {
                    content: format!("answer {i}"),
                    ..AssistantTurn::streaming()
                });
                turn
            })
            .collect();
        SessionSnapshot {
            session: Session::new("session-1", "Revenue analysis"),
            turns,
            pending_question: None,
        }
    }

    async fn wait_for<F>(controller: &SessionController, what: &str, pred: F) -> ChatView
    where
        F: Fn(&ChatView) -> bool,
    {
        for _ in 0..400 {
            let view = controller.view().await;
            if pred(&view) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    // ============================================================================
    // Tests
    // ============================================================================

    #[tokio::test]
    async fn send_while_streaming_queues_instead_of_opening_second_stream() {
        let ds = Arc::new(MockDataSource::new());
        let (tx, stream) = channel_stream();
        ds.push_stream(Ok(stream));
        let controller = controller(ds.clone());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send_message("ping", Vec::new()).await }
        });
        wait_for(&controller, "streaming", |v| v.status == ChatStatus::Streaming).await;

        // Second send while busy: exactly one queue entry, no second stream
        let outcome = controller.send_message("pong", Vec::new()).await.unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        let view = controller.view().await;
        assert_eq!(view.turns.len(), 1);
        assert_eq!(view.queued_count, 1);
        assert_eq!(ds.sent_requests().len(), 1);

        // Completion auto-flushes the queued message
        ds.push_chunks(vec![
            StreamChunk::Content {
                content: "pong!".to_string(),
            },
            StreamChunk::Done,
        ]);
        tx.send(StreamChunk::Done).unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SendOutcome::Dispatched);

        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Idle);
        assert_eq!(view.turns.len(), 2);
        assert_eq!(view.queued_count, 0);
        let sent = ds.sent_requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].content, "ping");
        assert_eq!(sent[1].content, "pong");
    }

    #[tokio::test]
    async fn queue_drains_fifo_and_unqueue_recalls_lifo() {
        let ds = Arc::new(MockDataSource::new());
        let (tx, stream) = channel_stream();
        ds.push_stream(Ok(stream));
        let controller = controller(ds.clone());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send_message("m", Vec::new()).await }
        });
        wait_for(&controller, "streaming", |v| v.status == ChatStatus::Streaming).await;

        controller.send_message("a", Vec::new()).await.unwrap();
        controller.send_message("b", Vec::new()).await.unwrap();

        // Recall before done returns the most recent entry, leaving "a"
        let recalled = controller.unqueue().await.unwrap();
        assert_eq!(recalled.content, "b");
        assert_eq!(controller.view().await.queued_count, 1);

        ds.push_chunks(vec![StreamChunk::Done]);
        tx.send(StreamChunk::Done).unwrap();
        task.await.unwrap().unwrap();

        let sent = ds.sent_requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].content, "a");
        assert!(controller.view().await.queued_count == 0);
    }

    #[tokio::test]
    async fn cancel_discards_stale_chunks() {
        let ds = Arc::new(MockDataSource::new());
        let (tx, stream) = channel_stream();
        ds.push_stream(Ok(stream));
        let controller = controller(ds.clone());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send_message("hi", Vec::new()).await }
        });
        tx.send(StreamChunk::Content {
            content: "Hello".to_string(),
        })
        .unwrap();
        wait_for(&controller, "first delta", |v| {
            v.turns
                .first()
                .and_then(|t| t.assistant.as_ref())
                .is_some_and(|a| a.content == "Hello")
        })
        .await;

        controller.cancel().await;

        // A chunk arriving after cancellation must not resurrect state
        tx.send(StreamChunk::Content {
            content: " stale".to_string(),
        })
        .unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Idle);
        let assistant = view.turns[0].assistant.as_ref().unwrap();
        assert_eq!(assistant.content, "Hello");
    }

    #[tokio::test]
    async fn terminal_error_preserves_partial_content_and_retry_replays_once() {
        let ds = Arc::new(MockDataSource::new());
        ds.push_chunks(vec![
            StreamChunk::Content {
                content: "par".to_string(),
            },
            StreamChunk::Error {
                message: "boom".to_string(),
            },
        ]);
        let controller = controller(ds.clone());

        let err = controller.send_message("hi", Vec::new()).await.unwrap_err();
        assert!(err.is_transport());

        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Error);
        assert_eq!(view.stream_error.as_deref(), Some("boom"));
        assert_eq!(view.turns[0].assistant.as_ref().unwrap().content, "par");

        // Retry replays the request without duplicating the user turn
        ds.push_chunks(vec![
            StreamChunk::Content {
                content: "full".to_string(),
            },
            StreamChunk::Done,
        ]);
        controller.retry().await.unwrap();

        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Idle);
        assert_eq!(view.turns.len(), 1);
        assert_eq!(view.turns[0].assistant.as_ref().unwrap().content, "full");
        assert_eq!(ds.sent_requests().len(), 2);

        // Retry is only available from the error state
        assert!(controller.retry().await.is_err());
    }

    #[tokio::test]
    async fn edit_truncates_and_resubmits() {
        let ds = Arc::new(MockDataSource::new());
        ds.push_chunks(vec![
            StreamChunk::Content {
                content: "Hello".to_string(),
            },
            StreamChunk::Done,
        ]);
        let controller = controller(ds.clone());
        controller.send_message("Hi", Vec::new()).await.unwrap();
        let turn_id = controller.view().await.turns[0].id.clone();

        ds.push_chunks(vec![
            StreamChunk::Content {
                content: "Hi!".to_string(),
            },
            StreamChunk::Done,
        ]);
        controller.edit(&turn_id, "Hi there").await.unwrap();

        let view = controller.view().await;
        assert_eq!(view.turns.len(), 1);
        assert_eq!(view.turns[0].user.content, "Hi there");
        assert_eq!(view.turns[0].assistant.as_ref().unwrap().content, "Hi!");
        let sent = ds.sent_requests();
        assert_eq!(sent[1].replace_from_turn_id.as_deref(), Some(turn_id.as_str()));

        // A failed resubmission keeps the same turn count
        ds.push_chunks(vec![StreamChunk::Error {
            message: "down".to_string(),
        }]);
        assert!(controller.edit(&turn_id, "Hi again").await.is_err());
        let view = controller.view().await;
        assert_eq!(view.turns.len(), 1);
        assert_eq!(view.turns[0].user.content, "Hi again");
        assert!(view.turns[0].assistant.is_none());
    }

    #[tokio::test]
    async fn regenerate_replaces_last_assistant_and_reverts_on_failure() {
        let ds = Arc::new(MockDataSource::new());
        ds.push_chunks(vec![
            StreamChunk::Content {
                content: "v1".to_string(),
            },
            StreamChunk::Done,
        ]);
        let controller = controller(ds.clone());
        controller.send_message("hi", Vec::new()).await.unwrap();
        let turn_id = controller.view().await.turns[0].id.clone();

        ds.push_chunks(vec![
            StreamChunk::Content {
                content: "v2".to_string(),
            },
            StreamChunk::Done,
        ]);
        controller.regenerate(&turn_id).await.unwrap();

        let view = controller.view().await;
        assert_eq!(view.turns.len(), 1);
        assert_eq!(view.turns[0].assistant.as_ref().unwrap().content, "v2");
        assert_eq!(
            ds.sent_requests()[1].replace_from_turn_id.as_deref(),
            Some(turn_id.as_str())
        );

        // Failure to open the stream restores the prior content
        ds.push_stream(Err(BichatError::transport("backend down")));
        assert!(controller.regenerate(&turn_id).await.is_err());
        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Idle);
        assert_eq!(view.turns[0].assistant.as_ref().unwrap().content, "v2");
    }

    #[tokio::test]
    async fn question_flow_pauses_and_resumes() {
        let ds = Arc::new(MockDataSource::new());
        let (tx, stream) = channel_stream();
        ds.push_stream(Ok(stream));
        let controller = controller(ds.clone());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send_message("hi", Vec::new()).await }
        });
        tx.send(StreamChunk::Question {
            question: pending_question(),
        })
        .unwrap();
        wait_for(&controller, "awaiting question", |v| {
            v.status == ChatStatus::AwaitingQuestion
        })
        .await;

        controller.submit_question_answers(&[answer()]).await.unwrap();

        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Streaming);
        assert_eq!(
            view.pending_question.as_ref().unwrap().status,
            QuestionStatus::Answered
        );
        let submissions = ds.submissions.lock().unwrap().clone();
        assert_eq!(submissions, vec![("session-1".to_string(), "pq-1".to_string(), 1)]);

        tx.send(StreamChunk::Content {
            content: "resumed".to_string(),
        })
        .unwrap();
        tx.send(StreamChunk::Done).unwrap();
        task.await.unwrap().unwrap();

        let view = controller.view().await;
        assert_eq!(view.turns[0].assistant.as_ref().unwrap().content, "resumed");
        assert_eq!(view.status, ChatStatus::Idle);
    }

    #[tokio::test]
    async fn question_submission_failure_leaves_question_pending() {
        let ds = Arc::new(MockDataSource::new());
        let (tx, stream) = channel_stream();
        ds.push_stream(Ok(stream));
        let controller = controller(ds.clone());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send_message("hi", Vec::new()).await }
        });
        tx.send(StreamChunk::Question {
            question: pending_question(),
        })
        .unwrap();
        wait_for(&controller, "awaiting question", |v| {
            v.status == ChatStatus::AwaitingQuestion
        })
        .await;

        *ds.submit_error.lock().unwrap() = Some(BichatError::data_source("rejected"));
        assert!(controller.submit_question_answers(&[answer()]).await.is_err());

        // No partial mutation on failure
        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::AwaitingQuestion);
        assert!(view.pending_question.as_ref().unwrap().is_pending());

        // Cancelling notifies the data source and resumes the stream
        controller.cancel_pending_question().await.unwrap();
        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Streaming);
        assert_eq!(
            view.pending_question.as_ref().unwrap().status,
            QuestionStatus::Cancelled
        );
        assert_eq!(
            ds.cancelled_questions.lock().unwrap().clone(),
            vec!["pq-1".to_string()]
        );

        tx.send(StreamChunk::Done).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn snapshots_stay_available_while_a_submission_is_in_flight() {
        let ds = Arc::new(MockDataSource::new());
        let (tx, stream) = channel_stream();
        ds.push_stream(Ok(stream));
        let gate = Arc::new(tokio::sync::Notify::new());
        *ds.submit_gate.lock().unwrap() = Some(gate.clone());
        let controller = controller(ds.clone());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send_message("hi", Vec::new()).await }
        });
        tx.send(StreamChunk::Question {
            question: pending_question(),
        })
        .unwrap();
        wait_for(&controller, "awaiting question", |v| {
            v.status == ChatStatus::AwaitingQuestion
        })
        .await;

        let submit = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit_question_answers(&[answer()]).await }
        });
        for _ in 0..400 {
            if *ds.submit_entered.lock().unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(*ds.submit_entered.lock().unwrap());

        // The state lock must not be held across the data-source call
        let view = tokio::time::timeout(Duration::from_secs(1), controller.view())
            .await
            .expect("snapshot blocked behind the in-flight submission");
        assert_eq!(view.status, ChatStatus::AwaitingQuestion);

        gate.notify_one();
        submit.await.unwrap().unwrap();
        assert_eq!(controller.view().await.status, ChatStatus::Streaming);

        tx.send(StreamChunk::Done).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn done_with_unresolved_question_releases_the_slot() {
        let ds = Arc::new(MockDataSource::new());
        ds.push_chunks(vec![
            StreamChunk::Question {
                question: pending_question(),
            },
            StreamChunk::Done,
        ]);
        let controller = controller(ds);

        controller.send_message("hi", Vec::new()).await.unwrap();

        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Idle);
        assert_eq!(
            view.pending_question.as_ref().unwrap().status,
            QuestionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn bootstrap_loads_turns_and_pending_question() {
        let ds = Arc::new(MockDataSource::new());
        let mut snapshot = snapshot_with_turns(2);
        snapshot.pending_question = Some(pending_question());
        ds.set_snapshot(Some(snapshot));
        let controller = controller(ds);

        controller.bootstrap("session-1").await.unwrap();

        let view = controller.view().await;
        assert_eq!(view.turns.len(), 2);
        assert_eq!(view.session.as_ref().unwrap().title, "Revenue analysis");
        assert!(view.pending_question.as_ref().unwrap().is_pending());
        assert_eq!(view.status, ChatStatus::Idle);
    }

    #[tokio::test]
    async fn bootstrap_during_stream_abandons_the_old_stream() {
        let ds = Arc::new(MockDataSource::new());
        let (tx, stream) = channel_stream();
        ds.push_stream(Ok(stream));
        let controller = controller(ds.clone());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send_message("hi", Vec::new()).await }
        });
        wait_for(&controller, "streaming", |v| v.status == ChatStatus::Streaming).await;

        ds.set_snapshot(Some(snapshot_with_turns(1)));
        controller.bootstrap("session-1").await.unwrap();

        // Chunks from the abandoned stream must not touch the loaded turns
        tx.send(StreamChunk::Content {
            content: "LEAK".to_string(),
        })
        .unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let view = controller.view().await;
        assert_eq!(view.status, ChatStatus::Idle);
        assert_eq!(view.turns.len(), 1);
        assert_eq!(view.turns[0].assistant.as_ref().unwrap().content, "answer 0");
    }

    #[tokio::test]
    async fn bootstrap_of_unknown_session_is_not_found() {
        let ds = Arc::new(MockDataSource::new());
        let controller = controller(ds);

        let err = controller.bootstrap("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rate_limited_submission_sets_input_error() {
        let ds = Arc::new(MockDataSource::new());
        ds.push_chunks(vec![StreamChunk::Done]);
        let controller = SessionControllerBuilder::new(ds)
            .with_rate_limiter(RateLimiter::new(1, Duration::from_secs(60)))
            .build();

        // First submission passes and clears input error state
        controller.submit_input("hi", Vec::new()).await.unwrap();
        assert!(controller.view().await.input_error.is_none());

        // Window exhausted: rejected locally, surfaced as input error
        let err = controller.submit_input("again", Vec::new()).await.unwrap_err();
        assert!(matches!(err, BichatError::Throttled));
        assert!(controller.view().await.input_error.is_some());
        // Not queued: throttling is distinct from "busy"
        assert_eq!(controller.view().await.queued_count, 0);
    }

    #[tokio::test]
    async fn empty_submission_is_rejected_locally() {
        let ds = Arc::new(MockDataSource::new());
        let controller = controller(ds.clone());

        let err = controller.send_message("   ", Vec::new()).await.unwrap_err();
        assert!(err.is_input_error());
        assert!(ds.sent_requests().is_empty());
        assert!(controller.view().await.turns.is_empty());
    }

    #[tokio::test]
    async fn user_message_echo_reconciles_optimistic_turn() {
        let ds = Arc::new(MockDataSource::new());
        let confirmed = UserTurn::new("hi", Vec::new());
        let confirmed_id = confirmed.id.clone();
        ds.push_chunks(vec![
            StreamChunk::UserMessage { turn: confirmed },
            StreamChunk::Content {
                content: "ok".to_string(),
            },
            StreamChunk::Done,
        ]);
        let controller = controller(ds);

        controller.send_message("hi", Vec::new()).await.unwrap();

        let view = controller.view().await;
        assert_eq!(view.turns.len(), 1);
        assert_eq!(view.turns[0].user.id, confirmed_id);
    }

    #[tokio::test]
    async fn debug_telemetry_accumulates_per_turn_and_per_session() {
        let ds = Arc::new(MockDataSource::new());
        ds.push_chunks(vec![
            StreamChunk::Content {
                content: "x".to_string(),
            },
            StreamChunk::Tool {
                record: ToolCallRecord {
                    call_id: "call-1".to_string(),
                    name: "sql_execute".to_string(),
                    arguments: None,
                    result: Some("3 rows".to_string()),
                    duration_ms: Some(12),
                    error: None,
                },
            },
            StreamChunk::Usage {
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            },
            StreamChunk::Done,
        ]);
        let controller = controller(ds);
        controller.set_debug_mode(true).await;

        controller.send_message("hi", Vec::new()).await.unwrap();

        let view = controller.view().await;
        assert_eq!(view.usage.usage.total_tokens, 15);
        assert_eq!(view.usage.tool_call_count, 1);
        let debug = view.turns[0].assistant.as_ref().unwrap().debug.as_ref().unwrap();
        assert_eq!(debug.tool_calls.len(), 1);
        assert_eq!(debug.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn tool_chunk_before_first_delta_is_kept_in_the_turn_trace() {
        let ds = Arc::new(MockDataSource::new());
        ds.push_chunks(vec![
            StreamChunk::Tool {
                record: ToolCallRecord {
                    call_id: "call-1".to_string(),
                    name: "sql_execute".to_string(),
                    arguments: None,
                    result: Some("3 rows".to_string()),
                    duration_ms: Some(12),
                    error: None,
                },
            },
            StreamChunk::Content {
                content: "x".to_string(),
            },
            StreamChunk::Done,
        ]);
        let controller = controller(ds);
        controller.set_debug_mode(true).await;

        controller.send_message("hi", Vec::new()).await.unwrap();

        // Per-turn trace and session tally must agree
        let view = controller.view().await;
        assert_eq!(view.usage.tool_call_count, 1);
        let debug = view.turns[0].assistant.as_ref().unwrap().debug.as_ref().unwrap();
        assert_eq!(debug.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn artifact_panel_pagination_and_error_handling() {
        let ds = Arc::new(MockDataSource::new());
        ds.set_snapshot(Some(snapshot_with_turns(0)));
        let artifacts = Arc::new(MockArtifactSource::new());
        let controller = SessionControllerBuilder::new(ds)
            .with_artifact_source(artifacts.clone())
            .with_artifact_page_size(2)
            .build();
        controller.bootstrap("session-1").await.unwrap();

        let artifact = |id: &str| Artifact {
            id: id.to_string(),
            name: format!("{id}.xlsx"),
            mime_type: "application/vnd.ms-excel".to_string(),
            size: 512,
            url: format!("https://example.com/{id}"),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        artifacts.push_page(Ok(ArtifactBatch {
            artifacts: vec![artifact("a-1"), artifact("a-2")],
            has_more: true,
            next_offset: Some(2),
        }));
        controller.refresh_artifacts().await.unwrap();
        assert_eq!(controller.view().await.artifact_panel.artifacts.len(), 2);

        artifacts.push_page(Ok(ArtifactBatch {
            artifacts: vec![artifact("a-3")],
            has_more: false,
            next_offset: None,
        }));
        controller.load_more_artifacts().await.unwrap();
        let panel = controller.view().await.artifact_panel;
        assert_eq!(panel.artifacts.len(), 3);
        assert!(!panel.has_more);

        // No further page: no-op, no fetch
        controller.load_more_artifacts().await.unwrap();
        assert_eq!(controller.view().await.artifact_panel.artifacts.len(), 3);

        // A failed refresh keeps the prior list and surfaces a panel error
        artifacts.push_page(Err(BichatError::data_source("listing failed")));
        assert!(controller.refresh_artifacts().await.is_err());
        let panel = controller.view().await.artifact_panel;
        assert_eq!(panel.artifacts.len(), 3);
        assert!(panel.error.is_some());

        controller.dismiss_artifact_error().await;
        assert!(controller.view().await.artifact_panel.error.is_none());
    }

    #[tokio::test]
    async fn upload_refreshes_the_artifact_panel() {
        let ds = Arc::new(MockDataSource::new());
        ds.set_snapshot(Some(snapshot_with_turns(0)));
        let artifacts = Arc::new(MockArtifactSource::new());
        let controller = SessionControllerBuilder::new(ds)
            .with_artifact_source(artifacts.clone())
            .build();
        controller.bootstrap("session-1").await.unwrap();

        artifacts.push_page(Ok(ArtifactBatch {
            artifacts: vec![Artifact {
                id: "a-1".to_string(),
                name: "report.csv".to_string(),
                mime_type: "text/csv".to_string(),
                size: 128,
                url: "https://example.com/a-1".to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            }],
            has_more: false,
            next_offset: None,
        }));
        controller
            .upload_artifacts(vec![UploadFile {
                filename: "report.csv".to_string(),
                mime_type: "text/csv".to_string(),
                base64_data: "aGVsbG8=".to_string(),
            }])
            .await
            .unwrap();

        assert_eq!(artifacts.uploads.lock().unwrap().len(), 1);
        assert_eq!(controller.view().await.artifact_panel.artifacts.len(), 1);
    }

    #[tokio::test]
    async fn artifact_invalidation_without_capability_is_a_noop() {
        let ds = Arc::new(MockDataSource::new());
        let controller = controller(ds);
        controller.invalidate_artifacts().await.unwrap();
    }

    #[tokio::test]
    async fn session_side_effects_refresh_cached_record() {
        let ds = Arc::new(MockDataSource::new());
        ds.set_snapshot(Some(snapshot_with_turns(0)));
        let controller = controller(ds);
        controller.bootstrap("session-1").await.unwrap();

        controller.rename("Quarterly revenue").await.unwrap();
        assert_eq!(
            controller.view().await.session.as_ref().unwrap().title,
            "Quarterly revenue"
        );

        controller.set_pinned(true).await.unwrap();
        assert!(controller.view().await.session.as_ref().unwrap().pinned);

        controller.set_archived(true).await.unwrap();
        assert_eq!(
            controller.view().await.session.as_ref().unwrap().status,
            SessionStatus::Archived
        );
    }

    #[tokio::test]
    async fn copy_text_requires_clipboard_capability() {
        let ds = Arc::new(MockDataSource::new());
        let controller = controller(ds.clone());
        assert!(matches!(
            controller.copy_text("SELECT 1").await.unwrap_err(),
            BichatError::Unsupported(_)
        ));

        let clipboard = Arc::new(MockClipboard {
            texts: StdMutex::new(Vec::new()),
            fail: false,
        });
        let controller = SessionControllerBuilder::new(ds)
            .with_clipboard(clipboard.clone())
            .build();
        controller.copy_text("SELECT 1").await.unwrap();
        assert_eq!(
            clipboard.texts.lock().unwrap().clone(),
            vec!["SELECT 1".to_string()]
        );
    }
}
