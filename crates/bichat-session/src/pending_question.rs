//! Single-slot tracker for the active clarifying question.
//!
//! The backend is trusted not to emit a second question while one is
//! outstanding, but the tracker defends the invariant anyway: activating a
//! question while another is `Pending` is rejected, and answer/cancel are
//! errors unless the slot is `Pending`.

use bichat_core::session::{PendingQuestion, QuestionAnswer, QuestionStatus};
use bichat_core::{BichatError, Result};

/// Holds at most one pending question per session.
#[derive(Debug, Default)]
pub struct PendingQuestionTracker {
    slot: Option<PendingQuestion>,
}

impl PendingQuestionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracked question, if any (in any status).
    pub fn current(&self) -> Option<&PendingQuestion> {
        self.slot.as_ref()
    }

    /// Whether a question is currently awaiting user input.
    pub fn is_pending(&self) -> bool {
        self.slot.as_ref().is_some_and(|q| q.is_pending())
    }

    /// Installs a new pending question.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a question is already `Pending`; the UI
    /// must resolve the active question before a new one can surface.
    pub fn activate(&mut self, question: PendingQuestion) -> Result<()> {
        if self.is_pending() {
            return Err(BichatError::validation(
                "a question is already pending for this session",
            ));
        }
        self.slot = Some(question);
        Ok(())
    }

    /// Validates answers against the pending question without mutating it.
    ///
    /// A required question is satisfied only if at least one option is
    /// selected or non-empty custom text is present. Non-required questions
    /// are always satisfiable, including with nothing selected.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no question is `Pending` or if a
    /// required question is left unanswered.
    pub fn validate(&self, answers: &[QuestionAnswer]) -> Result<()> {
        let question = match self.slot.as_ref() {
            Some(q) if q.is_pending() => q,
            _ => {
                return Err(BichatError::validation(
                    "no pending question to answer",
                ));
            }
        };

        for q in &question.questions {
            if !q.required {
                continue;
            }
            let satisfied = answers
                .iter()
                .find(|a| a.question_id == q.id)
                .is_some_and(QuestionAnswer::has_input);
            if !satisfied {
                return Err(BichatError::validation(format!(
                    "question '{}' requires an answer",
                    q.id
                )));
            }
        }

        Ok(())
    }

    /// Validates answers and transitions the question to `Answered`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`PendingQuestionTracker::validate`].
    pub fn answer(&mut self, answers: &[QuestionAnswer]) -> Result<()> {
        self.validate(answers)?;
        if let Some(q) = self.slot.as_mut() {
            q.status = QuestionStatus::Answered;
        }
        Ok(())
    }

    /// Transitions the question to `Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no question is `Pending`.
    pub fn cancel(&mut self) -> Result<()> {
        match self.slot.as_mut() {
            Some(q) if q.is_pending() => {
                q.status = QuestionStatus::Cancelled;
                Ok(())
            }
            _ => Err(BichatError::validation("no pending question to cancel")),
        }
    }

    /// Clears the slot entirely (session reset).
    pub fn clear(&mut self) {
        self.slot = None;
    }
}
