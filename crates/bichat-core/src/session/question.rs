//! Human-in-the-loop question types.
//!
//! While generating a response the assistant may pause and pose one or more
//! structured clarifying questions. Generation resumes only after the user
//! answers (or cancels) the pending question.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a pending question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    /// Waiting for user input; generation is paused.
    Pending,
    /// Answers were submitted; generation has resumed.
    Answered,
    /// The user declined to answer; generation continues without input.
    Cancelled,
}

/// An outstanding clarifying-question interrupt for a session.
///
/// At most one pending question is active per session at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuestion {
    /// Unique question-set identifier (checkpoint id on the backend)
    pub id: String,
    /// The turn whose generation is paused on this question
    pub turn_id: String,
    /// The questions to present, in order (1-4)
    pub questions: Vec<Question>,
    /// Current lifecycle status
    pub status: QuestionStatus,
}

/// A single structured question within a pending question set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Stable question identifier
    pub id: String,
    /// The complete question text
    pub text: String,
    /// Short label (max 12 chars) rendered as a chip/tag
    pub header: String,
    /// Whether multiple options may be selected
    #[serde(default)]
    pub multi_select: bool,
    /// Whether an answer is required before submission
    #[serde(default)]
    pub required: bool,
    /// Available options (2-4)
    pub options: Vec<QuestionOption>,
}

/// One selectable option of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Stable option identifier
    pub id: String,
    /// Display text (1-5 words)
    pub label: String,
    /// Explanation of what this option means
    pub description: String,
}

/// The user's answer to a single question.
///
/// An answer is either a set of selected option labels, free text ("Other"),
/// or both cleared.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuestionAnswer {
    /// The question this answers
    pub question_id: String,
    /// Labels of the selected options
    #[serde(default)]
    pub selected: Vec<String>,
    /// Free-text "Other" answer
    pub custom_text: Option<String>,
}

impl QuestionAnswer {
    /// Whether the answer carries any user input at all.
    pub fn has_input(&self) -> bool {
        !self.selected.is_empty()
            || self
                .custom_text
                .as_deref()
                .is_some_and(|text| !text.trim().is_empty())
    }
}

impl PendingQuestion {
    /// Whether the question set is still waiting for user input.
    pub fn is_pending(&self) -> bool {
        self.status == QuestionStatus::Pending
    }
}
