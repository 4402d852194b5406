//! Debug/usage telemetry types.
//!
//! Telemetry is derived, read-only data attached to an assistant turn or
//! accumulated at session scope. It is observational only and never feeds
//! back into controller decisions.

use serde::{Deserialize, Serialize};

/// Token counters reported by the model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Adds another usage report into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A completed tool invocation observed during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Provider-assigned call identifier
    pub call_id: String,
    /// Tool name
    pub name: String,
    /// Raw JSON arguments the tool was called with
    pub arguments: Option<serde_json::Value>,
    /// Raw tool result, if captured
    pub result: Option<String>,
    /// Wall-clock duration of the call
    pub duration_ms: Option<u64>,
    /// Error message if the call failed
    pub error: Option<String>,
}

/// Debug trace attached to a single assistant turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DebugTrace {
    /// Tool calls made while generating the turn, in execution order
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Token usage for the turn, if reported
    pub usage: Option<TokenUsage>,
}

/// Telemetry accumulated across a whole session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionDebugUsage {
    /// Summed token usage across all turns
    pub usage: TokenUsage,
    /// Total number of tool calls observed
    pub tool_call_count: u64,
}

impl SessionDebugUsage {
    /// Folds a per-turn usage report into the session totals.
    pub fn record_usage(&mut self, usage: &TokenUsage) {
        self.usage.accumulate(usage);
    }

    /// Counts one observed tool call.
    pub fn record_tool_call(&mut self) {
        self.tool_call_count += 1;
    }
}
