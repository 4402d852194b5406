//! Session controller for the embeddable BI chat widget.
//!
//! This crate turns a stream of server-sent chunks into an ordered, mutable
//! list of conversation turns, manages a send/queue/retry pipeline for
//! outgoing messages, tracks a single in-flight clarifying question, and
//! reconciles debug/usage telemetry and artifact signals that arrive out of
//! band.
//!
//! # Module Structure
//!
//! - `controller`: The orchestrating `SessionController`
//! - `turn_store`: Ordered turn list plus the transient streaming buffer
//! - `outbound_queue`: FIFO holding area for messages submitted while busy
//! - `pending_question`: Single-slot tracker for the active HITL question
//! - `rate_limiter`: Fixed-window send gate
//! - `view`: Snapshot view-model consumed by the presentation layer

mod controller;
mod outbound_queue;
mod pending_question;
mod rate_limiter;
mod turn_store;
mod view;

// Re-export public API
pub use controller::{ChatStatus, SendOutcome, SessionController, SessionControllerBuilder};
pub use outbound_queue::{OutboundQueue, QueuedMessage};
pub use pending_question::PendingQuestionTracker;
pub use rate_limiter::RateLimiter;
pub use turn_store::TurnStore;
pub use view::{ArtifactPanel, ChatView};
