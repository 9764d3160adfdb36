//! Typed algebras of the functional core: state, commands, events, effects,
//! and the confidence arithmetic that drives convergence.

pub mod command;
pub mod confidence;
pub mod effect;
pub mod event;
pub mod phase;
pub mod state;

pub use command::Command;
pub use confidence::{
    has_converged, overall_score, Confidence, CONVERGENCE_SCORE_THRESHOLD,
    CONVERGENCE_STREAK_THRESHOLD,
};
pub use effect::{
    estimate_tokens, ApprovalDecision, Effect, EffectOutcome, LlmResponse, LogLevel, SchemaReport,
    SpanStatus, TestResult, ToolUse, TypeCheckReport,
};
pub use event::{Event, EventPayload};
pub use phase::Phase;
pub use state::{Artifact, CheckpointSummary, ChecklistItem, SessionState, TurnBudget};
