//! # spindle-core
//!
//! An autonomous generation orchestrator built as a Functional-Core /
//! Imperative-Shell state machine: pure `decide` and `evolve` functions, an
//! effect interpreter over adapter traits, and an append-only event log
//! with snapshots that makes every session resumable by replay.
//!
//! ## Core Components
//!
//! - **Model**: state, command, event, and effect algebras plus the
//!   confidence arithmetic that drives convergence
//! - **Decider / Evolver**: the pure functional core
//! - **Interpreter**: executes effect descriptions against adapters
//! - **Store**: durable, ordered persistence with snapshot-bounded replay
//! - **Orchestrator**: the serial loop with budget and checkpoint
//!   supervision
//!
//! ## Example
//!
//! ```rust,ignore
//! use spindle_core::{Orchestrator, RunOptions};
//! use spindle_core::adapters::{AnthropicConfig, AnthropicLlm};
//! use std::sync::Arc;
//!
//! let llm = AnthropicLlm::new(AnthropicConfig::new(api_key))?;
//! let orchestrator = Orchestrator::builder(
//!     RunOptions::new("./session", "build a todo API")
//!         .with_db_path("./session/events.db"),
//! )
//! .llm(Arc::new(llm))
//! .build()?;
//!
//! let (state, summary) = orchestrator.run().await?;
//! println!("converged: {} after {} turns", summary.converged, summary.turns);
//! ```

pub mod adapters;
pub mod decide;
pub mod error;
pub mod evolve;
pub mod interpreter;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod prompts;
pub mod store;

// Re-exports for convenience
pub use adapters::{
    AnthropicConfig, AnthropicLlm, AutoApprove, ChannelCheckpoint, CheckpointAdapter, LlmAdapter,
    LlmRequest, ScriptedLlm, StaticTestRunner, TelemetryAdapter, TestRunnerAdapter,
    TracingTelemetry,
};
pub use decide::{decide, APPROVAL_TIMEOUT_MS};
pub use error::{Error, Result};
pub use evolve::{evolve, replay, replay_until};
pub use interpreter::EffectInterpreter;
pub use model::{
    estimate_tokens, has_converged, overall_score, ApprovalDecision, Artifact, CheckpointSummary,
    ChecklistItem, Command, Confidence, Effect, EffectOutcome, Event, EventPayload, LlmResponse,
    LogLevel, Phase, SchemaReport, SessionState, SpanStatus, TestResult, ToolUse, TurnBudget,
    TypeCheckReport,
};
pub use orchestrator::{
    DispatchResult, Orchestrator, OrchestratorBuilder, ProgressCallback, RunOptions, RunSummary,
};
pub use prompts::{parse_checklist, phase_prompt, requirements_extraction_prompt};
pub use store::{Snapshot, SnapshotPolicy, SqliteEventStore, StoreStats};
