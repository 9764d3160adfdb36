//! Commands: intents handed to the decider.

use serde::{Deserialize, Serialize};

use super::effect::{LlmResponse, TestResult};
use super::phase::Phase;

/// An intent the orchestrator (or an external caller) wants acted on.
/// Commands never mutate state directly; the decider maps them to effects
/// and the orchestrator derives events from the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Start a fresh session from the original prompt.
    Initialize { prompt: String },
    /// Move to the next phase once the current checklist is done.
    AdvancePhase,
    /// Begin one generation turn.
    StartTurn,
    /// Feed an LLM response back through the decider.
    ProcessLlmResponse { response: LlmResponse },
    /// Record that a file landed in the work directory.
    RecordArtifact { path: String, hash: String },
    /// Record a test-runner result.
    RecordTestResult { result: TestResult },
    /// Record a type-check result.
    RecordTypeCheck {
        passed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        errors: Option<Vec<String>>,
    },
    /// Mark a checklist item as done.
    CompleteChecklistItem { item_id: String, evidence: String },
    /// Ask the external approver for a go/no-go.
    RequestCheckpoint,
    /// Approver accepted the pending checkpoint.
    ApproveCheckpoint,
    /// Approver declined the pending checkpoint.
    RejectCheckpoint { reason: String },
    /// A phase-level timeout elapsed.
    Timeout { phase: Phase },
    /// An error surfaced from outside the decider.
    Error { message: String, recoverable: bool },
}

impl Command {
    /// Snake_case tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::AdvancePhase => "advance_phase",
            Self::StartTurn => "start_turn",
            Self::ProcessLlmResponse { .. } => "process_llm_response",
            Self::RecordArtifact { .. } => "record_artifact",
            Self::RecordTestResult { .. } => "record_test_result",
            Self::RecordTypeCheck { .. } => "record_type_check",
            Self::CompleteChecklistItem { .. } => "complete_checklist_item",
            Self::RequestCheckpoint => "request_checkpoint",
            Self::ApproveCheckpoint => "approve_checkpoint",
            Self::RejectCheckpoint { .. } => "reject_checkpoint",
            Self::Timeout { .. } => "timeout",
            Self::Error { .. } => "error",
        }
    }
}
