//! Events: immutable facts appended to the session log.
//!
//! The log is the canonical history; state is its fold. Every event carries
//! the timestamp assigned by the orchestrator at derivation time, so replay
//! never reads a clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::confidence::Confidence;
use super::phase::Phase;
use super::state::{Artifact, CheckpointSummary, ChecklistItem, TurnBudget};

/// A persisted fact: payload plus the wall-clock instant it was derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(at: DateTime<Utc>, payload: EventPayload) -> Self {
        Self { at, payload }
    }

    /// Snake_case tag stored in the log's `kind` column.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// What happened. One variant per fact the session can record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    Initialized {
        prompt: String,
        checklist: Vec<ChecklistItem>,
        budgets: Vec<TurnBudget>,
    },
    PhaseStarted {
        phase: Phase,
        max_turns: u32,
    },
    PhaseCompleted {
        phase: Phase,
        turns_used: u32,
    },
    TurnStarted {
        turn: u64,
    },
    TurnCompleted {
        turn: u64,
    },
    ArtifactCreated {
        artifact: Artifact,
    },
    ArtifactUpdated {
        id: String,
        hash: String,
    },
    ChecklistItemCompleted {
        item_id: String,
        evidence: String,
    },
    TestsPassed {
        total: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        coverage: Option<f64>,
    },
    TestsFailed {
        total: u32,
        failed: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        coverage: Option<f64>,
    },
    TypeCheckPassed,
    TypeCheckFailed {
        errors: Vec<String>,
    },
    ConfidenceUpdated {
        confidence: Confidence,
    },
    CheckpointCreated {
        summary: CheckpointSummary,
    },
    CheckpointApproved {
        checkpoint_id: String,
    },
    CheckpointRejected {
        checkpoint_id: String,
        reason: String,
    },
    ConvergenceReached {
        score: f64,
    },
    BudgetExhausted {
        phase: Phase,
        turns_used: u32,
    },
    ErrorOccurred {
        message: String,
        recoverable: bool,
    },
}

impl EventPayload {
    /// Snake_case tag for this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::PhaseStarted { .. } => "phase_started",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::TurnStarted { .. } => "turn_started",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::ArtifactCreated { .. } => "artifact_created",
            Self::ArtifactUpdated { .. } => "artifact_updated",
            Self::ChecklistItemCompleted { .. } => "checklist_item_completed",
            Self::TestsPassed { .. } => "tests_passed",
            Self::TestsFailed { .. } => "tests_failed",
            Self::TypeCheckPassed => "type_check_passed",
            Self::TypeCheckFailed { .. } => "type_check_failed",
            Self::ConfidenceUpdated { .. } => "confidence_updated",
            Self::CheckpointCreated { .. } => "checkpoint_created",
            Self::CheckpointApproved { .. } => "checkpoint_approved",
            Self::CheckpointRejected { .. } => "checkpoint_rejected",
            Self::ConvergenceReached { .. } => "convergence_reached",
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::ErrorOccurred { .. } => "error_occurred",
        }
    }
}
