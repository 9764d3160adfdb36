//! Session state aggregate and its constituent records.
//!
//! The event log owns the canonical history; a `SessionState` is always a
//! derivation of it and can be rebuilt by replay. The orchestrator holds
//! exactly one value at a time and mutates by replacement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::confidence::Confidence;
use super::phase::Phase;

/// A single requirement extracted during initialization. Completion is
/// monotonic: once completed an item never reverts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub phase: Phase,
    pub description: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ChecklistItem {
    /// Create an incomplete item.
    pub fn new(id: impl Into<String>, phase: Phase, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase,
            description: description.into(),
            completed: false,
            evidence: None,
            completed_at: None,
        }
    }
}

/// A file produced by the session, identified by its path within the
/// work directory. The hash is updated on rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub path: String,
    /// SHA-256 of the content, hex-encoded
    pub hash: String,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-phase turn allowance. `used_turns <= max_turns` always holds;
/// equality is budget exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnBudget {
    pub phase: Phase,
    pub max_turns: u32,
    pub used_turns: u32,
}

impl TurnBudget {
    pub fn new(phase: Phase, max_turns: u32) -> Self {
        Self {
            phase,
            max_turns,
            used_turns: 0,
        }
    }

    /// Default allowance for every phase, in workflow order.
    pub fn defaults() -> Vec<TurnBudget> {
        [
            (Phase::Requirements, 10),
            (Phase::Design, 15),
            (Phase::Implementation, 40),
            (Phase::Testing, 30),
            (Phase::Documentation, 10),
            (Phase::Verification, 15),
        ]
        .into_iter()
        .map(|(phase, max)| TurnBudget::new(phase, max))
        .collect()
    }

    /// Whether the allowance is used up.
    pub fn is_exhausted(&self) -> bool {
        self.used_turns >= self.max_turns
    }
}

/// Progress digest handed to the external approver at a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub phase: Phase,
    pub turn: u64,
    pub completed_items: usize,
    pub total_items: usize,
    pub artifact_count: usize,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
}

/// The full session aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    pub turn: u64,
    pub prompt: String,
    pub checklist: Vec<ChecklistItem>,
    pub artifacts: Vec<Artifact>,
    pub budgets: Vec<TurnBudget>,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_checkpoint: Option<CheckpointSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_approved_checkpoint: Option<CheckpointSummary>,
    pub convergence_streak: u32,
    pub converged: bool,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionState {
    /// A fresh, pre-`Initialized` state. Timestamps are pinned to the Unix
    /// epoch so replay from this state is reproducible; the `Initialized`
    /// event stamps the real start time.
    pub fn initial(prompt: impl Into<String>) -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            phase: Phase::Requirements,
            turn: 0,
            prompt: prompt.into(),
            checklist: Vec::new(),
            artifacts: Vec::new(),
            budgets: TurnBudget::defaults(),
            confidence: Confidence::default(),
            pending_checkpoint: None,
            last_approved_checkpoint: None,
            convergence_streak: 0,
            converged: false,
            started_at: epoch,
            last_activity_at: epoch,
        }
    }

    /// Whether `Initialize` has already been processed.
    pub fn is_initialized(&self) -> bool {
        self.turn > 0 || !self.checklist.is_empty()
    }

    /// The budget entry for a phase. Every phase has exactly one entry.
    pub fn budget_for(&self, phase: Phase) -> Option<&TurnBudget> {
        self.budgets.iter().find(|b| b.phase == phase)
    }

    /// Checklist items owned by a phase.
    pub fn checklist_for(&self, phase: Phase) -> impl Iterator<Item = &ChecklistItem> {
        self.checklist.iter().filter(move |i| i.phase == phase)
    }

    /// `(completed, total)` across the whole checklist.
    pub fn checklist_progress(&self) -> (usize, usize) {
        let total = self.checklist.len();
        let completed = self.checklist.iter().filter(|i| i.completed).count();
        (completed, total)
    }

    /// Whether the current phase has items and all of them are completed.
    pub fn phase_checklist_complete(&self) -> bool {
        let mut items = self.checklist_for(self.phase).peekable();
        items.peek().is_some() && items.all(|i| i.completed)
    }

    /// Look up an artifact by its session-relative path.
    pub fn artifact_by_path(&self, path: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    /// Artifacts produced during a given phase.
    pub fn artifacts_for(&self, phase: Phase) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.phase == phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_shape() {
        let state = SessionState::initial("build a parser");
        assert_eq!(state.phase, Phase::Requirements);
        assert_eq!(state.turn, 0);
        assert_eq!(state.budgets.len(), 6);
        assert!(!state.is_initialized());
        assert!(!state.converged);
    }

    #[test]
    fn test_initial_state_is_reproducible() {
        let a = SessionState::initial("p");
        let b = SessionState::initial("p");
        assert_eq!(a, b);
    }

    #[test]
    fn test_default_budgets_cover_every_phase_once() {
        let budgets = TurnBudget::defaults();
        for phase in Phase::ORDER {
            assert_eq!(budgets.iter().filter(|b| b.phase == phase).count(), 1);
        }
    }

    #[test]
    fn test_phase_checklist_complete_requires_items() {
        let mut state = SessionState::initial("p");
        assert!(!state.phase_checklist_complete());

        state
            .checklist
            .push(ChecklistItem::new("r1", Phase::Requirements, "list inputs"));
        assert!(!state.phase_checklist_complete());

        state.checklist[0].completed = true;
        assert!(state.phase_checklist_complete());
    }

    #[test]
    fn test_budget_exhaustion_at_equality() {
        let mut budget = TurnBudget::new(Phase::Design, 2);
        assert!(!budget.is_exhausted());
        budget.used_turns = 2;
        assert!(budget.is_exhausted());
    }
}
