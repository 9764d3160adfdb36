//! The decider: pure mapping from `(Command, State)` to effect descriptions.
//!
//! `decide` performs no I/O and reads no clock; `now` is supplied by the
//! orchestrator and only flows into effect payloads. The returned effects
//! execute strictly in list order, so a span start always precedes the call
//! it wraps.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::metrics;
use crate::model::{
    has_converged, Command, Effect, LlmResponse, LogLevel, Phase, SessionState,
};
use crate::prompts::{
    phase_prompt, requirements_extraction_prompt, REQUIREMENTS_MAX_TOKENS, TURN_MAX_TOKENS,
};

/// How long `WaitForApproval` blocks before a checkpoint times out.
pub const APPROVAL_TIMEOUT_MS: u64 = 300_000;

/// Decide which effects a command requires against the current state.
pub fn decide(command: &Command, state: &SessionState, now: DateTime<Utc>) -> Vec<Effect> {
    match command {
        Command::Initialize { prompt } => initialize(state, prompt),
        Command::AdvancePhase => advance_phase(state),
        Command::StartTurn => start_turn(state),
        Command::ProcessLlmResponse { response } => process_llm_response(state, response),
        Command::RecordArtifact { path, .. } => record_artifact(state, path),
        Command::RecordTestResult { result } => record_test_result(state, result),
        Command::RecordTypeCheck { passed, errors } => {
            record_type_check(*passed, errors.as_deref())
        }
        Command::CompleteChecklistItem { item_id, .. } => complete_checklist_item(state, item_id),
        Command::RequestCheckpoint => request_checkpoint(state, now),
        Command::ApproveCheckpoint => resolve_checkpoint(state, true),
        Command::RejectCheckpoint { reason } => {
            let mut effects = resolve_checkpoint(state, false);
            if state.pending_checkpoint.is_some() {
                effects.insert(
                    0,
                    Effect::log(
                        LogLevel::Info,
                        format!("checkpoint rejected: {}", reason),
                    ),
                );
            }
            effects
        }
        Command::Timeout { phase } => vec![
            Effect::log(LogLevel::Error, format!("phase {} timed out", phase)),
            Effect::metric_with(
                metrics::PHASE_TIMEOUT,
                1.0,
                [("phase".to_string(), phase.to_string())],
            ),
        ],
        Command::Error {
            message,
            recoverable,
        } => vec![
            Effect::log(LogLevel::Error, format!("error: {}", message)),
            Effect::metric_with(
                metrics::ERRORS_TOTAL,
                1.0,
                [("recoverable".to_string(), recoverable.to_string())],
            ),
        ],
    }
}

fn initialize(state: &SessionState, prompt: &str) -> Vec<Effect> {
    if state.is_initialized() {
        return vec![Effect::log(
            LogLevel::Warn,
            "initialize ignored: session already initialized",
        )];
    }

    let mut attributes = HashMap::new();
    attributes.insert(
        "prompt_chars".to_string(),
        serde_json::Value::from(prompt.len()),
    );
    vec![
        Effect::log(LogLevel::Info, "initializing session"),
        Effect::StartSpan {
            name: "session".to_string(),
            attributes,
        },
        Effect::InvokeLlm {
            prompt: requirements_extraction_prompt(prompt),
            system_prompt: None,
            max_tokens: REQUIREMENTS_MAX_TOKENS,
            temperature: None,
        },
    ]
}

fn advance_phase(state: &SessionState) -> Vec<Effect> {
    if !state.phase_checklist_complete() {
        return vec![Effect::log(
            LogLevel::Warn,
            format!("cannot advance: {} checklist incomplete", state.phase),
        )];
    }
    let Some(next) = state.phase.next() else {
        return vec![Effect::log(
            LogLevel::Warn,
            "cannot advance: already at the terminal phase",
        )];
    };

    vec![
        Effect::metric_with(
            metrics::PHASE_COMPLETED,
            1.0,
            [("phase".to_string(), state.phase.to_string())],
        ),
        Effect::log(
            LogLevel::Info,
            format!("phase {} complete, advancing to {}", state.phase, next),
        ),
    ]
}

fn start_turn(state: &SessionState) -> Vec<Effect> {
    if has_converged(state.confidence.overall_score, state.convergence_streak) {
        return vec![Effect::log(
            LogLevel::Info,
            "session converged, no further turns",
        )];
    }

    match state.budget_for(state.phase) {
        Some(budget) if budget.is_exhausted() => vec![
            Effect::log(
                LogLevel::Warn,
                format!(
                    "turn budget exhausted for {} ({}/{})",
                    state.phase, budget.used_turns, budget.max_turns
                ),
            ),
            Effect::metric_with(
                metrics::BUDGET_EXHAUSTED,
                1.0,
                [("phase".to_string(), state.phase.to_string())],
            ),
        ],
        _ => {
            let mut attributes = HashMap::new();
            attributes.insert(
                "phase".to_string(),
                serde_json::Value::from(state.phase.to_string()),
            );
            attributes.insert("turn".to_string(), serde_json::Value::from(state.turn + 1));
            vec![
                Effect::StartSpan {
                    name: format!("turn.{}", state.turn + 1),
                    attributes,
                },
                Effect::log(
                    LogLevel::Info,
                    format!("starting turn {} in {}", state.turn + 1, state.phase),
                ),
                Effect::InvokeLlm {
                    prompt: phase_prompt(state),
                    system_prompt: None,
                    max_tokens: TURN_MAX_TOKENS,
                    temperature: None,
                },
            ]
        }
    }
}

fn process_llm_response(state: &SessionState, response: &LlmResponse) -> Vec<Effect> {
    let mut effects = vec![
        Effect::log(
            LogLevel::Info,
            format!(
                "processing response: {} tool uses, {} tokens",
                response.tool_uses.len(),
                response.tokens_used
            ),
        ),
        Effect::metric(metrics::TOKENS_USED, response.tokens_used as f64),
    ];

    for tool_use in &response.tool_uses {
        if tool_use.tool != "write_file" {
            continue;
        }
        // Malformed tool inputs are skipped, not surfaced.
        let (Some(path), Some(content)) = (
            tool_use.input.get("path").and_then(|v| v.as_str()),
            tool_use.input.get("content").and_then(|v| v.as_str()),
        ) else {
            continue;
        };
        effects.push(Effect::WriteFile {
            path: path.to_string(),
            content: content.to_string(),
        });
    }

    if matches!(state.phase, Phase::Implementation | Phase::Testing) {
        effects.push(Effect::RunTests {
            pattern: None,
            coverage: true,
        });
        effects.push(Effect::CheckTypes);
    }

    effects
}

fn record_artifact(state: &SessionState, path: &str) -> Vec<Effect> {
    if state.artifact_by_path(path).is_some() {
        vec![
            Effect::log(LogLevel::Info, format!("artifact updated: {}", path)),
            Effect::metric(metrics::ARTIFACT_UPDATED, 1.0),
        ]
    } else {
        vec![
            Effect::log(LogLevel::Info, format!("artifact created: {}", path)),
            Effect::metric(metrics::ARTIFACT_CREATED, 1.0),
        ]
    }
}

fn record_test_result(state: &SessionState, result: &crate::model::TestResult) -> Vec<Effect> {
    let level = if result.passed {
        LogLevel::Info
    } else {
        LogLevel::Warn
    };
    let mut effects = vec![
        Effect::log(
            level,
            format!(
                "tests: {}/{} passed",
                result.total - result.failed,
                result.total
            ),
        ),
        Effect::metric(metrics::TESTS_TOTAL, result.total as f64),
        Effect::metric(
            metrics::TESTS_PASSED,
            (result.total - result.failed) as f64,
        ),
        Effect::metric(metrics::TESTS_FAILED, result.failed as f64),
    ];
    if let Some(coverage) = result.coverage {
        effects.push(Effect::metric(metrics::COVERAGE, coverage));
    }

    let mut confidence = state.confidence.clone();
    confidence.tests_pass = result.passed;
    if let Some(coverage) = result.coverage {
        confidence.coverage = coverage;
    }
    confidence.rescore();
    effects.push(Effect::metric(metrics::CONFIDENCE, confidence.overall_score));

    effects
}

fn record_type_check(passed: bool, errors: Option<&[String]>) -> Vec<Effect> {
    let mut effects = Vec::new();
    if passed {
        effects.push(Effect::log(LogLevel::Info, "type check passed"));
    } else {
        effects.push(Effect::log(LogLevel::Warn, "type check failed"));
        for error in errors.unwrap_or_default().iter().take(5) {
            effects.push(Effect::log(LogLevel::Error, error.clone()));
        }
    }
    effects.push(Effect::metric(
        metrics::TYPE_CHECK_PASSED,
        if passed { 1.0 } else { 0.0 },
    ));
    effects
}

fn complete_checklist_item(state: &SessionState, item_id: &str) -> Vec<Effect> {
    match state.checklist.iter().find(|i| i.id == item_id) {
        None => vec![Effect::log(
            LogLevel::Warn,
            format!("unknown checklist item: {}", item_id),
        )],
        Some(item) if item.completed => vec![Effect::log(
            LogLevel::Info,
            format!("checklist item already completed: {}", item_id),
        )],
        Some(item) => vec![
            Effect::log(
                LogLevel::Info,
                format!("checklist item completed: {} ({})", item.id, item.description),
            ),
            Effect::metric(metrics::CHECKLIST_ITEM_COMPLETED, 1.0),
        ],
    }
}

fn request_checkpoint(state: &SessionState, now: DateTime<Utc>) -> Vec<Effect> {
    if state.pending_checkpoint.is_some() {
        return vec![Effect::log(
            LogLevel::Warn,
            "checkpoint request ignored: one is already pending",
        )];
    }

    let (completed_items, total_items) = state.checklist_progress();
    let summary = crate::model::CheckpointSummary {
        id: Uuid::new_v4().to_string(),
        phase: state.phase,
        turn: state.turn,
        completed_items,
        total_items,
        artifact_count: state.artifacts.len(),
        confidence_score: state.confidence.overall_score,
        created_at: now,
    };

    vec![
        Effect::log(
            LogLevel::Info,
            format!("requesting checkpoint {} at turn {}", summary.id, state.turn),
        ),
        Effect::EmitCheckpoint {
            summary: summary.clone(),
        },
        Effect::WaitForApproval {
            checkpoint_id: summary.id,
            timeout_ms: APPROVAL_TIMEOUT_MS,
        },
    ]
}

fn resolve_checkpoint(state: &SessionState, approved: bool) -> Vec<Effect> {
    let Some(pending) = &state.pending_checkpoint else {
        return vec![Effect::log(
            LogLevel::Warn,
            "no checkpoint is pending",
        )];
    };

    if approved {
        vec![
            Effect::log(
                LogLevel::Info,
                format!("checkpoint approved: {}", pending.id),
            ),
            Effect::metric(metrics::CHECKPOINT_APPROVED, 1.0),
        ]
    } else {
        vec![Effect::metric(metrics::CHECKPOINT_REJECTED, 1.0)]
    }
}
