//! The orchestrator: the outermost serial loop.
//!
//! One iteration cycles command → effects → results → events → persist.
//! The decider and evolver stay pure; everything impure flows through the
//! interpreter and the event store. Event append is the linearization
//! point: an effect whose result never became a persisted event is treated
//! as not having happened, which is what makes crash-resume by replay
//! correct.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::{
    AutoApprove, CheckpointAdapter, LlmAdapter, StaticTestRunner, TelemetryAdapter,
    TestRunnerAdapter, TracingTelemetry,
};
use crate::decide::decide;
use crate::error::{Error, Result};
use crate::evolve::{evolve, replay};
use crate::interpreter::EffectInterpreter;
use crate::metrics;
use crate::model::{
    has_converged, Artifact, Command, Confidence, Effect, EffectOutcome, Event, EventPayload,
    LlmResponse, LogLevel, Phase, SessionState, TurnBudget,
};
use crate::prompts::parse_checklist;
use crate::store::{SnapshotPolicy, SqliteEventStore};

const PROMPT_METADATA_KEY: &str = "prompt";

/// How often the loop requests a checkpoint, in turns.
const CHECKPOINT_EVERY_TURNS: u64 = 10;

/// Options for one session.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root owned by this session; file effects cannot escape it.
    pub work_dir: PathBuf,
    /// The original request driving the session.
    pub prompt: String,
    /// Global turn ceiling, the ultimate safety net.
    pub max_turns: u64,
    /// Event log location; `None` keeps the log in memory.
    pub db_path: Option<PathBuf>,
    /// When to materialize snapshots.
    pub snapshot_policy: SnapshotPolicy,
}

impl RunOptions {
    pub fn new(work_dir: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            prompt: prompt.into(),
            max_turns: 20_000,
            db_path: None,
            snapshot_policy: SnapshotPolicy::default(),
        }
    }

    pub fn with_max_turns(mut self, max_turns: u64) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }
}

/// Aggregated result of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub converged: bool,
    pub turns: u64,
    pub phase: Phase,
    pub final_score: f64,
    pub events_persisted: u64,
    pub artifacts: usize,
    pub errors: u64,
}

/// Invoked after every persisted event with the state that resulted.
pub type ProgressCallback = Box<dyn Fn(&SessionState, &Event) + Send + Sync>;

/// Builder wiring adapters into an [`Orchestrator`].
pub struct OrchestratorBuilder {
    options: RunOptions,
    llm: Option<Arc<dyn LlmAdapter>>,
    telemetry: Option<Arc<dyn TelemetryAdapter>>,
    runner: Option<Arc<dyn TestRunnerAdapter>>,
    checkpoint: Option<Arc<dyn CheckpointAdapter>>,
    on_progress: Option<ProgressCallback>,
}

impl OrchestratorBuilder {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            llm: None,
            telemetry: None,
            runner: None,
            checkpoint: None,
            on_progress: None,
        }
    }

    pub fn llm(mut self, llm: Arc<dyn LlmAdapter>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryAdapter>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn test_runner(mut self, runner: Arc<dyn TestRunnerAdapter>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn checkpoint(mut self, checkpoint: Arc<dyn CheckpointAdapter>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Open the event store, resume from the latest snapshot, and build
    /// the orchestrator. The LLM adapter is the one mandatory wiring.
    pub fn build(self) -> Result<Orchestrator> {
        let llm = self
            .llm
            .ok_or_else(|| Error::Config("an LLM adapter is required".into()))?;
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(TracingTelemetry::new()));
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(StaticTestRunner::passing(None)));
        let checkpoint = self.checkpoint.unwrap_or_else(|| Arc::new(AutoApprove));

        let store = Arc::new(match &self.options.db_path {
            Some(path) => SqliteEventStore::open(path)?,
            None => SqliteEventStore::in_memory()?,
        });

        let prompt = match store.get_metadata(PROMPT_METADATA_KEY)? {
            Some(stored) => stored,
            None => {
                store.set_metadata(PROMPT_METADATA_KEY, &self.options.prompt)?;
                self.options.prompt.clone()
            }
        };

        // Resume: latest snapshot plus the tail of the log. Only `evolve`
        // runs here; effects are never re-executed during replay.
        let (mut state, from) = match store.latest_snapshot()? {
            Some(snapshot) => (snapshot.state, snapshot.at_event_index + 1),
            None => (SessionState::initial(&prompt), 0),
        };
        let tail = store.get_events(Some(from), None)?;
        if !tail.is_empty() {
            state = replay(&tail, &state);
        }

        let interpreter = EffectInterpreter::new(
            self.options.work_dir.clone(),
            llm,
            Arc::clone(&telemetry),
            runner,
            checkpoint,
            Arc::clone(&store),
        );

        Ok(Orchestrator {
            state,
            options: self.options,
            store,
            interpreter,
            telemetry,
            on_progress: self.on_progress,
            events_persisted: 0,
            errors: 0,
        })
    }
}

/// Drives one session: owns the state, the log, and the adapters.
pub struct Orchestrator {
    state: SessionState,
    options: RunOptions,
    store: Arc<SqliteEventStore>,
    interpreter: EffectInterpreter,
    telemetry: Arc<dyn TelemetryAdapter>,
    on_progress: Option<ProgressCallback>,
    events_persisted: u64,
    errors: u64,
}

impl Orchestrator {
    /// Start building an orchestrator.
    pub fn builder(options: RunOptions) -> OrchestratorBuilder {
        OrchestratorBuilder::new(options)
    }

    /// The current state. Mutation happens only by event application.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The session's event store.
    pub fn store(&self) -> &SqliteEventStore {
        &self.store
    }

    /// Replace the confidence record wholesale, e.g. from an external
    /// quality signal the built-in adapters cannot observe.
    pub fn record_confidence(&mut self, confidence: Confidence) -> Result<()> {
        self.persist(EventPayload::ConfidenceUpdated { confidence })?;
        Ok(())
    }

    fn should_stop(&self) -> bool {
        has_converged(
            self.state.confidence.overall_score,
            self.state.convergence_streak,
        ) || self.state.converged
            || self.state.turn >= self.options.max_turns
    }

    /// Run the main loop until convergence, the global turn ceiling, or a
    /// phase budget that exhausts with work still open.
    pub async fn run(mut self) -> Result<(SessionState, RunSummary)> {
        tokio::fs::create_dir_all(&self.options.work_dir).await?;

        if self.state.turn == 0 {
            let prompt = self.state.prompt.clone();
            self.dispatch(Command::Initialize { prompt }).await?;
        }

        while !self.should_stop() {
            let outcome = self.dispatch(Command::StartTurn).await?;

            match outcome.llm_response {
                Some(response) => {
                    self.dispatch(Command::ProcessLlmResponse { response })
                        .await?;
                    let turn = self.state.turn;
                    self.persist(EventPayload::TurnCompleted { turn })?;
                }
                None => {
                    if self.state.converged
                        || has_converged(
                            self.state.confidence.overall_score,
                            self.state.convergence_streak,
                        )
                    {
                        break;
                    }
                    // Budget exhausted: advance if the checklist allows,
                    // otherwise the session halts here.
                    let before = self.state.phase;
                    if self.state.phase_checklist_complete() {
                        self.dispatch(Command::AdvancePhase).await?;
                        if self.state.phase != before {
                            continue;
                        }
                    }
                    break;
                }
            }

            if self.state.turn > 0 && self.state.turn % CHECKPOINT_EVERY_TURNS == 0 {
                self.dispatch(Command::RequestCheckpoint).await?;
            }

            if self.state.phase_checklist_complete() {
                self.dispatch(Command::AdvancePhase).await?;
            }
        }

        let summary = RunSummary {
            converged: self.state.converged
                || has_converged(
                    self.state.confidence.overall_score,
                    self.state.convergence_streak,
                ),
            turns: self.state.turn,
            phase: self.state.phase,
            final_score: self.state.confidence.overall_score,
            events_persisted: self.events_persisted,
            artifacts: self.state.artifacts.len(),
            errors: self.errors,
        };
        Ok((self.state, summary))
    }

    /// Process one command: decide, execute, derive events, persist.
    ///
    /// Adapter failures are contained here: they become an
    /// `ErrorOccurred` event and the remaining effects of this command are
    /// abandoned. Only unrecoverable store corruption propagates.
    pub async fn dispatch(&mut self, command: Command) -> Result<DispatchResult> {
        let now = Utc::now();
        let effects = decide(&command, &self.state, now);

        self.persist_command_events(&command, &effects)?;

        let mut outcome = DispatchResult::default();
        for effect in &effects {
            let executed = self.interpreter.execute(effect).await;
            let executed = match executed {
                Ok(executed) => executed,
                Err(e) if e.is_recoverable() => {
                    self.contain(&e)?;
                    break;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = self.persist_effect_events(&command, effect, &executed, &mut outcome) {
                if !e.is_recoverable() {
                    return Err(e);
                }
                self.contain(&e)?;
                break;
            }
        }

        Ok(outcome)
    }

    /// Events implied by the command itself, persisted before effects run
    /// so the log reflects the in-flight work across a crash.
    fn persist_command_events(&mut self, command: &Command, effects: &[Effect]) -> Result<()> {
        match command {
            Command::StartTurn => {
                if contains_llm_call(effects) {
                    let turn = self.state.turn + 1;
                    self.persist(EventPayload::TurnStarted { turn })?;
                } else if contains_metric(effects, metrics::BUDGET_EXHAUSTED) {
                    let phase = self.state.phase;
                    let turns_used = self
                        .state
                        .budget_for(phase)
                        .map(|b| b.used_turns)
                        .unwrap_or_default();
                    self.persist(EventPayload::BudgetExhausted { phase, turns_used })?;
                }
            }

            Command::AdvancePhase => {
                if contains_metric(effects, metrics::PHASE_COMPLETED) {
                    let phase = self.state.phase;
                    let turns_used = self
                        .state
                        .budget_for(phase)
                        .map(|b| b.used_turns)
                        .unwrap_or_default();
                    self.persist(EventPayload::PhaseCompleted { phase, turns_used })?;

                    let started = self.state.phase;
                    if started != phase {
                        let max_turns = self
                            .state
                            .budget_for(started)
                            .map(|b| b.max_turns)
                            .unwrap_or_default();
                        self.persist(EventPayload::PhaseStarted {
                            phase: started,
                            max_turns,
                        })?;
                    }
                }
            }

            Command::CompleteChecklistItem { item_id, evidence } => {
                if contains_metric(effects, metrics::CHECKLIST_ITEM_COMPLETED) {
                    self.persist(EventPayload::ChecklistItemCompleted {
                        item_id: item_id.clone(),
                        evidence: evidence.clone(),
                    })?;
                }
            }

            Command::RecordArtifact { path, hash } => {
                if contains_metric(effects, metrics::ARTIFACT_UPDATED) {
                    if let Some(existing) = self.state.artifact_by_path(path) {
                        let id = existing.id.clone();
                        self.persist(EventPayload::ArtifactUpdated {
                            id,
                            hash: hash.clone(),
                        })?;
                    }
                } else if contains_metric(effects, metrics::ARTIFACT_CREATED) {
                    let artifact = self.new_artifact(path, hash);
                    self.persist(EventPayload::ArtifactCreated { artifact })?;
                }
            }

            Command::RecordTestResult { result } => {
                self.persist(test_event(result))?;
            }

            Command::RecordTypeCheck { passed, errors } => {
                let payload = if *passed {
                    EventPayload::TypeCheckPassed
                } else {
                    EventPayload::TypeCheckFailed {
                        errors: errors.clone().unwrap_or_default(),
                    }
                };
                self.persist(payload)?;
            }

            Command::ApproveCheckpoint => {
                if contains_metric(effects, metrics::CHECKPOINT_APPROVED) {
                    if let Some(pending) = &self.state.pending_checkpoint {
                        let checkpoint_id = pending.id.clone();
                        self.persist(EventPayload::CheckpointApproved { checkpoint_id })?;
                    }
                }
            }

            Command::RejectCheckpoint { reason } => {
                if contains_metric(effects, metrics::CHECKPOINT_REJECTED) {
                    if let Some(pending) = &self.state.pending_checkpoint {
                        let checkpoint_id = pending.id.clone();
                        self.persist(EventPayload::CheckpointRejected {
                            checkpoint_id,
                            reason: reason.clone(),
                        })?;
                    }
                }
            }

            Command::Error {
                message,
                recoverable,
            } => {
                self.errors += 1;
                self.persist(EventPayload::ErrorOccurred {
                    message: message.clone(),
                    recoverable: *recoverable,
                })?;
            }

            // Their events are derived from effect results.
            Command::Initialize { .. }
            | Command::ProcessLlmResponse { .. }
            | Command::RequestCheckpoint
            | Command::Timeout { .. } => {}
        }
        Ok(())
    }

    /// Events derived from one `(effect, result, state)` triple.
    fn persist_effect_events(
        &mut self,
        command: &Command,
        effect: &Effect,
        executed: &EffectOutcome,
        outcome: &mut DispatchResult,
    ) -> Result<()> {
        match (effect, executed) {
            (Effect::InvokeLlm { .. }, EffectOutcome::LlmResponded { response }) => {
                if let Command::Initialize { prompt } = command {
                    let checklist = parse_checklist(&response.content);
                    self.persist(EventPayload::Initialized {
                        prompt: prompt.clone(),
                        checklist,
                        budgets: TurnBudget::defaults(),
                    })?;
                }
                outcome.llm_response = Some(response.clone());
            }

            (Effect::WriteFile { path, .. }, EffectOutcome::FileWritten { hash, .. }) => {
                if let Some(existing) = self.state.artifact_by_path(path) {
                    let id = existing.id.clone();
                    self.persist(EventPayload::ArtifactUpdated {
                        id,
                        hash: hash.clone(),
                    })?;
                } else {
                    let artifact = self.new_artifact(path, hash);
                    self.persist(EventPayload::ArtifactCreated { artifact })?;
                }
            }

            (Effect::RunTests { .. }, EffectOutcome::TestsRan { result }) => {
                self.persist(test_event(result))?;
            }

            (Effect::CheckTypes, EffectOutcome::TypesChecked { report }) => {
                let payload = if report.passed {
                    EventPayload::TypeCheckPassed
                } else {
                    EventPayload::TypeCheckFailed {
                        errors: report.errors.clone(),
                    }
                };
                self.persist(payload)?;
            }

            (Effect::EmitCheckpoint { summary }, EffectOutcome::CheckpointEmitted) => {
                self.persist(EventPayload::CheckpointCreated {
                    summary: summary.clone(),
                })?;
            }

            (
                Effect::WaitForApproval { checkpoint_id, .. },
                EffectOutcome::ApprovalResolved { decision },
            ) => {
                let payload = if decision.approved {
                    EventPayload::CheckpointApproved {
                        checkpoint_id: checkpoint_id.clone(),
                    }
                } else {
                    EventPayload::CheckpointRejected {
                        checkpoint_id: checkpoint_id.clone(),
                        reason: decision
                            .reason
                            .clone()
                            .unwrap_or_else(|| "rejected".to_string()),
                    }
                };
                self.persist(payload)?;
            }

            _ => {}
        }
        Ok(())
    }

    /// Stamp, apply, and append one event; snapshot per policy.
    fn persist(&mut self, payload: EventPayload) -> Result<()> {
        let event = Event::new(Utc::now(), payload);

        let was_converged = self.state.converged;
        self.state = evolve(&self.state, &event);

        let index = self.store.append_event(&event)?;
        self.events_persisted += 1;
        self.telemetry
            .record_metric(metrics::EVENTS_PERSISTED, 1.0, &HashMap::new());

        if self.options.snapshot_policy.should_snapshot(index, &event) {
            self.store.create_snapshot(&self.state, index)?;
        }

        if let Some(callback) = &self.on_progress {
            callback(&self.state, &event);
        }

        if !was_converged && self.state.converged {
            let score = self.state.confidence.overall_score;
            self.persist(EventPayload::ConvergenceReached { score })?;
        }
        Ok(())
    }

    /// Contain a recoverable adapter error: log it, count it, and persist
    /// an `ErrorOccurred` so a restart replays to the same position.
    fn contain(&mut self, error: &Error) -> Result<()> {
        self.errors += 1;
        self.telemetry.log(
            LogLevel::Error,
            &format!("effect execution failed: {}", error),
            &HashMap::new(),
        );
        self.telemetry.record_metric(
            metrics::ERRORS_TOTAL,
            1.0,
            &[("recoverable".to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        self.persist(EventPayload::ErrorOccurred {
            message: error.to_string(),
            recoverable: true,
        })
    }

    fn new_artifact(&self, path: &str, hash: &str) -> Artifact {
        let now = Utc::now();
        Artifact {
            id: Uuid::new_v4().to_string(),
            path: path.to_string(),
            hash: hash.to_string(),
            phase: self.state.phase,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Public view of a dispatch, handed back to callers.
#[derive(Debug, Default)]
pub struct DispatchResult {
    /// The response when this command triggered an LLM invocation.
    pub llm_response: Option<LlmResponse>,
}

fn contains_llm_call(effects: &[Effect]) -> bool {
    effects.iter().any(|e| matches!(e, Effect::InvokeLlm { .. }))
}

fn contains_metric(effects: &[Effect], metric: &str) -> bool {
    effects
        .iter()
        .any(|e| matches!(e, Effect::RecordMetric { name, .. } if name == metric))
}

fn test_event(result: &crate::model::TestResult) -> EventPayload {
    if result.passed {
        EventPayload::TestsPassed {
            total: result.total,
            coverage: result.coverage,
        }
    } else {
        EventPayload::TestsFailed {
            total: result.total,
            failed: result.failed,
            coverage: result.coverage,
        }
    }
}
