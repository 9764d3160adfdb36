//! The effect interpreter: the impure layer that turns effect descriptions
//! into real I/O against the adapter interfaces.
//!
//! Every execution is wrapped in a telemetry span named `effect.<kind>` and
//! measured into `effect_duration_ms`. Batches run strictly sequentially;
//! the first failure aborts the batch and the error is surfaced to the
//! orchestrator, which contains it to the current command.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapters::{
    CheckpointAdapter, LlmAdapter, LlmRequest, TelemetryAdapter, TestRunnerAdapter,
};
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{ApprovalDecision, Effect, EffectOutcome, SpanStatus, TestResult};
use crate::store::SqliteEventStore;

/// Executes effects one at a time against the session's adapters.
pub struct EffectInterpreter {
    work_dir: PathBuf,
    llm: Arc<dyn LlmAdapter>,
    telemetry: Arc<dyn TelemetryAdapter>,
    runner: Arc<dyn TestRunnerAdapter>,
    checkpoint: Arc<dyn CheckpointAdapter>,
    store: Arc<SqliteEventStore>,
}

impl EffectInterpreter {
    pub fn new(
        work_dir: PathBuf,
        llm: Arc<dyn LlmAdapter>,
        telemetry: Arc<dyn TelemetryAdapter>,
        runner: Arc<dyn TestRunnerAdapter>,
        checkpoint: Arc<dyn CheckpointAdapter>,
        store: Arc<SqliteEventStore>,
    ) -> Self {
        Self {
            work_dir,
            llm,
            telemetry,
            runner,
            checkpoint,
            store,
        }
    }

    /// Execute one effect, spanned and measured.
    pub async fn execute(&self, effect: &Effect) -> Result<EffectOutcome> {
        let span_name = format!("effect.{}", effect.kind());
        let span_id = self.telemetry.start_span(&span_name, &HashMap::new());
        let started = Instant::now();

        let result = self.execute_inner(effect).await;

        let duration_ms = started.elapsed().as_millis() as f64;
        let status = if result.is_ok() { "success" } else { "error" };
        let mut tags = HashMap::new();
        tags.insert("effect".to_string(), effect.kind().to_string());
        tags.insert("status".to_string(), status.to_string());
        self.telemetry
            .record_metric(metrics::EFFECT_DURATION_MS, duration_ms, &tags);

        match &result {
            Ok(_) => self.telemetry.end_span(span_id, SpanStatus::Ok, None),
            Err(e) => self
                .telemetry
                .end_span(span_id, SpanStatus::Error, Some(&e.to_string())),
        }

        result
    }

    /// Execute a batch strictly in order; the first failure aborts it.
    pub async fn execute_all(&self, effects: &[Effect]) -> Result<Vec<EffectOutcome>> {
        let mut outcomes = Vec::with_capacity(effects.len());
        for effect in effects {
            outcomes.push(self.execute(effect).await?);
        }
        Ok(outcomes)
    }

    async fn execute_inner(&self, effect: &Effect) -> Result<EffectOutcome> {
        match effect {
            Effect::InvokeLlm {
                prompt,
                system_prompt,
                max_tokens,
                temperature,
            } => {
                let response = self
                    .llm
                    .invoke(LlmRequest {
                        prompt: prompt.clone(),
                        system_prompt: system_prompt.clone(),
                        max_tokens: *max_tokens,
                        temperature: *temperature,
                    })
                    .await?;
                Ok(EffectOutcome::LlmResponded { response })
            }

            Effect::WriteFile { path, content } => {
                let resolved = self.resolve(path)?;
                if let Some(parent) = resolved.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&resolved, content.as_bytes()).await?;
                Ok(EffectOutcome::FileWritten {
                    path: path.clone(),
                    hash: sha256_hex(content),
                })
            }

            Effect::ReadFile { path } => {
                let resolved = self.resolve(path)?;
                let content = tokio::fs::read_to_string(&resolved).await?;
                Ok(EffectOutcome::FileRead {
                    path: path.clone(),
                    content,
                })
            }

            Effect::DeleteFile { path } => {
                let resolved = self.resolve(path)?;
                tokio::fs::remove_file(&resolved).await?;
                Ok(EffectOutcome::FileDeleted { path: path.clone() })
            }

            Effect::ListDirectory { path, recursive } => {
                let resolved = self.resolve(path)?;
                let entries = list_directory(&resolved, *recursive).await?;
                Ok(EffectOutcome::DirectoryListed {
                    path: path.clone(),
                    entries,
                })
            }

            Effect::RunTests { pattern, coverage } => {
                let result = self.runner.run_tests(pattern.as_deref(), *coverage).await?;
                self.record_test_metrics(&result);
                Ok(EffectOutcome::TestsRan { result })
            }

            Effect::CheckTypes => {
                let report = self.runner.check_types().await?;
                Ok(EffectOutcome::TypesChecked { report })
            }

            Effect::ValidateSchema {
                schema_path,
                data_path,
            } => {
                let report = self.runner.validate_schema(schema_path, data_path).await?;
                Ok(EffectOutcome::SchemaValidated { report })
            }

            Effect::StartSpan { name, attributes } => {
                let span_id = self.telemetry.start_span(name, attributes);
                Ok(EffectOutcome::SpanStarted { span_id })
            }

            Effect::EndSpan {
                span_id,
                status,
                error,
            } => {
                self.telemetry.end_span(*span_id, *status, error.as_deref());
                Ok(EffectOutcome::SpanEnded)
            }

            Effect::RecordMetric { name, value, tags } => {
                self.telemetry.record_metric(name, *value, tags);
                Ok(EffectOutcome::MetricRecorded)
            }

            Effect::Log {
                level,
                message,
                context,
            } => {
                self.telemetry.log(*level, message, context);
                Ok(EffectOutcome::Logged)
            }

            Effect::EmitCheckpoint { summary } => {
                self.checkpoint.emit_checkpoint(summary).await?;
                Ok(EffectOutcome::CheckpointEmitted)
            }

            Effect::WaitForApproval {
                checkpoint_id,
                timeout_ms,
            } => {
                let wait = self.checkpoint.wait_for_approval(checkpoint_id);
                let decision =
                    match tokio::time::timeout(Duration::from_millis(*timeout_ms), wait).await {
                        Ok(decision) => decision?,
                        // Timeout is a rejection, not an error.
                        Err(_) => ApprovalDecision {
                            approved: false,
                            reason: Some("timeout".to_string()),
                        },
                    };
                Ok(EffectOutcome::ApprovalResolved { decision })
            }

            Effect::PersistEvent { event } => {
                let index = self.store.append_event(event)?;
                Ok(EffectOutcome::EventPersisted { index })
            }

            Effect::CreateSnapshot {
                state,
                at_event_index,
            } => {
                self.store.create_snapshot(state, *at_event_index)?;
                Ok(EffectOutcome::SnapshotCreated {
                    at_event_index: *at_event_index,
                })
            }
        }
    }

    fn record_test_metrics(&self, result: &TestResult) {
        let tags = HashMap::new();
        self.telemetry
            .record_metric(metrics::TESTS_TOTAL, result.total as f64, &tags);
        self.telemetry.record_metric(
            metrics::TESTS_PASSED,
            (result.total - result.failed) as f64,
            &tags,
        );
        self.telemetry
            .record_metric(metrics::TESTS_FAILED, result.failed as f64, &tags);
        if let Some(coverage) = result.coverage {
            self.telemetry
                .record_metric(metrics::COVERAGE, coverage, &tags);
        }
    }

    /// Resolve a session-relative path, refusing anything that would land
    /// outside the work directory.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Err(Error::PathEscape {
                path: path.to_string(),
            });
        }
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::PathEscape {
                        path: path.to_string(),
                    })
                }
            }
        }
        Ok(self.work_dir.join(candidate))
    }
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn list_directory(root: &Path, recursive: bool) -> Result<Vec<String>> {
    let mut pending = vec![root.to_path_buf()];
    let mut entries = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut reader = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map_err(|e| Error::Internal(format!("path outside listing root: {}", e)))?
                .to_string_lossy()
                .into_owned();
            if entry.file_type().await?.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else {
                entries.push(relative);
            }
        }
    }

    entries.sort();
    Ok(entries)
}
