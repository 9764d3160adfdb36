//! Adapter stubs: scripted and fixed-outcome implementations used for
//! unattended runs and in tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::model::{
    ApprovalDecision, CheckpointSummary, LlmResponse, SchemaReport, TestResult, TypeCheckReport,
};

use super::{CheckpointAdapter, LlmAdapter, LlmRequest, TestRunnerAdapter};

/// Replays a fixed queue of responses; once the queue drains it answers
/// with an empty text response.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
}

impl ScriptedLlm {
    pub fn new(responses: impl IntoIterator<Item = LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    /// Queue another response.
    pub fn push(&self, response: LlmResponse) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlm {
    async fn invoke(&self, _request: LlmRequest) -> Result<LlmResponse> {
        let next = self
            .responses
            .lock()
            .map_err(|e| Error::Internal(format!("scripted queue poisoned: {}", e)))?
            .pop_front();
        Ok(next.unwrap_or_else(|| LlmResponse::text("")))
    }
}

/// Returns the same configured reports on every call.
#[derive(Debug, Clone)]
pub struct StaticTestRunner {
    pub tests: TestResult,
    pub types: TypeCheckReport,
    pub schema: SchemaReport,
}

impl StaticTestRunner {
    /// Everything green.
    pub fn passing(coverage: Option<f64>) -> Self {
        Self {
            tests: TestResult::passing(1, coverage),
            types: TypeCheckReport {
                passed: true,
                errors: Vec::new(),
            },
            schema: SchemaReport {
                valid: true,
                errors: Vec::new(),
            },
        }
    }

    /// A failing test run.
    pub fn failing(total: u32, failed: u32) -> Self {
        let mut runner = Self::passing(None);
        runner.tests = TestResult::failing(total, failed, None);
        runner
    }
}

#[async_trait]
impl TestRunnerAdapter for StaticTestRunner {
    async fn run_tests(&self, _pattern: Option<&str>, _coverage: bool) -> Result<TestResult> {
        Ok(self.tests.clone())
    }

    async fn check_types(&self) -> Result<TypeCheckReport> {
        Ok(self.types.clone())
    }

    async fn validate_schema(&self, _schema_path: &str, _data_path: &str) -> Result<SchemaReport> {
        Ok(self.schema.clone())
    }
}

/// Approves every checkpoint immediately. The default for unattended runs.
#[derive(Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl CheckpointAdapter for AutoApprove {
    async fn emit_checkpoint(&self, _summary: &CheckpointSummary) -> Result<()> {
        Ok(())
    }

    async fn wait_for_approval(&self, _checkpoint_id: &str) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision {
            approved: true,
            reason: None,
        })
    }
}

/// A checkpoint forwarded to an external consumer together with the
/// channel it must answer on.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub summary: CheckpointSummary,
    pub reply: oneshot::Sender<ApprovalDecision>,
}

/// Forwards each checkpoint to an `mpsc` consumer (a UI, a webhook bridge)
/// and waits for its verdict.
pub struct ChannelCheckpoint {
    tx: mpsc::Sender<ApprovalRequest>,
    emitted: Mutex<Option<CheckpointSummary>>,
}

impl ChannelCheckpoint {
    /// Returns the adapter and the receiving end the approver listens on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                emitted: Mutex::new(None),
            },
            rx,
        )
    }
}

#[async_trait]
impl CheckpointAdapter for ChannelCheckpoint {
    async fn emit_checkpoint(&self, summary: &CheckpointSummary) -> Result<()> {
        let mut emitted = self
            .emitted
            .lock()
            .map_err(|e| Error::Internal(format!("checkpoint slot poisoned: {}", e)))?;
        *emitted = Some(summary.clone());
        Ok(())
    }

    async fn wait_for_approval(&self, checkpoint_id: &str) -> Result<ApprovalDecision> {
        let summary = {
            let mut emitted = self
                .emitted
                .lock()
                .map_err(|e| Error::Internal(format!("checkpoint slot poisoned: {}", e)))?;
            emitted.take()
        };
        let summary = summary
            .filter(|s| s.id == checkpoint_id)
            .ok_or_else(|| Error::adapter(format!("checkpoint {} was never emitted", checkpoint_id)))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ApprovalRequest {
                summary,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::adapter("approver channel closed"))?;
        reply_rx
            .await
            .map_err(|_| Error::adapter("approver dropped the reply channel"))
    }
}
