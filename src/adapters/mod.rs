//! Adapter interfaces the core consumes, and the implementations shipped
//! with the crate.
//!
//! The interpreter only ever talks to these traits; swapping a production
//! adapter for a test double never touches the functional core.

pub mod anthropic;
pub mod stubs;
pub mod telemetry;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::{
    ApprovalDecision, CheckpointSummary, LlmResponse, LogLevel, SchemaReport, SpanStatus,
    TestResult, TypeCheckReport,
};

pub use anthropic::{AnthropicConfig, AnthropicLlm};
pub use stubs::{AutoApprove, ChannelCheckpoint, ScriptedLlm, StaticTestRunner};
pub use telemetry::TracingTelemetry;

/// One LLM invocation as the core describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

/// Driver for the external LLM agent.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Run one completion. The returned token count is authoritative when
    /// the backend reports one; otherwise implementations estimate
    /// `ceil(len / 4)`.
    async fn invoke(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Narrow logging/metrics surface the core emits into.
pub trait TelemetryAdapter: Send + Sync {
    /// Open a span and return its opaque id.
    fn start_span(&self, name: &str, attributes: &HashMap<String, serde_json::Value>) -> u64;

    /// Close a span.
    fn end_span(&self, span_id: u64, status: SpanStatus, error: Option<&str>);

    /// Record one metric sample.
    fn record_metric(&self, name: &str, value: f64, tags: &HashMap<String, String>);

    /// Emit one structured log record.
    fn log(&self, level: LogLevel, message: &str, context: &HashMap<String, serde_json::Value>);
}

/// Rendezvous with the external approver.
#[async_trait]
pub trait CheckpointAdapter: Send + Sync {
    /// Make the summary externally visible (UI, webhook, queue).
    async fn emit_checkpoint(&self, summary: &CheckpointSummary) -> Result<()>;

    /// Block until the approver answers. The interpreter enforces the
    /// timeout around this call; implementations need not.
    async fn wait_for_approval(&self, checkpoint_id: &str) -> Result<ApprovalDecision>;
}

/// Test runner, type checker, and schema validator in one seam.
#[async_trait]
pub trait TestRunnerAdapter: Send + Sync {
    async fn run_tests(&self, pattern: Option<&str>, coverage: bool) -> Result<TestResult>;

    async fn check_types(&self) -> Result<TypeCheckReport>;

    async fn validate_schema(&self, schema_path: &str, data_path: &str) -> Result<SchemaReport>;
}
