//! Effect descriptions and their typed execution outcomes.
//!
//! The decider only ever *describes* side effects; the interpreter turns a
//! description into real I/O and answers with an [`EffectOutcome`]. Effects
//! returned from one `decide` call execute strictly in list order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::state::CheckpointSummary;

/// Canonical log levels emitted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Span completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// One tool invocation reported by the LLM adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Tool name, e.g. `write_file`
    pub tool: String,
    /// Tool input object
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Response from one LLM invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub tool_uses: Vec<ToolUse>,
    pub tokens_used: u64,
}

impl LlmResponse {
    /// Text-only response with an estimated token count (`ceil(len / 4)`).
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        let tokens_used = estimate_tokens(&content);
        Self {
            content,
            tool_uses: Vec::new(),
            tokens_used,
        }
    }
}

/// Fallback token estimate when the adapter reports none.
pub fn estimate_tokens(content: &str) -> u64 {
    content.len().div_ceil(4) as u64
}

/// Result of one test-runner invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub total: u32,
    pub failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

impl TestResult {
    /// An all-green run.
    pub fn passing(total: u32, coverage: Option<f64>) -> Self {
        Self {
            passed: true,
            total,
            failed: 0,
            coverage,
        }
    }

    /// A run with failures.
    pub fn failing(total: u32, failed: u32, coverage: Option<f64>) -> Self {
        Self {
            passed: false,
            total,
            failed,
            coverage,
        }
    }
}

/// Result of a type-check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeCheckReport {
    pub passed: bool,
    pub errors: Vec<String>,
}

/// Result of a schema validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Verdict from the external approver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A described, not-yet-executed side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    InvokeLlm {
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
        max_tokens: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ReadFile {
        path: String,
    },
    DeleteFile {
        path: String,
    },
    ListDirectory {
        path: String,
        #[serde(default)]
        recursive: bool,
    },
    RunTests {
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default)]
        coverage: bool,
    },
    CheckTypes,
    ValidateSchema {
        schema_path: String,
        data_path: String,
    },
    StartSpan {
        name: String,
        attributes: HashMap<String, Value>,
    },
    EndSpan {
        span_id: u64,
        status: SpanStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RecordMetric {
        name: String,
        value: f64,
        tags: HashMap<String, String>,
    },
    Log {
        level: LogLevel,
        message: String,
        context: HashMap<String, Value>,
    },
    EmitCheckpoint {
        summary: CheckpointSummary,
    },
    WaitForApproval {
        checkpoint_id: String,
        timeout_ms: u64,
    },
    PersistEvent {
        event: Box<crate::model::event::Event>,
    },
    CreateSnapshot {
        state: Box<super::state::SessionState>,
        at_event_index: i64,
    },
}

impl Effect {
    /// Snake_case tag used for span names and duration metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvokeLlm { .. } => "invoke_llm",
            Self::WriteFile { .. } => "write_file",
            Self::ReadFile { .. } => "read_file",
            Self::DeleteFile { .. } => "delete_file",
            Self::ListDirectory { .. } => "list_directory",
            Self::RunTests { .. } => "run_tests",
            Self::CheckTypes => "check_types",
            Self::ValidateSchema { .. } => "validate_schema",
            Self::StartSpan { .. } => "start_span",
            Self::EndSpan { .. } => "end_span",
            Self::RecordMetric { .. } => "record_metric",
            Self::Log { .. } => "log",
            Self::EmitCheckpoint { .. } => "emit_checkpoint",
            Self::WaitForApproval { .. } => "wait_for_approval",
            Self::PersistEvent { .. } => "persist_event",
            Self::CreateSnapshot { .. } => "create_snapshot",
        }
    }

    /// Shorthand for a log effect without extra context.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Shorthand for a metric effect.
    pub fn metric(name: impl Into<String>, value: f64) -> Self {
        Self::RecordMetric {
            name: name.into(),
            value,
            tags: HashMap::new(),
        }
    }

    /// Shorthand for a tagged metric effect.
    pub fn metric_with(
        name: impl Into<String>,
        value: f64,
        tags: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self::RecordMetric {
            name: name.into(),
            value,
            tags: tags.into_iter().collect(),
        }
    }
}

/// The typed answer produced by executing one effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EffectOutcome {
    LlmResponded {
        response: LlmResponse,
    },
    FileWritten {
        path: String,
        hash: String,
    },
    FileRead {
        path: String,
        content: String,
    },
    FileDeleted {
        path: String,
    },
    DirectoryListed {
        path: String,
        entries: Vec<String>,
    },
    TestsRan {
        result: TestResult,
    },
    TypesChecked {
        report: TypeCheckReport,
    },
    SchemaValidated {
        report: SchemaReport,
    },
    SpanStarted {
        span_id: u64,
    },
    SpanEnded,
    MetricRecorded,
    Logged,
    CheckpointEmitted,
    ApprovalResolved {
        decision: ApprovalDecision,
    },
    EventPersisted {
        index: i64,
    },
    SnapshotCreated {
        at_event_index: i64,
    },
}
