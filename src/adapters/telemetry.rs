//! Default telemetry adapter bridging onto `tracing`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::{LogLevel, SpanStatus};

use super::TelemetryAdapter;

/// Forwards spans, metrics, and logs to the `tracing` subscriber installed
/// by the host application. Span ids are process-local and monotonic.
#[derive(Debug, Default)]
pub struct TracingTelemetry {
    next_span_id: AtomicU64,
}

impl TracingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetryAdapter for TracingTelemetry {
    fn start_span(&self, name: &str, attributes: &HashMap<String, serde_json::Value>) -> u64 {
        let span_id = self.next_span_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(span_id, span = name, ?attributes, "span started");
        span_id
    }

    fn end_span(&self, span_id: u64, status: SpanStatus, error: Option<&str>) {
        match status {
            SpanStatus::Ok => tracing::debug!(span_id, "span ended"),
            SpanStatus::Error => {
                tracing::warn!(span_id, error = error.unwrap_or("unknown"), "span failed")
            }
        }
    }

    fn record_metric(&self, name: &str, value: f64, tags: &HashMap<String, String>) {
        tracing::debug!(metric = name, value, ?tags, "metric");
    }

    fn log(&self, level: LogLevel, message: &str, context: &HashMap<String, serde_json::Value>) {
        match level {
            LogLevel::Debug => tracing::debug!(?context, "{}", message),
            LogLevel::Info => tracing::info!(?context, "{}", message),
            LogLevel::Warn => tracing::warn!(?context, "{}", message),
            LogLevel::Error => tracing::error!(?context, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_ids_are_unique_and_monotonic() {
        let telemetry = TracingTelemetry::new();
        let attrs = HashMap::new();
        let a = telemetry.start_span("one", &attrs);
        let b = telemetry.start_span("two", &attrs);
        assert!(b > a);
    }
}
