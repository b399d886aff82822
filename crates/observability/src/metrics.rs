//! Task execution metrics.
//!
//! Every task execution reports one duration observation and, when it fails,
//! one failure count. Both are tagged by `task_type`.
//!
//! [`OtelTaskMetrics`] records to OpenTelemetry instruments obtained from the
//! global meter provider (a no-op until an exporter is installed).
//! [`InMemoryTaskMetrics`] keeps plain counters for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram};

/// Sink for task execution observations.
pub trait TaskMetrics: Send + Sync {
    /// One handler execution finished (successfully or not).
    fn record_execution(&self, task_type: &str, duration: Duration, succeeded: bool);

    /// One handler execution failed. `terminal` is true once retries are exhausted.
    fn record_failure(&self, task_type: &str, terminal: bool);
}

impl<M> TaskMetrics for Arc<M>
where
    M: TaskMetrics + ?Sized,
{
    fn record_execution(&self, task_type: &str, duration: Duration, succeeded: bool) {
        (**self).record_execution(task_type, duration, succeeded)
    }

    fn record_failure(&self, task_type: &str, terminal: bool) {
        (**self).record_failure(task_type, terminal)
    }
}

/// OpenTelemetry-backed task metrics.
///
/// Instruments:
/// - `printopt.tasks.executions.total` (counter; `task_type`, `result`)
/// - `printopt.tasks.duration` (histogram, ms; `task_type`, `result`)
/// - `printopt.tasks.failures.total` (counter; `task_type`, `terminal`)
#[derive(Debug, Clone)]
pub struct OtelTaskMetrics {
    executions: Counter<u64>,
    duration: Histogram<f64>,
    failures: Counter<u64>,
}

impl OtelTaskMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("printopt-tasks");
        Self {
            executions: meter
                .u64_counter("printopt.tasks.executions.total")
                .with_description("Total number of task handler executions")
                .build(),
            duration: meter
                .f64_histogram("printopt.tasks.duration")
                .with_description("Task handler execution duration")
                .with_unit("ms")
                .build(),
            failures: meter
                .u64_counter("printopt.tasks.failures.total")
                .with_description("Total number of failed task handler executions")
                .build(),
        }
    }
}

impl Default for OtelTaskMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn result_label(succeeded: bool) -> &'static str {
    if succeeded { "success" } else { "failure" }
}

impl TaskMetrics for OtelTaskMetrics {
    fn record_execution(&self, task_type: &str, duration: Duration, succeeded: bool) {
        let labels = [
            KeyValue::new("task_type", task_type.to_string()),
            KeyValue::new("result", result_label(succeeded)),
        ];
        self.executions.add(1, &labels);
        self.duration.record(duration.as_secs_f64() * 1000.0, &labels);
    }

    fn record_failure(&self, task_type: &str, terminal: bool) {
        self.failures.add(
            1,
            &[
                KeyValue::new("task_type", task_type.to_string()),
                KeyValue::new("terminal", terminal),
            ],
        );
    }
}

/// Per-task-type counters captured by [`InMemoryTaskMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskMetricsSnapshot {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub terminal_failures: u64,
    pub total_duration: Duration,
}

/// In-memory task metrics for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTaskMetrics {
    inner: Mutex<HashMap<String, TaskMetricsSnapshot>>,
}

impl InMemoryTaskMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, task_type: &str) -> TaskMetricsSnapshot {
        self.inner
            .lock()
            .map(|m| m.get(task_type).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl TaskMetrics for InMemoryTaskMetrics {
    fn record_execution(&self, task_type: &str, duration: Duration, succeeded: bool) {
        if let Ok(mut map) = self.inner.lock() {
            let entry = map.entry(task_type.to_string()).or_default();
            entry.executions += 1;
            entry.total_duration += duration;
            if succeeded {
                entry.successes += 1;
            }
        }
    }

    fn record_failure(&self, task_type: &str, terminal: bool) {
        if let Ok(mut map) = self.inner.lock() {
            let entry = map.entry(task_type.to_string()).or_default();
            entry.failures += 1;
            if terminal {
                entry.terminal_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_metrics_are_tagged_by_task_type() {
        let metrics = InMemoryTaskMetrics::new();
        metrics.record_execution("ai.tags", Duration::from_millis(5), true);
        metrics.record_execution("ai.tags", Duration::from_millis(7), false);
        metrics.record_failure("ai.tags", false);
        metrics.record_execution("emails.send_email", Duration::from_millis(1), true);

        let tags = metrics.snapshot("ai.tags");
        assert_eq!(tags.executions, 2);
        assert_eq!(tags.successes, 1);
        assert_eq!(tags.failures, 1);
        assert_eq!(tags.terminal_failures, 0);
        assert_eq!(tags.total_duration, Duration::from_millis(12));

        assert_eq!(metrics.snapshot("emails.send_email").executions, 1);
        assert_eq!(metrics.snapshot("unknown"), TaskMetricsSnapshot::default());
    }

    #[test]
    fn otel_metrics_without_provider_are_noops() {
        let metrics = OtelTaskMetrics::new();
        metrics.record_execution("ai.seo_title", Duration::from_millis(3), true);
        metrics.record_failure("ai.seo_title", true);
    }
}
