//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by devflow and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all devflow metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Task state transitions, labeled by source and destination state.
pub static TRANSITIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Validation verdicts, labeled by validated stage and outcome (passed/rejected).
pub static VALIDATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Capability calls that exhausted backoff, labeled by stage and error kind.
pub static CAPABILITY_ERRORS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Decomposition cache lookups, labeled by result (hit/miss).
pub static CACHE_LOOKUPS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Tasks reaching a terminal state, labeled by outcome.
pub static TASKS_FINISHED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock duration of a stage run in seconds, labeled by stage.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of stage runs currently holding a concurrency slot.
pub static ACTIVE_STAGES: OnceLock<Gauge> = OnceLock::new();

/// Number of tasks waiting in a ready state.
pub static READY_QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls register into a fresh registry that is
/// then discarded, so they succeed without effect.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Lifecycle metrics
    let transitions_total = CounterVec::new(
        Opts::new("devflow_transitions_total", "Task state transitions"),
        &["from", "to"],
    )?;

    let tasks_finished_total = CounterVec::new(
        Opts::new(
            "devflow_tasks_finished_total",
            "Tasks reaching a terminal state",
        ),
        &["outcome"],
    )?;

    // Validation metrics
    let validations_total = CounterVec::new(
        Opts::new("devflow_validations_total", "Validation verdicts by outcome"),
        &["stage", "outcome"],
    )?;

    // Capability metrics
    let capability_errors_total = CounterVec::new(
        Opts::new(
            "devflow_capability_errors_total",
            "Capability calls that exhausted backoff",
        ),
        &["stage", "kind"],
    )?;

    let cache_lookups_total = CounterVec::new(
        Opts::new(
            "devflow_cache_lookups_total",
            "Decomposition cache lookups",
        ),
        &["result"],
    )?;

    let stage_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "devflow_stage_duration_seconds",
            "Stage run duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
        &["stage"],
    )?;

    // Scheduler metrics
    let active_stages = Gauge::new(
        "devflow_active_stages",
        "Stage runs currently holding a concurrency slot",
    )?;

    let ready_queue_depth = Gauge::new(
        "devflow_ready_queue_depth",
        "Tasks waiting in a ready state",
    )?;

    registry.register(Box::new(transitions_total.clone()))?;
    registry.register(Box::new(tasks_finished_total.clone()))?;
    registry.register(Box::new(validations_total.clone()))?;
    registry.register(Box::new(capability_errors_total.clone()))?;
    registry.register(Box::new(cache_lookups_total.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(active_stages.clone()))?;
    registry.register(Box::new(ready_queue_depth.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = TRANSITIONS_TOTAL.set(transitions_total);
    let _ = TASKS_FINISHED_TOTAL.set(tasks_finished_total);
    let _ = VALIDATIONS_TOTAL.set(validations_total);
    let _ = CAPABILITY_ERRORS_TOTAL.set(capability_errors_total);
    let _ = CACHE_LOOKUPS_TOTAL.set(cache_lookups_total);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = ACTIVE_STAGES.set(active_stages);
    let _ = READY_QUEUE_DEPTH.set(ready_queue_depth);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        init_metrics().unwrap();
        if let Some(transitions) = TRANSITIONS_TOTAL.get() {
            transitions.with_label_values(&["CREATED", "DECOMPOSING"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("devflow_transitions_total"));
    }
}
