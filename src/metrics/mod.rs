//! Metrics module for Prometheus-based monitoring.
//!
//! Counters and gauges for task transitions, validation verdicts, capability
//! errors, cache lookups and stage durations.
//!
//! # Example
//!
//! ```ignore
//! use devflow::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_cache_lookup(true);
//!
//! // Export metrics in Prometheus text format
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};
