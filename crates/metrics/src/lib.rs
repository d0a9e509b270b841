//! Metrics collection and export for hunter.
//!
//! Crates record through the `metrics` facade using the names in this crate.
//! With the `prometheus` feature the binary installs a Prometheus recorder
//! and periodically writes the rendered text to a file for a node-exporter
//! textfile collector.
//!
//! ```rust,ignore
//! use hunter_metrics::{counter, labels, scheduler};
//!
//! counter!(scheduler::EXECUTIONS_TOTAL, labels::JOB => "fetch_prices").increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics, write_textfile},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
