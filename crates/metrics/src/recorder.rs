//! Metrics recorder initialization and textfile export.

use std::{fs, path::Path};

use tracing::info;

use crate::Result;

/// Handle to the metrics system, providing access to exported metrics.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format. Empty without the
    /// `prometheus` feature.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle.render()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,
    /// Global labels to add to all metrics
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system. Call once at startup.
///
/// Returns `None` when collection is disabled or the binary was built
/// without the `prometheus` feature; the facade macros are then no-ops.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(None);
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        info!("prometheus metrics recorder installed");
        Ok(Some(MetricsHandle {
            prometheus_handle: handle,
        }))
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!("metrics feature not enabled at compile time");
        Ok(None)
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use {
        crate::{buckets, scheduler},
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(scheduler::EXECUTION_DURATION_SECONDS.to_string()),
        &buckets::JOB_DURATION,
    )?;

    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    // install_recorder() only installs the global recorder; no HTTP listener.
    Ok(builder.install_recorder()?)
}

/// Write `contents` to `path` atomically (temp file + rename) so a textfile
/// collector never reads a half-written file.
pub fn write_textfile(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
