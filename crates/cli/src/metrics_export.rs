//! Periodic Prometheus textfile export.

use std::{path::PathBuf, time::Duration};

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use hunter_metrics::write_textfile;

/// Write `render()` to `path` every `every`, and once more on cancellation.
pub fn spawn_textfile_writer<F>(
    render: F,
    path: PathBuf,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    F: Fn() -> String + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let stop = tokio::select! {
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(every) => false,
            };
            match write_textfile(&path, &render()) {
                Ok(()) => debug!(path = %path.display(), "metrics textfile written"),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to write metrics textfile"
                ),
            }
            if stop {
                break;
            }
        }
    })
}
