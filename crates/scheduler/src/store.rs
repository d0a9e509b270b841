//! Persistence trait for execution history.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use hunter_metrics::{counter, scheduler as sched_metrics};

use crate::{
    Result,
    types::{Completion, ExecutionFilter, ExecutionRecord, ExecutionStart, ExecutionSummary},
};

pub type ExecutionId = i64;

/// Message recorded on runs closed by [`ExecutionStore::mark_interrupted`].
pub const INTERRUPTED_MESSAGE: &str = "process exited before the run completed";

/// Backend for execution records.
///
/// Callers never let a store failure block a job run: the wrapper logs the
/// error and keeps going.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Open a `running` record and return its id.
    async fn start(&self, start: &ExecutionStart) -> Result<ExecutionId>;
    /// Apply the single terminal update to a running record.
    async fn complete(&self, id: ExecutionId, completion: &Completion) -> Result<()>;
    /// Newest first.
    async fn recent(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>>;
    /// Failed runs started at or after `since`, newest first.
    async fn failed_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionRecord>>;
    /// Aggregate over runs of `job_name` started at or after `since`.
    async fn summary(&self, job_name: &str, since: DateTime<Utc>) -> Result<ExecutionSummary>;
    /// Close every record still `running` that started before `before`.
    async fn mark_interrupted(&self, before: DateTime<Utc>) -> Result<u64>;
    /// Delete terminal records started before `before`.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64>;
}

/// Close runs left `running` by a previous process that exited mid-run.
///
/// Only records started before `before` (normally the current process's
/// start time) are touched, so runs of this process are never closed.
pub async fn reconcile_interrupted(
    store: &dyn ExecutionStore,
    before: DateTime<Utc>,
) -> Result<u64> {
    let closed = store.mark_interrupted(before).await?;
    if closed > 0 {
        warn!(closed, "closed execution records left running by a previous run");
        #[cfg(feature = "metrics")]
        counter!(sched_metrics::INTERRUPTED_TOTAL).increment(closed);
    } else {
        info!("no interrupted execution records");
    }
    Ok(closed)
}

/// Shallow-merge `patch` into `base` when both are objects; otherwise the
/// patch wins.
pub(crate) fn merge_metadata(
    base: Option<serde_json::Value>,
    patch: Option<&serde_json::Value>,
) -> Option<serde_json::Value> {
    match (base, patch) {
        (base, None) => base,
        (Some(serde_json::Value::Object(mut base)), Some(serde_json::Value::Object(patch))) => {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
            Some(serde_json::Value::Object(base))
        },
        (_, Some(patch)) => Some(patch.clone()),
    }
}
