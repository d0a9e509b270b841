//! In-memory execution store for tests and ephemeral runs.

use std::sync::{
    Mutex,
    atomic::{AtomicI64, Ordering},
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Error, Result,
    stats::{round2, success_rate},
    store::{ExecutionId, ExecutionStore, INTERRUPTED_MESSAGE, merge_metadata},
    types::{
        Completion, ExecutionFilter, ExecutionRecord, ExecutionStart, ExecutionStatus,
        ExecutionSummary,
    },
};

/// Execution history kept in a `Vec`. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<ExecutionRecord>>,
    last_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in insertion order.
    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn newest_first(records: &mut [ExecutionRecord]) {
    records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn start(&self, start: &ExecutionStart) -> Result<ExecutionId> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(ExecutionRecord {
            id,
            job_name: start.job_name.clone(),
            category: start.category.as_str().to_string(),
            started_at: start.started_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            duration_seconds: None,
            error_message: None,
            error_detail: None,
            metadata: start.metadata.clone(),
        });
        Ok(id)
    }

    async fn complete(&self, id: ExecutionId, completion: &Completion) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::message(format!("execution not found: {id}")))?;
        record.completed_at = Some(completion.completed_at);
        record.status = completion.status;
        record.duration_seconds = Some(completion.duration_seconds);
        record.error_message = completion.error_message.clone();
        record.error_detail = completion.error_detail.clone();
        record.metadata = merge_metadata(record.metadata.take(), completion.metadata.as_ref());
        Ok(())
    }

    async fn recent(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>> {
        let mut matching: Vec<ExecutionRecord> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        newest_first(&mut matching);
        matching.truncate(filter.limit);
        Ok(matching)
    }

    async fn failed_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionRecord>> {
        let mut failed: Vec<ExecutionRecord> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.status == ExecutionStatus::Failed && r.started_at >= since)
            .cloned()
            .collect();
        newest_first(&mut failed);
        Ok(failed)
    }

    async fn summary(&self, job_name: &str, since: DateTime<Utc>) -> Result<ExecutionSummary> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let runs: Vec<&ExecutionRecord> = records
            .iter()
            .filter(|r| r.job_name == job_name && r.started_at >= since)
            .collect();
        let successful = runs
            .iter()
            .filter(|r| r.status == ExecutionStatus::Success)
            .count() as u64;
        let durations: Vec<f64> = runs.iter().filter_map(|r| r.duration_seconds).collect();
        let avg = (!durations.is_empty())
            .then(|| round2(durations.iter().sum::<f64>() / durations.len() as f64));
        Ok(ExecutionSummary {
            job_name: job_name.to_string(),
            total_runs: runs.len() as u64,
            successful_runs: successful,
            success_rate: success_rate(successful, runs.len() as u64),
            avg_duration: avg,
            max_duration: durations.iter().copied().reduce(f64::max),
            min_duration: durations.iter().copied().reduce(f64::min),
        })
    }

    async fn mark_interrupted(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut count = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.status == ExecutionStatus::Running && r.started_at < before)
        {
            record.status = ExecutionStatus::Interrupted;
            record.completed_at = Some(before);
            record.error_message = Some(INTERRUPTED_MESSAGE.to_string());
            count += 1;
        }
        Ok(count)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let len = records.len();
        records.retain(|r| !(r.status.is_terminal() && r.started_at < before));
        Ok((len - records.len()) as u64)
    }
}
