//! The execution wrapper around a registered job.
//!
//! [`Supervised::run`] is the only place a job action is invoked. It applies,
//! in order: enabled check, dependency gate, overlap guard, start
//! notification, execution record, the action itself (panics included),
//! statistics, terminal record update and the completion notification.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    chrono::{DateTime, Utc},
    futures::FutureExt,
    serde::Serialize,
    serde_json::json,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use hunter_metrics::{counter, histogram, labels, scheduler as sched_metrics};

use crate::{
    clock::Clock,
    gate::{DependencyGate, GateDecision},
    job::JobSpec,
    notify::{Notifier, NotifyLevel, notify_best_effort},
    parse::format_duration,
    stats::JobStatistics,
    store::{ExecutionId, ExecutionStore},
    types::{Completion, ExecutionStart, ExecutionStatus},
};

/// Services and shared state every wrapper of one registry uses.
pub(crate) struct ExecutionContext {
    pub(crate) stats: Mutex<HashMap<String, JobStatistics>>,
    pub(crate) running: Mutex<HashSet<String>>,
    pub(crate) gate: DependencyGate,
    pub(crate) store: Arc<dyn ExecutionStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl ExecutionContext {
    pub(crate) fn stats_snapshot(&self) -> HashMap<String, JobStatistics> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_running(&self, name: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }
}

/// Why a run did not reach the action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    Dependencies { decision: GateDecision },
    AlreadyRunning,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Dependencies { .. } => "dependencies",
            Self::AlreadyRunning => "already_running",
        }
    }
}

/// Result of one call to [`Supervised::run`]. Failures of the action are
/// reported here and never propagated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Skipped {
        reason: SkipReason,
    },
    Succeeded {
        execution_id: Option<ExecutionId>,
        duration_seconds: f64,
    },
    Failed {
        execution_id: Option<ExecutionId>,
        duration_seconds: f64,
        error: String,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Removes the job from the running set when the run ends, panics included.
struct RunningGuard {
    ctx: Arc<ExecutionContext>,
    name: String,
}

impl RunningGuard {
    fn acquire(ctx: &Arc<ExecutionContext>, name: &str) -> Option<Self> {
        let inserted = ctx
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
        inserted.then(|| Self {
            ctx: Arc::clone(ctx),
            name: name.to_string(),
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.ctx
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
    }
}

/// A registered job bound to the registry's services. Cheap to clone.
#[derive(Clone)]
pub struct Supervised {
    spec: Arc<JobSpec>,
    enabled: Arc<AtomicBool>,
    ctx: Arc<ExecutionContext>,
}

impl Supervised {
    pub(crate) fn new(spec: JobSpec, enabled: bool, ctx: Arc<ExecutionContext>) -> Self {
        Self {
            spec: Arc::new(spec),
            enabled: Arc::new(AtomicBool::new(enabled)),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether a run of this job is currently in flight (tracked only for
    /// jobs that disallow overlap).
    pub fn is_running(&self) -> bool {
        self.ctx.is_running(&self.spec.name)
    }

    /// Run the job once through every guard.
    pub async fn run(&self) -> RunOutcome {
        self.run_with(false).await
    }

    /// Like [`Supervised::run`], but `force` bypasses the enabled check.
    /// Dependencies and the overlap guard still apply.
    pub async fn run_with(&self, force: bool) -> RunOutcome {
        let name = self.spec.name.as_str();

        if !force && !self.is_enabled() {
            debug!(job = name, "job disabled, skipping");
            return self.skipped(SkipReason::Disabled);
        }

        let decision = {
            let stats = self.ctx.stats.lock().unwrap_or_else(|e| e.into_inner());
            self.ctx
                .gate
                .evaluate(&self.spec.dependencies, &stats, self.ctx.clock.now())
        };
        if !decision.is_satisfied() {
            warn!(job = name, reason = %decision, "dependencies not satisfied, skipping");
            return self.skipped(SkipReason::Dependencies { decision });
        }

        let _guard = if self.spec.allow_overlap {
            None
        } else {
            match RunningGuard::acquire(&self.ctx, name) {
                Some(guard) => Some(guard),
                None => {
                    info!(job = name, "previous run still in flight, skipping");
                    return self.skipped(SkipReason::AlreadyRunning);
                },
            }
        };

        self.execute().await
    }

    fn skipped(&self, reason: SkipReason) -> RunOutcome {
        #[cfg(feature = "metrics")]
        counter!(
            sched_metrics::SKIPPED_TOTAL,
            labels::JOB => self.spec.name.clone(),
            labels::REASON => reason.as_str()
        )
        .increment(1);
        RunOutcome::Skipped { reason }
    }

    async fn execute(&self) -> RunOutcome {
        let spec = &self.spec;
        let ctx = &self.ctx;
        let name = spec.name.as_str();

        notify_best_effort(
            ctx.notifier.as_ref(),
            &format!("Starting: `{name}`"),
            NotifyLevel::Start,
        )
        .await;

        let started_at = ctx.clock.now();
        let execution_id = match ctx
            .store
            .start(&ExecutionStart {
                job_name: spec.name.clone(),
                category: spec.category,
                started_at,
                metadata: Some(spec.tracking_metadata()),
            })
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(job = name, error = %e, "failed to record execution start");
                #[cfg(feature = "metrics")]
                counter!(sched_metrics::STORE_ERRORS_TOTAL, labels::OPERATION => "start")
                    .increment(1);
                None
            },
        };

        info!(job = name, category = %spec.category, execution_id, "running job");
        #[cfg(feature = "metrics")]
        counter!(
            sched_metrics::EXECUTIONS_TOTAL,
            labels::JOB => spec.name.clone(),
            labels::CATEGORY => spec.category.as_str()
        )
        .increment(1);

        let timer = tokio::time::Instant::now();
        let action = Arc::clone(&spec.action);
        let result = AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await;
        let elapsed = timer.elapsed();
        let duration_seconds = elapsed.as_secs_f64();
        let finished_at = ctx.clock.now();

        #[cfg(feature = "metrics")]
        histogram!(sched_metrics::EXECUTION_DURATION_SECONDS, labels::JOB => spec.name.clone())
            .record(duration_seconds);

        let (completion, outcome) = match result {
            Ok(Ok(output)) => {
                ctx.stats
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .entry(spec.name.clone())
                    .or_default()
                    .record_success(finished_at, duration_seconds);
                (
                    Completion {
                        completed_at: finished_at,
                        status: ExecutionStatus::Success,
                        error_message: None,
                        error_detail: None,
                        duration_seconds,
                        metadata: output.map(|o| json!({ "output": o })),
                    },
                    RunOutcome::Succeeded {
                        execution_id,
                        duration_seconds,
                    },
                )
            },
            Ok(Err(err)) => self.failure(
                error_message(&err),
                format!("{err:?}"),
                finished_at,
                duration_seconds,
                execution_id,
            ),
            Err(payload) => {
                let message = format!("job panicked: {}", panic_message(payload.as_ref()));
                self.failure(
                    message.clone(),
                    message,
                    finished_at,
                    duration_seconds,
                    execution_id,
                )
            },
        };

        if let Some(id) = execution_id
            && let Err(e) = ctx.store.complete(id, &completion).await
        {
            warn!(
                job = name,
                execution_id = id,
                error = %e,
                "failed to record execution completion"
            );
            #[cfg(feature = "metrics")]
            counter!(sched_metrics::STORE_ERRORS_TOTAL, labels::OPERATION => "complete")
                .increment(1);
        }

        match &outcome {
            RunOutcome::Failed { error, .. } => {
                notify_best_effort(
                    ctx.notifier.as_ref(),
                    &format!("Failed: `{name}`\nError: {error}"),
                    NotifyLevel::Error,
                )
                .await;
            },
            _ => {
                info!(job = name, duration_seconds, "job completed");
                notify_best_effort(
                    ctx.notifier.as_ref(),
                    &format!(
                        "Completed: `{name}`\n⏱️ Duration: {}",
                        format_duration(elapsed)
                    ),
                    NotifyLevel::Complete,
                )
                .await;
            },
        }

        outcome
    }

    fn failure(
        &self,
        message: String,
        detail: String,
        finished_at: DateTime<Utc>,
        duration_seconds: f64,
        execution_id: Option<ExecutionId>,
    ) -> (Completion, RunOutcome) {
        error!(job = %self.spec.name, error = %message, "job failed");
        #[cfg(feature = "metrics")]
        counter!(
            sched_metrics::ERRORS_TOTAL,
            labels::JOB => self.spec.name.clone(),
            labels::CATEGORY => self.spec.category.as_str()
        )
        .increment(1);

        self.ctx
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(self.spec.name.clone())
            .or_default()
            .record_failure(finished_at, duration_seconds, message.clone());
        (
            Completion {
                completed_at: finished_at,
                status: ExecutionStatus::Failed,
                error_message: Some(message.clone()),
                error_detail: Some(detail),
                duration_seconds,
                metadata: None,
            },
            RunOutcome::Failed {
                execution_id,
                duration_seconds,
                error: message,
            },
        )
    }
}

impl std::fmt::Debug for Supervised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervised")
            .field("spec", &self.spec)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// First non-blank message in the error chain. Failed records always carry
/// one.
fn error_message(err: &anyhow::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .find(|msg| !msg.trim().is_empty())
        .unwrap_or_else(|| "job failed without an error message".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
