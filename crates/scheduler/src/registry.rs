//! Job registry: owns every job spec, its statistics and its next fire time.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    tokio::{sync::Semaphore, task::JoinHandle},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use hunter_metrics::{counter, gauge, scheduler as sched_metrics};

use crate::{
    Error, Result,
    clock::Clock,
    gate::{DEFAULT_FRESHNESS_WINDOW, DependencyGate, GateDecision},
    job::JobDefinition,
    notify::Notifier,
    stats::{JobStatistics, success_rate},
    store::ExecutionStore,
    supervised::{ExecutionContext, RunOutcome, Supervised},
    types::{CategoryStats, JobCategory, JobSummary, RegistryTotals},
};

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How recent a dependency's last success must be.
    pub freshness_window: Duration,
    /// Timezone wall-clock schedules are evaluated in.
    pub timezone: Tz,
    /// Upper bound on job tasks running at once.
    pub max_concurrent_jobs: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            timezone: Tz::UTC,
            max_concurrent_jobs: 8,
        }
    }
}

struct Entry {
    job: Supervised,
    next_run: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct JobTable {
    /// Registration order.
    entries: Vec<Entry>,
    by_category: HashMap<JobCategory, Vec<String>>,
}

impl JobTable {
    fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.job.name() == name)
    }
}

/// A spawned run. The handle stays observable and abortable.
#[derive(Debug)]
pub struct DispatchHandle {
    pub name: String,
    pub dispatched_at: DateTime<Utc>,
    handle: JoinHandle<RunOutcome>,
}

impl DispatchHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the run. `None` when the task was aborted or panicked
    /// outside the wrapper.
    pub async fn join(self) -> Option<RunOutcome> {
        match self.handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(job = %self.name, error = %e, "job task did not complete");
                None
            },
        }
    }
}

pub struct JobRegistry {
    table: RwLock<JobTable>,
    ctx: Arc<ExecutionContext>,
    config: RegistryConfig,
    permits: Arc<Semaphore>,
}

impl JobRegistry {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
    ) -> Self {
        let ctx = ExecutionContext {
            stats: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            gate: DependencyGate::new(config.freshness_window),
            store,
            notifier,
            clock,
        };
        Self {
            table: RwLock::new(JobTable::default()),
            ctx: Arc::new(ctx),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.ctx.clock)
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.ctx.notifier)
    }

    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        Arc::clone(&self.ctx.store)
    }

    /// Register a job. Fails without touching the registry when the name is
    /// taken or the schedule is invalid.
    pub fn register(&self, definition: JobDefinition) -> Result<Supervised> {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        if table.find(&definition.name).is_some() {
            return Err(Error::duplicate_job(&definition.name));
        }

        let (spec, enabled) = definition.into_spec()?;
        let now = self.ctx.clock.now();
        let next_run = spec.schedule.next_after(now, self.config.timezone);

        for dependency in &spec.dependencies {
            if table.find(dependency).is_none() {
                warn!(
                    job = %spec.name,
                    dependency = %dependency,
                    "dependency is not registered; the job will not run until it is"
                );
            }
        }

        let name = spec.name.clone();
        let category = spec.category;
        info!(
            job = %name,
            category = %category,
            schedule = %spec.schedule,
            next_run = ?next_run,
            "registered job"
        );

        let job = Supervised::new(spec, enabled, Arc::clone(&self.ctx));
        self.ctx
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone(), JobStatistics::default());
        table.by_category.entry(category).or_default().push(name);
        table.entries.push(Entry {
            job: job.clone(),
            next_run,
        });

        #[cfg(feature = "metrics")]
        gauge!(sched_metrics::JOBS_REGISTERED).set(table.entries.len() as f64);

        Ok(job)
    }

    pub fn enable(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.get(name) {
            Some(job) => {
                job.set_enabled(enabled);
                info!(job = name, enabled, "job toggled");
                true
            },
            None => {
                warn!(job = name, "cannot toggle unknown job");
                false
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<Supervised> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.find(name).map(|e| e.job.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gate decision for `name` at the current clock time.
    pub fn check_dependencies(&self, name: &str) -> Option<GateDecision> {
        let job = self.get(name)?;
        let stats = self.ctx.stats.lock().unwrap_or_else(|e| e.into_inner());
        Some(
            self.ctx
                .gate
                .evaluate(&job.spec().dependencies, &stats, self.ctx.clock.now()),
        )
    }

    /// Fails closed: unknown jobs and every blocking gate decision are `false`.
    pub fn dependencies_satisfied(&self, name: &str) -> bool {
        match self.check_dependencies(name) {
            Some(decision) if decision.is_satisfied() => true,
            Some(decision) => {
                debug!(job = name, reason = %decision, "dependencies not satisfied");
                false
            },
            None => {
                warn!(job = name, "dependency check for unknown job");
                false
            },
        }
    }

    /// `(job, dependency)` pairs whose dependency is not registered.
    pub fn dangling_dependencies(&self) -> Vec<(String, String)> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .entries
            .iter()
            .flat_map(|e| {
                e.job
                    .spec()
                    .dependencies
                    .iter()
                    .filter(|d| table.find(d).is_none())
                    .map(|d| (e.job.name().to_string(), d.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Jobs whose fire time has come, in registration order.
    ///
    /// Each returned job's next fire time moves to the first boundary
    /// strictly after `now`, so a boundary fires at most once and missed
    /// boundaries are not replayed. Disabled jobs are rescheduled the same
    /// way but not returned.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<Supervised> {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        for entry in &mut table.entries {
            if !entry.next_run.is_some_and(|t| t <= now) {
                continue;
            }
            entry.next_run = entry.job.spec().schedule.next_after(now, self.config.timezone);
            if entry.job.is_enabled() {
                due.push(entry.job.clone());
            } else {
                debug!(job = %entry.job.name(), "due but disabled");
            }
        }
        due
    }

    /// Spawn every due job onto its own task, bounded by
    /// `max_concurrent_jobs`.
    pub fn dispatch_due_jobs(&self, now: DateTime<Utc>) -> Vec<DispatchHandle> {
        self.due_jobs(now)
            .into_iter()
            .map(|job| self.dispatch(job, now))
            .collect()
    }

    /// Spawn one wrapped run.
    pub fn dispatch(&self, job: Supervised, now: DateTime<Utc>) -> DispatchHandle {
        let permits = Arc::clone(&self.permits);
        let name = job.name().to_string();
        debug!(job = %name, "dispatching job");
        #[cfg(feature = "metrics")]
        counter!(sched_metrics::DISPATCHED_TOTAL).increment(1);

        let handle = tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = permits.acquire_owned().await.ok();
            job.run().await
        });
        DispatchHandle {
            name,
            dispatched_at: now,
            handle,
        }
    }

    /// Run `name` immediately on the current task. `force` bypasses the
    /// enabled check.
    pub async fn run_now(&self, name: &str, force: bool) -> Result<RunOutcome> {
        let job = self.get(name).ok_or_else(|| Error::job_not_found(name))?;
        Ok(job.run_with(force).await)
    }

    pub fn stats(&self, name: &str) -> Option<JobStatistics> {
        self.ctx
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn category_jobs(&self, category: JobCategory) -> Vec<String> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_category
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    /// `None` when no job was registered under `category`.
    pub fn category_stats(&self, category: JobCategory) -> Option<CategoryStats> {
        let jobs = self.category_jobs(category);
        if jobs.is_empty() {
            return None;
        }
        let stats = self.ctx.stats_snapshot();
        let (executions, failures) = jobs
            .iter()
            .filter_map(|name| stats.get(name))
            .fold((0, 0), |(e, f), s| (e + s.executions, f + s.failures));
        Some(CategoryStats {
            category,
            total_jobs: jobs.len(),
            total_executions: executions,
            total_failures: failures,
            success_rate: success_rate(executions.saturating_sub(failures), executions),
            jobs,
        })
    }

    /// Every job (or one category's), in registration order.
    pub fn list_jobs(&self, category: Option<JobCategory>) -> Vec<JobSummary> {
        let stats = self.ctx.stats_snapshot();
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .entries
            .iter()
            .filter(|e| category.is_none_or(|c| e.job.spec().category == c))
            .map(|e| {
                let spec = e.job.spec();
                JobSummary {
                    name: spec.name.clone(),
                    category: spec.category,
                    priority: spec.priority,
                    description: spec.description.clone(),
                    schedule: spec.schedule.to_string(),
                    enabled: e.job.is_enabled(),
                    allow_overlap: spec.allow_overlap,
                    dependencies: spec.dependencies.clone(),
                    next_run: e.next_run,
                    stats: stats.get(&spec.name).cloned().unwrap_or_default(),
                }
            })
            .collect()
    }

    pub fn totals(&self) -> RegistryTotals {
        let stats = self.ctx.stats_snapshot();
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let executions: u64 = stats.values().map(|s| s.executions).sum();
        let failures: u64 = stats.values().map(|s| s.failures).sum();
        RegistryTotals {
            jobs: table.entries.len(),
            enabled: table.entries.iter().filter(|e| e.job.is_enabled()).count(),
            executions,
            failures,
            success_rate: success_rate(executions.saturating_sub(failures), executions),
            last_run: stats.values().filter_map(|s| s.last_run).max(),
        }
    }

    /// Earliest pending fire time across enabled jobs.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .iter()
            .filter(|e| e.job.is_enabled())
            .filter_map(|e| e.next_run)
            .min()
    }

    /// Names of jobs with a run in flight.
    pub fn running_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ctx
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
