//! Job registry and scheduler core.
//!
//! Jobs are registered with a schedule, a category and optional dependencies.
//! The [`service::SchedulerService`] loop asks the [`registry::JobRegistry`]
//! which jobs are due, spawns their [`supervised::Supervised`] wrappers onto
//! bounded tokio tasks and records every run in an [`store::ExecutionStore`].
//! A [`supervisor::ProcessSupervisor`] keeps an optional long-lived child
//! process alive behind a [`restart::RestartPolicy`].

pub mod clock;
pub mod error;
pub mod gate;
pub mod heartbeat;
pub mod job;
pub mod notify;
pub mod parse;
pub mod registry;
pub mod restart;
pub mod schedule;
pub mod service;
pub mod stats;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod supervised;
pub mod supervisor;
pub mod types;

pub use {
    clock::{Clock, ManualClock, SystemClock},
    error::{Error, Result},
    job::{JobAction, JobDefinition, JobOutput, JobSpec},
    notify::{Notifier, NotifyLevel},
    registry::{DispatchHandle, JobRegistry, RegistryConfig},
    restart::{RestartPolicy, RestartPolicyConfig},
    schedule::{JobSchedule, ScheduleSpec},
    service::{HeartbeatConfig, SchedulerConfig, SchedulerService},
    stats::JobStatistics,
    store::ExecutionStore,
    supervised::{RunOutcome, SkipReason, Supervised},
    supervisor::{ManagedProcess, ProcessState, ProcessSupervisor, SupervisorConfig},
    types::{ExecutionRecord, ExecutionStatus, JobCategory, JobPriority},
};

/// Run database migrations for the execution history.
///
/// Creates the `job_executions` table. Call this at startup when sharing a
/// pool with [`store_sqlite::SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
