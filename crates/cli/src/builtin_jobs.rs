//! Maintenance and monitoring jobs registered alongside configured commands.

use std::sync::Arc;

use {chrono::TimeDelta, serde_json::json, tracing::info};

use hunter_scheduler::{
    Clock, ExecutionStore, JobCategory, JobDefinition, JobOutput, JobPriority, Notifier,
    NotifyLevel, ProcessState, ProcessSupervisor, ScheduleSpec,
    heartbeat::{ResourceThresholds, SystemSnapshot},
    job::action,
    notify::notify_best_effort,
};

/// Services the built-in jobs run against.
#[derive(Clone)]
pub struct BuiltinContext {
    pub store: Arc<dyn ExecutionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub retention_days: u32,
    pub thresholds: ResourceThresholds,
    pub supervisor: Option<Arc<ProcessSupervisor>>,
}

/// Every built-in job that applies. `process_health` needs a supervisor.
pub fn definitions(ctx: &BuiltinContext) -> Vec<JobDefinition> {
    let mut defs = vec![prune_history_job(ctx), resource_monitor_job(ctx)];
    if let Some(supervisor) = &ctx.supervisor {
        defs.push(process_health_job(ctx, Arc::clone(supervisor)));
    }
    defs
}

fn prune_history_job(ctx: &BuiltinContext) -> JobDefinition {
    let store = Arc::clone(&ctx.store);
    let clock = Arc::clone(&ctx.clock);
    let days = ctx.retention_days;
    JobDefinition::new(
        "prune_history",
        ScheduleSpec::daily("03:30"),
        JobCategory::Maintenance,
        action(move || {
            let store = Arc::clone(&store);
            let clock = Arc::clone(&clock);
            async move { prune_history(store.as_ref(), clock.as_ref(), days).await }
        }),
    )
    .with_priority(JobPriority::Low)
    .with_description(format!("Delete execution records older than {days} days"))
}

fn resource_monitor_job(ctx: &BuiltinContext) -> JobDefinition {
    let notifier = Arc::clone(&ctx.notifier);
    let thresholds = ctx.thresholds;
    JobDefinition::new(
        "resource_monitor",
        ScheduleSpec::hourly(":30"),
        JobCategory::Monitoring,
        action(move || {
            let notifier = Arc::clone(&notifier);
            async move {
                let snapshot = SystemSnapshot::capture().await;
                Ok(check_resources(&snapshot, &thresholds, notifier.as_ref()).await)
            }
        }),
    )
    .with_description("Warn when memory, CPU or disk usage is high")
}

fn process_health_job(ctx: &BuiltinContext, supervisor: Arc<ProcessSupervisor>) -> JobDefinition {
    let notifier = Arc::clone(&ctx.notifier);
    JobDefinition::new(
        "process_health",
        ScheduleSpec::interval(10, "minutes"),
        JobCategory::Monitoring,
        action(move || {
            let notifier = Arc::clone(&notifier);
            let supervisor = Arc::clone(&supervisor);
            async move { Ok(check_process(&supervisor, notifier.as_ref()).await) }
        }),
    )
    .with_priority(JobPriority::High)
    .with_description("Alert when the supervised process is not running")
}

pub async fn prune_history(
    store: &dyn ExecutionStore,
    clock: &dyn Clock,
    retention_days: u32,
) -> anyhow::Result<JobOutput> {
    let cutoff = clock.now() - TimeDelta::days(i64::from(retention_days));
    let deleted = store.prune(cutoff).await?;
    info!(deleted, retention_days, "pruned execution history");
    Ok(Some(json!({ "deleted": deleted, "cutoff": cutoff })))
}

pub async fn check_resources(
    snapshot: &SystemSnapshot,
    thresholds: &ResourceThresholds,
    notifier: &dyn Notifier,
) -> JobOutput {
    let alerts = thresholds.alerts(snapshot);
    if !alerts.is_empty() {
        let lines: Vec<String> = alerts.iter().map(|a| format!("• {a}")).collect();
        notify_best_effort(
            notifier,
            &format!("High resource usage\n{}", lines.join("\n")),
            NotifyLevel::Warning,
        )
        .await;
    }
    Some(json!({ "snapshot": snapshot, "alerts": alerts }))
}

pub async fn check_process(supervisor: &ProcessSupervisor, notifier: &dyn Notifier) -> JobOutput {
    let status = supervisor.status();
    if status.state != ProcessState::Running {
        let reason = status
            .last_restart_reason
            .as_deref()
            .map(|r| format!("\nLast restart: {r}"))
            .unwrap_or_default();
        notify_best_effort(
            notifier,
            &format!(
                "`{}` is {} (restarts: {}, failures: {}){reason}",
                status.name, status.state, status.total_restarts, status.total_failures
            ),
            NotifyLevel::Error,
        )
        .await;
    }
    Some(json!({ "state": status.state, "pid": status.pid }))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::{TimeZone, Utc},
        hunter_scheduler::{
            ManagedProcess, ManualClock, SupervisorConfig,
            notify::MemoryNotifier,
            store_memory::InMemoryStore,
            types::{Completion, ExecutionStart, ExecutionStatus, ExecutionFilter},
        },
    };

    struct IdleProcess;

    #[async_trait::async_trait]
    impl ManagedProcess for IdleProcess {
        fn name(&self) -> &str {
            "http-server"
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn check_health(&self) -> bool {
            true
        }

        fn pid(&self) -> Option<u32> {
            None
        }
    }

    fn context(supervisor: bool) -> BuiltinContext {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let notifier: Arc<dyn Notifier> = Arc::new(MemoryNotifier::new());
        BuiltinContext {
            store: Arc::new(InMemoryStore::new()),
            supervisor: supervisor.then(|| {
                Arc::new(ProcessSupervisor::new(
                    Arc::new(IdleProcess),
                    SupervisorConfig::default(),
                    Arc::clone(&notifier),
                    Arc::clone(&clock),
                ))
            }),
            notifier,
            clock,
            retention_days: 30,
            thresholds: ResourceThresholds::default(),
        }
    }

    #[test]
    fn process_health_only_with_supervisor() {
        let names = |ctx: &BuiltinContext| -> Vec<String> {
            definitions(ctx).into_iter().map(|d| d.name).collect()
        };
        assert_eq!(names(&context(false)), vec!["prune_history", "resource_monitor"]);
        assert_eq!(
            names(&context(true)),
            vec!["prune_history", "resource_monitor", "process_health"]
        );
        for def in definitions(&context(true)) {
            def.schedule.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn prune_deletes_only_old_terminal_records() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(now);
        let store = InMemoryStore::new();
        for (name, age_days) in [("old", 40), ("recent", 2)] {
            let started_at = now - TimeDelta::days(age_days);
            let id = store
                .start(&ExecutionStart {
                    job_name: name.into(),
                    category: JobCategory::Maintenance,
                    started_at,
                    metadata: None,
                })
                .await
                .unwrap();
            store
                .complete(id, &Completion {
                    completed_at: started_at,
                    status: ExecutionStatus::Success,
                    error_message: None,
                    error_detail: None,
                    duration_seconds: 1.0,
                    metadata: None,
                })
                .await
                .unwrap();
        }

        let out = prune_history(&store, &clock, 30).await.unwrap().unwrap();
        assert_eq!(out["deleted"], 1);
        let left = store.recent(&ExecutionFilter::latest(10)).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].job_name, "recent");
    }

    #[tokio::test]
    async fn resource_alerts_send_one_warning() {
        let notifier = MemoryNotifier::new();
        let snapshot = SystemSnapshot {
            memory_used_percent: 91.0,
            memory_available_bytes: 1024,
            cpu_used_percent: 10.0,
            disk_used_percent: 95.5,
            disk_free_bytes: 2048,
        };
        let out = check_resources(&snapshot, &ResourceThresholds::default(), &notifier)
            .await
            .unwrap();
        assert_eq!(out["alerts"].as_array().unwrap().len(), 2);

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        let (level, msg) = &messages[0];
        assert_eq!(*level, NotifyLevel::Warning);
        assert!(msg.contains("memory at 91.0%"), "{msg}");
        assert!(msg.contains("disk at 95.5%"), "{msg}");
    }

    #[tokio::test]
    async fn calm_resources_stay_quiet() {
        let notifier = MemoryNotifier::new();
        let snapshot = SystemSnapshot {
            memory_used_percent: 40.0,
            memory_available_bytes: 1024,
            cpu_used_percent: 10.0,
            disk_used_percent: 50.0,
            disk_free_bytes: 2048,
        };
        check_resources(&snapshot, &ResourceThresholds::default(), &notifier).await;
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn stopped_process_raises_error() {
        let ctx = context(true);
        let supervisor = ctx.supervisor.clone().unwrap();
        let notifier = MemoryNotifier::new();

        let out = check_process(&supervisor, &notifier).await.unwrap();
        assert_eq!(out["state"], "stopped");
        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, NotifyLevel::Error);
        assert!(messages[0].1.starts_with("`http-server` is stopped"));

        assert!(supervisor.start().await);
        let quiet = MemoryNotifier::new();
        let out = check_process(&supervisor, &quiet).await.unwrap();
        assert_eq!(out["state"], "running");
        assert!(quiet.messages().is_empty());
    }
}
