//! The scheduler loop: dispatch due jobs, reap finished runs, emit
//! heartbeats, sleep one tick.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    chrono::{DateTime, TimeDelta, Utc},
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use hunter_metrics::{gauge, scheduler as sched_metrics, system as sys_metrics};

use crate::{
    Error, Result,
    heartbeat::{HeartbeatReport, ResourceThresholds, SystemSnapshot},
    notify::{NotifyLevel, notify_best_effort},
    parse::format_duration,
    registry::{DispatchHandle, JobRegistry},
    supervised::RunOutcome,
    supervisor::{ProcessStatus, ProcessSupervisor},
    types::RegistryTotals,
};

/// Longest allowed tick.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(60);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Detailed report cadence.
    pub every: Duration,
    /// Quick status cadence. Sent only when something is off.
    pub quick_every: Duration,
    /// Sample host memory, CPU and disk for detailed reports.
    pub include_system: bool,
    pub thresholds: ResourceThresholds,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every: Duration::from_secs(30 * 60),
            quick_every: Duration::from_secs(10 * 60),
            include_system: true,
            thresholds: ResourceThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// How long shutdown waits for in-flight runs before aborting them.
    pub shutdown_grace: Duration,
    pub heartbeat: HeartbeatConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() || self.tick_interval > MAX_TICK_INTERVAL {
            return Err(Error::message(format!(
                "tick interval must be positive and at most {}, got {}",
                format_duration(MAX_TICK_INTERVAL),
                format_duration(self.tick_interval)
            )));
        }
        if self.heartbeat.enabled
            && (self.heartbeat.every.is_zero() || self.heartbeat.quick_every.is_zero())
        {
            return Err(Error::message("heartbeat intervals must be non-zero"));
        }
        Ok(())
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    pub reaped: usize,
    pub heartbeat_sent: bool,
    pub quick_status_sent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub ticks: u64,
    pub in_flight: Vec<String>,
    pub next_wake: Option<DateTime<Utc>>,
    pub totals: RegistryTotals,
    pub process: Option<ProcessStatus>,
}

struct HeartbeatClock {
    last_detailed: DateTime<Utc>,
    last_quick: DateTime<Utc>,
}

pub struct SchedulerService {
    registry: Arc<JobRegistry>,
    config: SchedulerConfig,
    supervisor: Option<Arc<ProcessSupervisor>>,
    started_at: DateTime<Utc>,
    in_flight: Mutex<Vec<DispatchHandle>>,
    heartbeat: Mutex<HeartbeatClock>,
    ticks: AtomicU64,
}

impl SchedulerService {
    pub fn new(
        registry: Arc<JobRegistry>,
        config: SchedulerConfig,
        supervisor: Option<Arc<ProcessSupervisor>>,
    ) -> Arc<Self> {
        let started_at = registry.clock().now();
        Arc::new(Self {
            registry,
            config,
            supervisor,
            started_at,
            in_flight: Mutex::new(Vec::new()),
            heartbeat: Mutex::new(HeartbeatClock {
                last_detailed: started_at,
                last_quick: started_at,
            }),
            ticks: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Run until `cancel` fires, then drain in-flight jobs.
    ///
    /// An `Err` means the loop itself could not run; job failures never
    /// surface here.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        self.config.validate()?;

        let totals = self.registry.totals();
        info!(
            jobs = totals.jobs,
            enabled = totals.enabled,
            tick = %format_duration(self.config.tick_interval),
            "scheduler started"
        );
        for (job, dependency) in self.registry.dangling_dependencies() {
            warn!(job = %job, dependency = %dependency, "dependency is not a registered job");
        }
        notify_best_effort(
            self.registry.notifier().as_ref(),
            &format!(
                "Scheduler started\n📋 {} jobs registered ({} enabled)",
                totals.jobs, totals.enabled
            ),
            NotifyLevel::Success,
        )
        .await;

        let monitor = self.supervisor.as_ref().map(|sup| {
            let sup = Arc::clone(sup);
            let token = cancel.child_token();
            tokio::spawn(async move { sup.monitor(token).await })
        });

        loop {
            let now = self.registry.clock().now();
            let report = self.tick(now).await;
            if report.dispatched > 0 {
                debug!(dispatched = report.dispatched, "tick dispatched jobs");
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.tick_interval) => {},
            }
        }

        info!("scheduler stopping");
        self.drain().await;
        if let Some(monitor) = monitor
            && let Err(e) = monitor.await
        {
            error!(error = %e, "health monitor task failed");
        }

        notify_best_effort(
            self.registry.notifier().as_ref(),
            &format!(
                "Scheduler stopped after {}",
                format_duration(self.uptime(self.registry.clock().now()))
            ),
            NotifyLevel::Warning,
        )
        .await;
        info!("scheduler stopped");
        Ok(())
    }

    /// One loop iteration at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let handles = self.registry.dispatch_due_jobs(now);
        let dispatched = handles.len();
        self.lock_in_flight().extend(handles);

        let reaped = self.reap().await;
        let (heartbeat_sent, quick_status_sent) = self.maybe_heartbeat(now).await;

        TickReport {
            dispatched,
            reaped,
            heartbeat_sent,
            quick_status_sent,
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Vec<DispatchHandle>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Names of dispatched runs that have not been reaped yet.
    pub fn in_flight(&self) -> Vec<String> {
        self.lock_in_flight()
            .iter()
            .map(|h| h.name.clone())
            .collect()
    }

    /// Join every finished handle and log its outcome.
    async fn reap(&self) -> usize {
        let finished: Vec<DispatchHandle> = {
            let mut guard = self.lock_in_flight();
            let (done, pending): (Vec<_>, Vec<_>) =
                guard.drain(..).partition(DispatchHandle::is_finished);
            *guard = pending;
            #[cfg(feature = "metrics")]
            gauge!(sched_metrics::IN_FLIGHT).set(guard.len() as f64);
            done
        };

        let reaped = finished.len();
        for handle in finished {
            let name = handle.name.clone();
            match handle.join().await {
                Some(RunOutcome::Skipped { reason }) => {
                    debug!(job = %name, reason = reason.as_str(), "run skipped");
                },
                Some(outcome) => debug!(job = %name, success = outcome.is_success(), "run reaped"),
                None => {},
            }
        }
        reaped
    }

    /// Wait up to `shutdown_grace` for in-flight runs, then abort the rest.
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        loop {
            self.reap().await;
            let remaining = self.lock_in_flight().len();
            if remaining == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let handles: Vec<DispatchHandle> = self.lock_in_flight().drain(..).collect();
                for handle in &handles {
                    warn!(job = %handle.name, "aborting job still running at shutdown");
                    handle.abort();
                }
                for handle in handles {
                    handle.join().await;
                }
                return;
            }
            debug!(remaining, "waiting for in-flight jobs");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }

    /// Build a heartbeat report without sampling the host.
    pub fn report(&self, now: DateTime<Utc>, system: Option<SystemSnapshot>) -> HeartbeatReport {
        HeartbeatReport {
            at: now,
            uptime: self.uptime(now),
            totals: self.registry.totals(),
            running_jobs: self.registry.running_jobs(),
            process: self.supervisor.as_ref().map(|s| s.status()),
            system,
            thresholds: self.config.heartbeat.thresholds,
        }
    }

    async fn maybe_heartbeat(&self, now: DateTime<Utc>) -> (bool, bool) {
        let cfg = &self.config.heartbeat;
        if !cfg.enabled {
            return (false, false);
        }

        let (detailed_due, quick_due) = {
            let mut clock = self.heartbeat.lock().unwrap_or_else(|e| e.into_inner());
            let detailed_due = elapsed(clock.last_detailed, now) >= cfg.every;
            let quick_due = elapsed(clock.last_quick, now) >= cfg.quick_every;
            if detailed_due {
                clock.last_detailed = now;
            }
            if quick_due {
                clock.last_quick = now;
            }
            (detailed_due, quick_due)
        };

        let tz = self.registry.config().timezone;
        let notifier = self.registry.notifier();
        let mut quick_sent = false;
        if quick_due {
            let report = self.report(now, None);
            if report.needs_quick_status() {
                notify_best_effort(
                    notifier.as_ref(),
                    &report.render_quick(tz),
                    NotifyLevel::Heartbeat,
                )
                .await;
                quick_sent = true;
            }
        }

        if detailed_due {
            let system = if cfg.include_system {
                let snap = SystemSnapshot::capture().await;
                #[cfg(feature = "metrics")]
                {
                    gauge!(sys_metrics::MEMORY_USED_PERCENT).set(snap.memory_used_percent);
                    gauge!(sys_metrics::CPU_USED_PERCENT).set(snap.cpu_used_percent);
                    gauge!(sys_metrics::DISK_USED_PERCENT).set(snap.disk_used_percent);
                }
                Some(snap)
            } else {
                None
            };
            let report = self.report(now, system);
            info!(verdict = ?report.verdict(), "sending heartbeat");
            notify_best_effort(
                notifier.as_ref(),
                &report.render_detailed(tz),
                NotifyLevel::Heartbeat,
            )
            .await;
        }

        (detailed_due, quick_sent)
    }

    pub fn status(&self) -> ServiceStatus {
        let now = self.registry.clock().now();
        ServiceStatus {
            started_at: self.started_at,
            uptime_seconds: self.uptime(now).as_secs_f64(),
            ticks: self.ticks.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            next_wake: self.registry.next_wake(),
            totals: self.registry.totals(),
            process: self.supervisor.as_ref().map(|s| s.status()),
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .max(TimeDelta::zero())
        .to_std()
        .unwrap_or_default()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use {
        super::*,
        crate::{
            clock::ManualClock,
            job::{JobDefinition, action},
            notify::MemoryNotifier,
            registry::RegistryConfig,
            schedule::ScheduleSpec,
            store_memory::InMemoryStore,
            types::JobCategory,
        },
    };

    struct Fixture {
        service: Arc<SchedulerService>,
        registry: Arc<JobRegistry>,
        notifier: Arc<MemoryNotifier>,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: SchedulerConfig) -> Fixture {
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(ManualClock::new("2026-01-05T08:00:00Z".parse().unwrap()));
        let registry = Arc::new(JobRegistry::new(
            Arc::new(InMemoryStore::new()),
            notifier.clone(),
            clock.clone(),
            RegistryConfig::default(),
        ));
        let service = SchedulerService::new(Arc::clone(&registry), config, None);
        Fixture {
            service,
            registry,
            notifier,
            clock,
        }
    }

    fn quiet_config() -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(200),
            heartbeat: HeartbeatConfig {
                include_system: false,
                ..HeartbeatConfig::default()
            },
        }
    }

    fn counting_job(name: &str, schedule: ScheduleSpec, runs: &Arc<AtomicUsize>) -> JobDefinition {
        let runs = Arc::clone(runs);
        JobDefinition::new(
            name,
            schedule,
            JobCategory::Maintenance,
            action(move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            }),
        )
    }

    #[test]
    fn tick_interval_is_bounded() {
        let mut config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        config.tick_interval = Duration::from_secs(61);
        assert!(config.validate().is_err());
        config.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.tick_interval = MAX_TICK_INTERVAL;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn tick_dispatches_and_later_reaps() {
        let f = fixture(quiet_config());
        let runs = Arc::new(AtomicUsize::new(0));
        f.registry
            .register(counting_job("sweep", ScheduleSpec::hourly(":05"), &runs))
            .unwrap();

        let report = f.service.tick("2026-01-05T08:04:00Z".parse().unwrap()).await;
        assert_eq!(report.dispatched, 0);

        let report = f.service.tick("2026-01-05T08:05:00Z".parse().unwrap()).await;
        assert_eq!(report.dispatched, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = f.service.tick("2026-01-05T08:05:01Z".parse().unwrap()).await;
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.reaped, 1);
        assert!(f.service.in_flight().is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn heartbeats_follow_their_cadence() {
        let f = fixture(quiet_config());

        let report = f.service.tick("2026-01-05T08:09:59Z".parse().unwrap()).await;
        assert!(!report.heartbeat_sent);

        // Quick status is due at 08:10 but nothing is wrong.
        let report = f.service.tick("2026-01-05T08:10:00Z".parse().unwrap()).await;
        assert!(!report.quick_status_sent);

        let report = f.service.tick("2026-01-05T08:30:00Z".parse().unwrap()).await;
        assert!(report.heartbeat_sent);
        assert_eq!(f.notifier.count(NotifyLevel::Heartbeat), 1);

        let report = f.service.tick("2026-01-05T08:45:00Z".parse().unwrap()).await;
        assert!(!report.heartbeat_sent);
    }

    #[tokio::test]
    async fn quick_status_sent_after_failures() {
        let f = fixture(quiet_config());
        f.registry
            .register(JobDefinition::new(
                "broken",
                ScheduleSpec::hourly(":00"),
                JobCategory::Monitoring,
                action(|| async { anyhow::bail!("boom") }),
            ))
            .unwrap();
        f.registry.run_now("broken", false).await.unwrap();

        let report = f.service.tick("2026-01-05T08:10:00Z".parse().unwrap()).await;
        assert!(report.quick_status_sent);
        assert!(
            f.notifier
                .messages()
                .iter()
                .any(|(level, msg)| *level == NotifyLevel::Heartbeat
                    && msg.contains("Quick Status"))
        );
    }

    #[tokio::test]
    async fn disabled_heartbeat_sends_nothing() {
        let mut config = quiet_config();
        config.heartbeat.enabled = false;
        let f = fixture(config);
        let report = f.service.tick("2026-01-05T12:00:00Z".parse().unwrap()).await;
        assert!(!report.heartbeat_sent);
        assert_eq!(f.notifier.count(NotifyLevel::Heartbeat), 0);
    }

    #[tokio::test]
    async fn run_notifies_start_and_stop() {
        let f = fixture(quiet_config());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let service = Arc::clone(&f.service);
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let messages = f.notifier.messages();
        assert_eq!(messages.first().unwrap().0, NotifyLevel::Success);
        assert!(messages.first().unwrap().1.starts_with("Scheduler started"));
        assert_eq!(messages.last().unwrap().0, NotifyLevel::Warning);
        assert!(messages.last().unwrap().1.starts_with("Scheduler stopped"));
        assert!(f.service.status().ticks >= 1);
    }

    #[tokio::test]
    async fn shutdown_aborts_runs_past_grace() {
        let mut config = quiet_config();
        config.shutdown_grace = Duration::from_millis(30);
        let f = fixture(config);
        f.registry
            .register(
                JobDefinition::new(
                    "slow",
                    ScheduleSpec::interval(1, "minutes"),
                    JobCategory::Maintenance,
                    action(|| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(None)
                    }),
                ),
            )
            .unwrap();

        // First interval boundary is one minute after registration.
        f.clock.advance(TimeDelta::minutes(1));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let service = Arc::clone(&f.service);
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(f.service.in_flight(), vec!["slow".to_string()]);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(f.service.in_flight().is_empty());
        assert!(f.registry.running_jobs().is_empty());
    }

    #[test]
    fn elapsed_never_negative() {
        let a: DateTime<Utc> = "2026-01-05T08:00:00Z".parse().unwrap();
        let b: DateTime<Utc> = "2026-01-05T07:00:00Z".parse().unwrap();
        assert_eq!(elapsed(a, b), Duration::ZERO);
        assert_eq!(elapsed(b, a), Duration::from_secs(3600));
    }
}
