//! Health-checked supervision of one long-running companion process.
//!
//! The supervisor owns the state machine
//! `Stopped -> Starting -> Running <-> Unhealthy -> Restarting -> {Running | Failed}`
//! and asks the [`RestartPolicy`] before every restart.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use hunter_metrics::{counter, gauge, labels, supervisor as sup_metrics};

use crate::{
    clock::Clock,
    notify::{Notifier, NotifyLevel, notify_best_effort},
    parse::format_duration,
    restart::{RestartPolicy, RestartPolicyConfig, RestartPolicyStatus},
};

/// A process the supervisor can start, stop and probe.
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// Human-readable name used in logs and notifications.
    fn name(&self) -> &str;

    /// Spawn the process. Returning `Ok` does not imply it is healthy yet.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop the process. Stopping an already stopped process is not an error.
    async fn stop(&self) -> anyhow::Result<()>;

    async fn check_health(&self) -> bool;

    fn pid(&self) -> Option<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Unhealthy,
    Restarting,
    Failed,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub health_check_interval: Duration,
    /// How long `start` waits for the first healthy probe.
    pub startup_timeout: Duration,
    /// Delay between probes while waiting for startup.
    pub startup_poll_interval: Duration,
    /// Consecutive failed probes before a restart is attempted.
    pub unhealthy_threshold: u32,
    pub restart: RestartPolicyConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(30),
            startup_poll_interval: Duration::from_secs(1),
            unhealthy_threshold: 3,
            restart: RestartPolicyConfig::default(),
        }
    }
}

/// Snapshot returned by [`ProcessSupervisor::status`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessStatus {
    pub name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub total_starts: u64,
    pub total_restarts: u64,
    pub total_failures: u64,
    pub last_restart_reason: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<f64>,
    pub restart_policy: RestartPolicyStatus,
}

struct Inner {
    state: ProcessState,
    policy: RestartPolicy,
    total_starts: u64,
    total_restarts: u64,
    total_failures: u64,
    last_restart_reason: Option<String>,
    last_health_check: Option<DateTime<Utc>>,
    running_since: Option<DateTime<Utc>>,
    failed_checks: u32,
}

pub struct ProcessSupervisor {
    process: Arc<dyn ManagedProcess>,
    config: SupervisorConfig,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    /// Serializes start, stop and restart.
    ops: tokio::sync::Mutex<()>,
}

impl ProcessSupervisor {
    pub fn new(
        process: Arc<dyn ManagedProcess>,
        config: SupervisorConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = RestartPolicy::new(config.restart.clone(), Arc::clone(&clock));
        Self {
            process,
            config,
            notifier,
            clock,
            inner: Mutex::new(Inner {
                state: ProcessState::Stopped,
                policy,
                total_starts: 0,
                total_restarts: 0,
                total_failures: 0,
                last_restart_reason: None,
                last_health_check: None,
                running_since: None,
                failed_checks: 0,
            }),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.process.name()
    }

    pub fn state(&self) -> ProcessState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ProcessState) {
        let mut inner = self.lock();
        if inner.state != state {
            debug!(
                process = self.process.name(),
                from = %inner.state,
                to = %state,
                "process state change"
            );
            inner.state = state;
        }
    }

    /// Start the process and wait until it reports healthy.
    ///
    /// Returns `false` (state `Failed`) when spawning fails or the process
    /// never becomes healthy within `startup_timeout`.
    pub async fn start(&self) -> bool {
        let _op = self.ops.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> bool {
        let name = self.process.name().to_string();
        self.set_state(ProcessState::Starting);
        info!(process = %name, "starting supervised process");

        if let Err(e) = self.process.start().await {
            error!(process = %name, error = %e, "failed to spawn process");
            self.mark_failed();
            notify_best_effort(
                self.notifier.as_ref(),
                &format!("{name} failed to start: {e}"),
                NotifyLevel::Error,
            )
            .await;
            return false;
        }

        if !self.wait_healthy().await {
            error!(
                process = %name,
                timeout = %format_duration(self.config.startup_timeout),
                "process did not become healthy"
            );
            if let Err(e) = self.process.stop().await {
                warn!(process = %name, error = %e, "failed to clean up unhealthy process");
            }
            self.mark_failed();
            return false;
        }

        {
            let mut inner = self.lock();
            inner.state = ProcessState::Running;
            inner.total_starts += 1;
            inner.failed_checks = 0;
            inner.running_since = Some(self.clock.now());
        }
        #[cfg(feature = "metrics")]
        counter!(sup_metrics::STARTS_TOTAL).increment(1);

        let pid = self
            .process
            .pid()
            .map_or_else(|| "unknown".to_string(), |p| p.to_string());
        info!(process = %name, pid = %pid, "process running");
        notify_best_effort(
            self.notifier.as_ref(),
            &format!("{name} started (PID: {pid})"),
            NotifyLevel::Success,
        )
        .await;
        true
    }

    async fn wait_healthy(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout;
        loop {
            if self.probe().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.startup_poll_interval).await;
        }
    }

    async fn probe(&self) -> bool {
        let healthy = self.process.check_health().await;
        self.lock().last_health_check = Some(self.clock.now());
        healthy
    }

    fn mark_failed(&self) {
        let mut inner = self.lock();
        inner.state = ProcessState::Failed;
        inner.total_failures += 1;
        inner.running_since = None;
    }

    pub async fn stop(&self) {
        let _op = self.ops.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) -> bool {
        info!(process = self.process.name(), "stopping supervised process");
        let result = self.process.stop().await;
        {
            let mut inner = self.lock();
            inner.state = ProcessState::Stopped;
            inner.running_since = None;
        }
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(process = self.process.name(), error = %e, "failed to stop process");
                false
            },
        }
    }

    /// Restart the process if the policy allows it.
    ///
    /// A refused restart leaves the state untouched; the caller decides
    /// whether that means `Failed`.
    pub async fn restart(&self, reason: &str) -> bool {
        let _op = self.ops.lock().await;
        let name = self.process.name().to_string();
        info!(process = %name, reason, "restart requested");

        let delay = {
            let mut inner = self.lock();
            inner.last_restart_reason = Some(reason.to_string());
            if !inner.policy.can_restart() {
                inner.total_failures += 1;
                #[cfg(feature = "metrics")]
                {
                    counter!(sup_metrics::RESTARTS_DENIED_TOTAL).increment(1);
                    gauge!(sup_metrics::CIRCUIT_OPEN)
                        .set(if inner.policy.is_circuit_open() { 1.0 } else { 0.0 });
                }
                drop(inner);
                error!(process = %name, reason, "restart denied by policy");
                return false;
            }
            inner.policy.backoff_delay()
        };

        if !delay.is_zero() {
            info!(process = %name, delay = %format_duration(delay), "waiting before restart");
            notify_best_effort(
                self.notifier.as_ref(),
                &format!("{name} restart delayed {}", format_duration(delay)),
                NotifyLevel::Warning,
            )
            .await;
            tokio::time::sleep(delay).await;
        }

        self.set_state(ProcessState::Restarting);
        let stopped = self.stop_locked().await;
        let started = self.start_locked().await;
        let success = stopped && started;

        {
            let mut inner = self.lock();
            inner.policy.record_restart(success);
            if success {
                inner.total_restarts += 1;
            } else if started {
                // A failed start is already counted.
                inner.total_failures += 1;
            }
            #[cfg(feature = "metrics")]
            gauge!(sup_metrics::CIRCUIT_OPEN)
                .set(if inner.policy.is_circuit_open() { 1.0 } else { 0.0 });
        }
        #[cfg(feature = "metrics")]
        counter!(sup_metrics::RESTARTS_TOTAL, labels::SUCCESS => success.to_string()).increment(1);

        if success {
            notify_best_effort(
                self.notifier.as_ref(),
                &format!("{name} restarted successfully: {reason}"),
                NotifyLevel::Success,
            )
            .await;
        } else {
            notify_best_effort(
                self.notifier.as_ref(),
                &format!("{name} restart failed: {reason}"),
                NotifyLevel::Error,
            )
            .await;
        }
        success
    }

    /// One monitor iteration. `Running` and `Unhealthy` processes are
    /// probed. A `Failed` process gets a recovery restart whenever the policy
    /// allows one, so an open circuit is retried once its cooldown elapses.
    pub async fn check_once(&self) -> ProcessState {
        let state = self.state();
        if state == ProcessState::Failed {
            return self.recover().await;
        }
        if !matches!(state, ProcessState::Running | ProcessState::Unhealthy) {
            return state;
        }

        if self.probe().await {
            let recovered = {
                let mut inner = self.lock();
                inner.failed_checks = 0;
                let recovered = inner.state == ProcessState::Unhealthy;
                inner.state = ProcessState::Running;
                recovered
            };
            if recovered {
                info!(process = self.process.name(), "process recovered");
                notify_best_effort(
                    self.notifier.as_ref(),
                    &format!("{} recovered", self.process.name()),
                    NotifyLevel::Success,
                )
                .await;
            }
            return ProcessState::Running;
        }

        let failed_checks = {
            let mut inner = self.lock();
            inner.failed_checks += 1;
            inner.failed_checks
        };
        warn!(
            process = self.process.name(),
            failed_checks, "health check failed"
        );
        #[cfg(feature = "metrics")]
        counter!(sup_metrics::HEALTH_CHECK_FAILURES_TOTAL).increment(1);

        if failed_checks < self.config.unhealthy_threshold {
            return self.state();
        }

        error!(
            process = self.process.name(),
            "process unresponsive, attempting restart"
        );
        self.set_state(ProcessState::Unhealthy);
        if self.restart("health check failures").await {
            self.lock().failed_checks = 0;
        } else {
            self.set_state(ProcessState::Failed);
        }
        self.state()
    }

    async fn recover(&self) -> ProcessState {
        if !self.lock().policy.can_restart() {
            debug!(process = self.process.name(), "recovery restart not allowed yet");
            return ProcessState::Failed;
        }
        if self.restart("recovery").await {
            self.lock().failed_checks = 0;
        } else {
            self.set_state(ProcessState::Failed);
        }
        self.state()
    }

    /// Probe every `health_check_interval` until cancelled.
    pub async fn monitor(&self, cancel: CancellationToken) {
        info!(
            process = self.process.name(),
            every = %format_duration(self.config.health_check_interval),
            "health monitoring started"
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.health_check_interval) => {},
            }
            self.check_once().await;
        }
        info!(process = self.process.name(), "health monitoring stopped");
    }

    pub fn status(&self) -> ProcessStatus {
        let now = self.clock.now();
        let inner = self.lock();
        ProcessStatus {
            name: self.process.name().to_string(),
            state: inner.state,
            pid: self.process.pid(),
            total_starts: inner.total_starts,
            total_restarts: inner.total_restarts,
            total_failures: inner.total_failures,
            last_restart_reason: inner.last_restart_reason.clone(),
            last_health_check: inner.last_health_check,
            uptime_seconds: inner
                .running_since
                .map(|since| (now - since).num_milliseconds() as f64 / 1000.0),
            restart_policy: inner.policy.status(),
        }
    }
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("process", &self.process.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use {
        super::*,
        crate::{clock::ManualClock, notify::MemoryNotifier},
        chrono::TimeDelta,
    };

    #[derive(Default)]
    struct FakeProcess {
        healthy: AtomicBool,
        fail_spawn: AtomicBool,
        /// Health reported after a successful start.
        healthy_after_start: AtomicBool,
        starts: AtomicU32,
        stops: AtomicU32,
    }

    impl FakeProcess {
        fn new() -> Arc<Self> {
            let p = Self::default();
            p.healthy_after_start.store(true, Ordering::SeqCst);
            Arc::new(p)
        }
    }

    #[async_trait]
    impl ManagedProcess for FakeProcess {
        fn name(&self) -> &str {
            "dashboard"
        }

        async fn start(&self) -> anyhow::Result<()> {
            if self.fail_spawn.load(Ordering::SeqCst) {
                anyhow::bail!("no such binary");
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.healthy
                .store(self.healthy_after_start.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.healthy.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn check_health(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn pid(&self) -> Option<u32> {
            Some(4242)
        }
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            health_check_interval: Duration::from_millis(5),
            startup_timeout: Duration::from_millis(30),
            startup_poll_interval: Duration::from_millis(5),
            unhealthy_threshold: 3,
            restart: RestartPolicyConfig {
                base_backoff: Duration::ZERO,
                ..RestartPolicyConfig::default()
            },
        }
    }

    fn supervisor(
        process: Arc<FakeProcess>,
        config: SupervisorConfig,
    ) -> (ProcessSupervisor, Arc<MemoryNotifier>, Arc<ManualClock>) {
        let notifier = Arc::new(MemoryNotifier::default());
        let clock = Arc::new(ManualClock::new("2026-01-05T12:00:00Z".parse().unwrap()));
        let sup = ProcessSupervisor::new(process, config, notifier.clone(), clock.clone());
        (sup, notifier, clock)
    }

    #[tokio::test]
    async fn start_reaches_running_and_counts() {
        let process = FakeProcess::new();
        let (sup, notifier, _) = supervisor(process, fast_config());
        assert_eq!(sup.state(), ProcessState::Stopped);

        assert!(sup.start().await);
        let status = sup.status();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(status.total_starts, 1);
        assert_eq!(status.pid, Some(4242));
        assert_eq!(status.uptime_seconds, Some(0.0));
        assert_eq!(notifier.count(NotifyLevel::Success), 1);
    }

    #[tokio::test]
    async fn start_times_out_when_never_healthy() {
        let process = FakeProcess::new();
        process.healthy_after_start.store(false, Ordering::SeqCst);
        let (sup, _, _) = supervisor(process.clone(), fast_config());

        assert!(!sup.start().await);
        assert_eq!(sup.state(), ProcessState::Failed);
        assert_eq!(sup.status().total_failures, 1);
        assert_eq!(process.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawn_error_fails_and_notifies() {
        let process = FakeProcess::new();
        process.fail_spawn.store(true, Ordering::SeqCst);
        let (sup, notifier, _) = supervisor(process, fast_config());

        assert!(!sup.start().await);
        assert_eq!(sup.state(), ProcessState::Failed);
        assert_eq!(notifier.count(NotifyLevel::Error), 1);
    }

    #[tokio::test]
    async fn restarts_after_threshold_of_failed_checks() {
        let process = FakeProcess::new();
        let (sup, notifier, _) = supervisor(process.clone(), fast_config());
        assert!(sup.start().await);

        process.healthy.store(false, Ordering::SeqCst);
        assert_eq!(sup.check_once().await, ProcessState::Running);
        assert_eq!(sup.check_once().await, ProcessState::Running);
        assert_eq!(sup.check_once().await, ProcessState::Running);

        let status = sup.status();
        assert_eq!(status.total_restarts, 1);
        assert_eq!(status.total_starts, 2);
        assert_eq!(
            status.last_restart_reason.as_deref(),
            Some("health check failures")
        );
        assert_eq!(process.starts.load(Ordering::SeqCst), 2);
        assert!(
            notifier
                .messages()
                .iter()
                .any(|(level, msg)| *level == NotifyLevel::Success
                    && msg.contains("restarted successfully"))
        );
    }

    #[tokio::test]
    async fn transient_failure_does_not_restart() {
        let process = FakeProcess::new();
        let (sup, _, _) = supervisor(process.clone(), fast_config());
        assert!(sup.start().await);

        process.healthy.store(false, Ordering::SeqCst);
        sup.check_once().await;
        process.healthy.store(true, Ordering::SeqCst);
        assert_eq!(sup.check_once().await, ProcessState::Running);
        assert_eq!(sup.status().total_restarts, 0);
    }

    #[tokio::test]
    async fn failed_restart_leaves_process_failed() {
        let process = FakeProcess::new();
        let (sup, notifier, _) = supervisor(process.clone(), fast_config());
        assert!(sup.start().await);

        process.healthy.store(false, Ordering::SeqCst);
        process.healthy_after_start.store(false, Ordering::SeqCst);
        for _ in 0..3 {
            sup.check_once().await;
        }
        assert_eq!(sup.state(), ProcessState::Failed);
        assert_eq!(sup.status().restart_policy.consecutive_failures, 1);
        assert!(
            notifier
                .messages()
                .iter()
                .any(|(level, msg)| *level == NotifyLevel::Error && msg.contains("restart failed"))
        );

    }

    #[tokio::test]
    async fn failed_process_is_retried_after_circuit_cooldown() {
        let process = FakeProcess::new();
        let (sup, _, clock) = supervisor(process.clone(), fast_config());
        assert!(sup.start().await);

        process.healthy.store(false, Ordering::SeqCst);
        process.fail_spawn.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            sup.check_once().await;
        }
        assert_eq!(sup.state(), ProcessState::Failed);
        assert_eq!(sup.status().restart_policy.consecutive_failures, 1);

        // Each tick in Failed attempts another restart until the circuit opens.
        assert_eq!(sup.check_once().await, ProcessState::Failed);
        assert_eq!(sup.check_once().await, ProcessState::Failed);
        let policy = sup.status().restart_policy;
        assert_eq!(policy.consecutive_failures, 3);
        assert!(policy.circuit_open);

        let stops = process.stops.load(Ordering::SeqCst);
        process.fail_spawn.store(false, Ordering::SeqCst);
        assert_eq!(sup.check_once().await, ProcessState::Failed);
        assert_eq!(process.stops.load(Ordering::SeqCst), stops);

        clock.advance(TimeDelta::minutes(16));
        assert_eq!(sup.check_once().await, ProcessState::Running);
        let status = sup.status();
        assert_eq!(status.last_restart_reason.as_deref(), Some("recovery"));
        assert!(!status.restart_policy.circuit_open);
        assert_eq!(status.restart_policy.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn rate_limit_denies_restart() {
        let process = FakeProcess::new();
        let mut config = fast_config();
        config.restart.max_restarts_per_hour = 1;
        let (sup, _, _) = supervisor(process, config);
        assert!(sup.start().await);

        assert!(sup.restart("manual").await);
        assert!(!sup.restart("manual again").await);
        let status = sup.status();
        assert_eq!(status.total_restarts, 1);
        assert_eq!(status.total_failures, 1);
        assert_eq!(status.state, ProcessState::Running);
    }

    #[tokio::test]
    async fn monitor_stops_on_cancel() {
        let process = FakeProcess::new();
        let (sup, _, _) = supervisor(process, fast_config());
        assert!(sup.start().await);

        let sup = Arc::new(sup);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let sup = Arc::clone(&sup);
            let cancel = cancel.clone();
            async move { sup.monitor(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(sup.state(), ProcessState::Running);
        assert!(sup.status().last_health_check.is_some());
    }
}
