//! Periodic heartbeat reports: scheduler totals, the supervised process and
//! host resources.

use std::{fmt, path::Path, time::Duration};

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    serde::Serialize,
    sysinfo::{Disks, System},
};

use crate::{
    parse::format_duration,
    supervisor::{ProcessState, ProcessStatus},
    types::RegistryTotals,
};

/// Host resource usage at one instant.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct SystemSnapshot {
    pub memory_used_percent: f64,
    pub memory_available_bytes: u64,
    pub cpu_used_percent: f64,
    pub disk_used_percent: f64,
    pub disk_free_bytes: u64,
}

impl SystemSnapshot {
    /// Sample memory, CPU and the root disk.
    ///
    /// CPU usage needs two refreshes, so this waits
    /// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] between them.
    pub async fn capture() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();

        let total = sys.total_memory();
        let available = sys.available_memory();
        let memory_used_percent = percent(total.saturating_sub(available), total);

        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| disks.list().iter().max_by_key(|d| d.total_space()));
        let (disk_used_percent, disk_free_bytes) = root.map_or((0.0, 0), |d| {
            let total = d.total_space();
            let free = d.available_space();
            (percent(total.saturating_sub(free), total), free)
        });

        Self {
            memory_used_percent,
            memory_available_bytes: available,
            cpu_used_percent: f64::from(sys.global_cpu_usage()),
            disk_used_percent,
            disk_free_bytes,
        }
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

/// Binary-prefixed size, e.g. `3.2 GiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Usage percentages above which a resource is reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceThresholds {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            memory_percent: 85.0,
            cpu_percent: 80.0,
            disk_percent: 90.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceAlert {
    pub resource: &'static str,
    pub used_percent: f64,
    pub threshold_percent: f64,
}

impl fmt::Display for ResourceAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {:.1}% (threshold {:.0}%)",
            self.resource, self.used_percent, self.threshold_percent
        )
    }
}

impl ResourceThresholds {
    pub fn alerts(&self, snapshot: &SystemSnapshot) -> Vec<ResourceAlert> {
        [
            ("memory", snapshot.memory_used_percent, self.memory_percent),
            ("cpu", snapshot.cpu_used_percent, self.cpu_percent),
            ("disk", snapshot.disk_used_percent, self.disk_percent),
        ]
        .into_iter()
        .filter(|(_, used, threshold)| used > threshold)
        .map(|(resource, used_percent, threshold_percent)| ResourceAlert {
            resource,
            used_percent,
            threshold_percent,
        })
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Healthy,
    MinorIssues,
    Issues,
}

impl Verdict {
    pub fn headline(self) -> &'static str {
        match self {
            Self::Healthy => "💚 ALL SYSTEMS HEALTHY",
            Self::MinorIssues => "💛 MINOR ISSUES",
            Self::Issues => "💔 ISSUES DETECTED",
        }
    }
}

/// Everything a heartbeat message is rendered from.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatReport {
    pub at: DateTime<Utc>,
    pub uptime: Duration,
    pub totals: RegistryTotals,
    pub running_jobs: Vec<String>,
    pub process: Option<ProcessStatus>,
    pub system: Option<SystemSnapshot>,
    #[serde(skip)]
    pub thresholds: ResourceThresholds,
}

impl HeartbeatReport {
    fn process_ok(&self) -> bool {
        self.process
            .as_ref()
            .is_none_or(|p| p.state == ProcessState::Running)
    }

    pub fn alerts(&self) -> Vec<ResourceAlert> {
        self.system
            .as_ref()
            .map(|s| self.thresholds.alerts(s))
            .unwrap_or_default()
    }

    /// Healthy when nothing is wrong, minor issues when only host resources
    /// are high, issues when jobs failed or the process is down.
    pub fn verdict(&self) -> Verdict {
        if !self.process_ok() || self.totals.failures > 0 {
            Verdict::Issues
        } else if !self.alerts().is_empty() {
            Verdict::MinorIssues
        } else {
            Verdict::Healthy
        }
    }

    /// Quick statuses are only worth sending when something is off.
    pub fn needs_quick_status(&self) -> bool {
        self.totals.failures > 0 || !self.process_ok()
    }

    pub fn render_detailed(&self, tz: Tz) -> String {
        let local = self.at.with_timezone(&tz);
        let totals = &self.totals;
        let last_run = totals.last_run.map_or_else(
            || "never".to_string(),
            |t| t.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string(),
        );

        let mut out = format!(
            "{}\n⏰ {} | ⏳ {} uptime\n\n\
             🤖 Scheduler\n\
             • Success rate: {:.2}%\n\
             • Executed: {}\n\
             • Failed: {}\n\
             • Enabled jobs: {} of {}\n\
             • Running: {}\n\
             • Last job: {}\n",
            self.verdict().headline(),
            local.format("%Y-%m-%d %H:%M:%S %Z"),
            format_duration(self.uptime),
            totals.success_rate,
            totals.executions,
            totals.failures,
            totals.enabled,
            totals.jobs,
            self.running_jobs.len(),
            last_run,
        );

        if let Some(process) = &self.process {
            out.push_str(&format!(
                "\n🌐 {}\n• State: {}\n• Responsive: {}\n• Restarts: {}\n",
                process.name,
                process.state,
                if process.state == ProcessState::Running {
                    "✅"
                } else {
                    "❌"
                },
                process.total_restarts,
            ));
            if let Some(secs) = process.uptime_seconds {
                out.push_str(&format!("• Uptime: {:.1}h\n", secs / 3600.0));
            }
        }

        if let Some(system) = &self.system {
            out.push_str(&format!(
                "\n💻 System\n\
                 • Memory: {:.1}% ({} free)\n\
                 • CPU: {:.1}%\n\
                 • Disk: {:.1}% ({} free)\n",
                system.memory_used_percent,
                format_bytes(system.memory_available_bytes),
                system.cpu_used_percent,
                system.disk_used_percent,
                format_bytes(system.disk_free_bytes),
            ));
        }

        if !self.process_ok()
            && let Some(process) = &self.process
        {
            out.push_str(&format!("\n🚨 CRITICAL: {} is {}", process.name, process.state));
        }
        let alerts = self.alerts();
        if !alerts.is_empty() {
            let joined = alerts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("\n⚠️ WARNING: high resource usage: {joined}"));
        }

        out.trim_end().to_string()
    }

    pub fn render_quick(&self, tz: Tz) -> String {
        let mut out = format!(
            "⚡ Quick Status\n⏰ {}\n📋 Enabled: {} jobs\n✅ Executed: {}\n❌ Failed: {}",
            self.at.with_timezone(&tz).format("%H:%M"),
            self.totals.enabled,
            self.totals.executions,
            self.totals.failures,
        );
        if let Some(process) = &self.process {
            out.push_str(&format!("\n🌐 {}: {}", process.name, process.state));
        }
        out
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::restart::{RestartPolicyConfig, RestartPolicyStatus},
        rstest::rstest,
    };

    fn snapshot(memory: f64, cpu: f64, disk: f64) -> SystemSnapshot {
        SystemSnapshot {
            memory_used_percent: memory,
            memory_available_bytes: 2 * 1024 * 1024 * 1024,
            cpu_used_percent: cpu,
            disk_used_percent: disk,
            disk_free_bytes: 50 * 1024 * 1024 * 1024,
        }
    }

    fn process(state: ProcessState) -> ProcessStatus {
        let config = RestartPolicyConfig::default();
        ProcessStatus {
            name: "dashboard".into(),
            state,
            pid: Some(10),
            total_starts: 1,
            total_restarts: 0,
            total_failures: 0,
            last_restart_reason: None,
            last_health_check: None,
            uptime_seconds: Some(7200.0),
            restart_policy: RestartPolicyStatus {
                restarts_last_hour: 0,
                max_restarts_per_hour: config.max_restarts_per_hour,
                consecutive_failures: 0,
                circuit_open: false,
                circuit_open_until: None,
                next_backoff_seconds: 0.0,
            },
        }
    }

    fn report(
        failures: u64,
        process: Option<ProcessStatus>,
        system: Option<SystemSnapshot>,
    ) -> HeartbeatReport {
        HeartbeatReport {
            at: "2026-01-05T12:00:00Z".parse().unwrap(),
            uptime: Duration::from_secs(3 * 3600 + 5),
            totals: RegistryTotals {
                jobs: 4,
                enabled: 3,
                executions: 10,
                failures,
                success_rate: 100.0,
                last_run: Some("2026-01-05T11:55:00Z".parse().unwrap()),
            },
            running_jobs: Vec::new(),
            process,
            system,
            thresholds: ResourceThresholds::default(),
        }
    }

    #[rstest]
    #[case(50.0, 50.0, 50.0, 0)]
    #[case(86.0, 50.0, 50.0, 1)]
    #[case(85.0, 80.0, 90.0, 0)]
    #[case(99.0, 95.0, 91.0, 3)]
    fn alerts_fire_strictly_above_threshold(
        #[case] memory: f64,
        #[case] cpu: f64,
        #[case] disk: f64,
        #[case] expected: usize,
    ) {
        let alerts = ResourceThresholds::default().alerts(&snapshot(memory, cpu, disk));
        assert_eq!(alerts.len(), expected);
    }

    #[test]
    fn verdicts() {
        let ok = Some(snapshot(10.0, 10.0, 10.0));
        let hot = Some(snapshot(95.0, 10.0, 10.0));

        assert_eq!(report(0, None, ok).verdict(), Verdict::Healthy);
        assert_eq!(
            report(0, Some(process(ProcessState::Running)), ok).verdict(),
            Verdict::Healthy
        );
        assert_eq!(report(0, None, hot).verdict(), Verdict::MinorIssues);
        assert_eq!(report(2, None, ok).verdict(), Verdict::Issues);
        assert_eq!(
            report(0, Some(process(ProcessState::Failed)), ok).verdict(),
            Verdict::Issues
        );
    }

    #[test]
    fn quick_status_only_when_something_is_off() {
        assert!(!report(0, None, None).needs_quick_status());
        assert!(!report(0, Some(process(ProcessState::Running)), None).needs_quick_status());
        assert!(report(1, None, None).needs_quick_status());
        assert!(report(0, Some(process(ProcessState::Unhealthy)), None).needs_quick_status());
    }

    #[test]
    fn detailed_render_includes_sections() {
        let text = report(
            0,
            Some(process(ProcessState::Unhealthy)),
            Some(snapshot(91.0, 10.0, 10.0)),
        )
        .render_detailed(chrono_tz::UTC);

        assert!(text.starts_with("💔 ISSUES DETECTED"));
        assert!(text.contains("3h 00m 05s uptime"));
        assert!(text.contains("• Executed: 10"));
        assert!(text.contains("• Enabled jobs: 3 of 4"));
        assert!(text.contains("• Last job: 2026-01-05 11:55:00"));
        assert!(text.contains("• Uptime: 2.0h"));
        assert!(text.contains("• Memory: 91.0% (2.0 GiB free)"));
        assert!(text.contains("🚨 CRITICAL: dashboard is unhealthy"));
        assert!(text.contains("memory at 91.0% (threshold 85%)"));
    }

    #[test]
    fn quick_render_uses_local_time() {
        let text = report(1, None, None).render_quick(chrono_tz::Asia::Tokyo);
        assert!(text.contains("⏰ 21:00"));
        assert!(text.contains("❌ Failed: 1"));
    }

    #[rstest]
    #[case(0, "0 B")]
    #[case(512, "512 B")]
    #[case(1536, "1.5 KiB")]
    #[case(5 * 1024 * 1024 * 1024, "5.0 GiB")]
    fn bytes_are_human_readable(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_bytes(bytes), expected);
    }

    #[tokio::test]
    async fn capture_returns_finite_percentages() {
        let snap = SystemSnapshot::capture().await;
        assert!(snap.memory_used_percent.is_finite());
        assert!(snap.cpu_used_percent.is_finite());
        assert!(snap.disk_used_percent.is_finite());
    }
}
