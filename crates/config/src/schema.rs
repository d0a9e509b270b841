//! Config schema. Every section has serde defaults so an empty file is a
//! valid configuration.

use std::{collections::BTreeMap, path::PathBuf, str::FromStr, time::Duration};

use {
    chrono_tz::Tz,
    hunter_scheduler::{
        HeartbeatConfig, RegistryConfig, RestartPolicyConfig, ScheduleSpec, SchedulerConfig,
        SupervisorConfig, heartbeat::ResourceThresholds, parse::parse_duration,
        types::{JobCategory, JobPriority},
    },
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HunterConfig {
    pub scheduler: SchedulerSection,
    pub heartbeat: HeartbeatSection,
    pub history: HistorySection,
    pub telegram: TelegramSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<SupervisorSection>,
    pub metrics: MetricsSection,
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// How often the loop looks for due jobs. At most `60s`.
    pub tick_interval: String,
    /// IANA timezone wall-clock schedules are evaluated in.
    pub timezone: String,
    pub max_concurrent_jobs: usize,
    /// How recent a dependency's last success must be.
    pub freshness_window: String,
    pub shutdown_grace: String,
    /// Close records left `running` by a previous process at startup.
    pub reconcile_on_startup: bool,
    /// Register the maintenance and monitoring jobs that ship with hunter.
    pub builtin_jobs: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval: "1s".into(),
            timezone: "UTC".into(),
            max_concurrent_jobs: 8,
            freshness_window: "2h".into(),
            shutdown_grace: "30s".into(),
            reconcile_on_startup: true,
            builtin_jobs: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub enabled: bool,
    pub every: String,
    pub quick_every: String,
    pub include_system: bool,
    pub memory_threshold: f64,
    pub cpu_threshold: f64,
    pub disk_threshold: f64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        let thresholds = ResourceThresholds::default();
        Self {
            enabled: true,
            every: "30m".into(),
            quick_every: "10m".into(),
            include_system: true,
            memory_threshold: thresholds.memory_percent,
            cpu_threshold: thresholds.cpu_percent,
            disk_threshold: thresholds.disk_percent,
        }
    }
}

impl HeartbeatSection {
    pub fn thresholds(&self) -> ResourceThresholds {
        ResourceThresholds {
            memory_percent: self.memory_threshold,
            cpu_percent: self.cpu_threshold,
            disk_percent: self.disk_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    /// SQLite URL or file path. Defaults to `hunter.db` in the data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Terminal execution records older than this are pruned daily.
    pub retention_days: u32,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            database: None,
            retention_days: 30,
        }
    }
}

impl HistorySection {
    /// SQLite connection URL, resolving a bare path against `data_dir`.
    pub fn database_url(&self, data_dir: &std::path::Path) -> String {
        match self.database.as_deref() {
            Some(url) if url.starts_with("sqlite:") => url.to_string(),
            Some(path) => format!("sqlite:{path}"),
            None => format!("sqlite:{}", data_dir.join("hunter.db").display()),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub enabled: bool,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub bot_token: Option<Secret<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// Bot API base URL override, e.g. a local Bot API server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    pub timeout: String,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            chat_id: None,
            api_url: None,
            timeout: "10s".into(),
        }
    }
}

impl std::fmt::Debug for TelegramSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSection")
            .field("enabled", &self.enabled)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A long-running companion process kept alive by health checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Probed with GET; any 2xx is healthy.
    pub health_url: String,
    pub health_check_interval: String,
    pub startup_timeout: String,
    pub unhealthy_threshold: u32,
    pub max_restarts_per_hour: usize,
    pub base_backoff: String,
    pub max_backoff: String,
    pub circuit_breaker_threshold: u32,
    pub circuit_cooldown: String,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            name: "http-server".into(),
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            health_url: String::new(),
            health_check_interval: "30s".into(),
            startup_timeout: "30s".into(),
            unhealthy_threshold: 3,
            max_restarts_per_hour: 5,
            base_backoff: "30s".into(),
            max_backoff: "5m".into(),
            circuit_breaker_threshold: 3,
            circuit_cooldown: "15m".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    /// Write the Prometheus exposition here periodically (node-exporter
    /// textfile collector style).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub textfile: Option<PathBuf>,
    pub textfile_interval: String,
    pub global_labels: BTreeMap<String, String>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            textfile: None,
            textfile_interval: "60s".into(),
            global_labels: BTreeMap::new(),
        }
    }
}

/// An external command run on a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    pub name: String,
    pub schedule: ScheduleSpec,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Kill the command when it runs longer than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default = "default_category")]
    pub category: JobCategory,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub allow_overlap: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_category() -> JobCategory {
    JobCategory::Maintenance
}

fn default_true() -> bool {
    true
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Parse a duration field, naming the field on failure.
pub(crate) fn duration_field(path: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| Error::invalid_value(path, e.to_string()))
}

impl HunterConfig {
    pub fn timezone(&self) -> Result<Tz> {
        Tz::from_str(self.scheduler.timezone.trim()).map_err(|_| {
            Error::invalid_value(
                "scheduler.timezone",
                format!("unknown timezone '{}'", self.scheduler.timezone),
            )
        })
    }

    pub fn registry_config(&self) -> Result<RegistryConfig> {
        Ok(RegistryConfig {
            freshness_window: duration_field(
                "scheduler.freshness_window",
                &self.scheduler.freshness_window,
            )?,
            timezone: self.timezone()?,
            max_concurrent_jobs: self.scheduler.max_concurrent_jobs,
        })
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let hb = &self.heartbeat;
        Ok(SchedulerConfig {
            tick_interval: duration_field(
                "scheduler.tick_interval",
                &self.scheduler.tick_interval,
            )?,
            shutdown_grace: duration_field(
                "scheduler.shutdown_grace",
                &self.scheduler.shutdown_grace,
            )?,
            heartbeat: HeartbeatConfig {
                enabled: hb.enabled,
                every: duration_field("heartbeat.every", &hb.every)?,
                quick_every: duration_field("heartbeat.quick_every", &hb.quick_every)?,
                include_system: hb.include_system,
                thresholds: hb.thresholds(),
            },
        })
    }

    pub fn telegram_timeout(&self) -> Result<Duration> {
        duration_field("telegram.timeout", &self.telegram.timeout)
    }

    pub fn metrics_textfile_interval(&self) -> Result<Duration> {
        duration_field("metrics.textfile_interval", &self.metrics.textfile_interval)
    }
}

impl SupervisorSection {
    pub fn supervisor_config(&self) -> Result<SupervisorConfig> {
        Ok(SupervisorConfig {
            health_check_interval: duration_field(
                "supervisor.health_check_interval",
                &self.health_check_interval,
            )?,
            startup_timeout: duration_field("supervisor.startup_timeout", &self.startup_timeout)?,
            startup_poll_interval: Duration::from_secs(1),
            unhealthy_threshold: self.unhealthy_threshold.max(1),
            restart: RestartPolicyConfig {
                max_restarts_per_hour: self.max_restarts_per_hour,
                base_backoff: duration_field("supervisor.base_backoff", &self.base_backoff)?,
                max_backoff: duration_field("supervisor.max_backoff", &self.max_backoff)?,
                circuit_breaker_threshold: self.circuit_breaker_threshold.max(1),
                circuit_cooldown: duration_field(
                    "supervisor.circuit_cooldown",
                    &self.circuit_cooldown,
                )?,
            },
        })
    }
}

impl JobEntry {
    pub fn timeout(&self) -> Result<Option<Duration>> {
        self.timeout
            .as_deref()
            .map(|t| duration_field(&format!("jobs.{}.timeout", self.name), t))
            .transpose()
    }
}
