//! Composition root: turns the loaded config into wired services.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    secrecy::ExposeSecret,
    tracing::{debug, info},
};

use {
    hunter_config::HunterConfig,
    hunter_scheduler::{
        Clock, ExecutionStore, JobRegistry, Notifier, ProcessSupervisor, SystemClock,
        notify::{FanoutNotifier, LogNotifier},
        store_sqlite::SqliteStore,
    },
    hunter_telegram::{TelegramNotifier, TelegramNotifierConfig},
};

use crate::{
    builtin_jobs::{self, BuiltinContext},
    command_job,
    process::CommandProcess,
};

/// Paths given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

/// Loaded config plus where it came from.
pub struct LoadedConfig {
    pub config: HunterConfig,
    pub path: Option<PathBuf>,
    pub data_dir: PathBuf,
}

impl LoadedConfig {
    pub fn load(overrides: &Overrides) -> anyhow::Result<Self> {
        let (config, path) = hunter_config::discover_and_load(overrides.config.as_deref())?;
        match &path {
            Some(p) => info!(path = %p.display(), "loaded config"),
            None => info!("no config file found, using defaults"),
        }
        let data_dir = overrides
            .data_dir
            .clone()
            .unwrap_or_else(hunter_config::data_dir);
        Ok(Self {
            config,
            path,
            data_dir,
        })
    }

    /// Open the execution database, creating the data dir when the default
    /// location is used.
    pub async fn open_store(&self) -> anyhow::Result<Arc<SqliteStore>> {
        if self.config.history.database.is_none() {
            std::fs::create_dir_all(&self.data_dir).with_context(|| {
                format!("failed to create data dir {}", self.data_dir.display())
            })?;
        }
        let url = self.config.history.database_url(&self.data_dir);
        debug!(%url, "opening execution database");
        let store = SqliteStore::new(&url)
            .await
            .with_context(|| format!("failed to open execution database {url}"))?;
        Ok(Arc::new(store))
    }

    /// Log sink, plus Telegram when enabled.
    pub fn notifier(&self) -> anyhow::Result<Arc<dyn Notifier>> {
        let mut fanout = FanoutNotifier::default().with(Arc::new(LogNotifier));
        let tg = &self.config.telegram;
        if tg.enabled {
            let token = tg
                .bot_token
                .as_ref()
                .map(|t| t.expose_secret().clone())
                .unwrap_or_default();
            let mut cfg = TelegramNotifierConfig::new(token, tg.chat_id.clone().unwrap_or_default())
                .with_timeout(self.config.telegram_timeout()?)
                .with_timezone(self.config.timezone()?);
            if let Some(url) = &tg.api_url {
                cfg = cfg.with_api_url(url);
            }
            fanout = fanout.with(Arc::new(
                TelegramNotifier::new(&cfg).context("telegram notifier")?,
            ));
            info!("telegram notifications enabled");
        } else {
            debug!("telegram notifications disabled");
        }
        Ok(Arc::new(fanout))
    }
}

/// Everything the scheduler needs, with every job registered.
pub struct App {
    pub loaded: LoadedConfig,
    pub store: Arc<SqliteStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<JobRegistry>,
    pub supervisor: Option<Arc<ProcessSupervisor>>,
}

impl App {
    pub async fn build(overrides: &Overrides) -> anyhow::Result<Self> {
        let loaded = LoadedConfig::load(overrides)?;
        let store = loaded.open_store().await?;
        let notifier = loaded.notifier()?;
        Self::assemble(loaded, store, notifier, Arc::new(SystemClock))
    }

    pub fn assemble(
        loaded: LoadedConfig,
        store: Arc<SqliteStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let config = &loaded.config;

        let supervisor = config
            .supervisor
            .as_ref()
            .map(|section| -> anyhow::Result<_> {
                let process = CommandProcess::from_section(section)?;
                Ok(Arc::new(ProcessSupervisor::new(
                    Arc::new(process),
                    section.supervisor_config()?,
                    Arc::clone(&notifier),
                    Arc::clone(&clock),
                )))
            })
            .transpose()?;

        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&store) as Arc<dyn ExecutionStore>,
            Arc::clone(&notifier),
            Arc::clone(&clock),
            config.registry_config()?,
        ));

        if config.scheduler.builtin_jobs {
            let ctx = BuiltinContext {
                store: Arc::clone(&store) as Arc<dyn ExecutionStore>,
                notifier: Arc::clone(&notifier),
                clock: Arc::clone(&clock),
                retention_days: config.history.retention_days,
                thresholds: config.heartbeat.thresholds(),
                supervisor: supervisor.clone(),
            };
            for def in builtin_jobs::definitions(&ctx) {
                registry.register(def)?;
            }
        }
        for entry in &config.jobs {
            let def = command_job::definition(entry)
                .with_context(|| format!("job '{}'", entry.name))?;
            registry.register(def)?;
        }

        info!(jobs = registry.len(), "jobs registered");

        Ok(Self {
            loaded,
            store,
            notifier,
            clock,
            registry,
            supervisor,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        hunter_config::JobEntry,
        hunter_scheduler::{ScheduleSpec, notify::MemoryNotifier},
    };

    async fn loaded(config: HunterConfig) -> (LoadedConfig, Arc<SqliteStore>) {
        let loaded = LoadedConfig {
            config,
            path: None,
            data_dir: PathBuf::from("."),
        };
        let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
        (loaded, store)
    }

    fn entry(name: &str, deps: &[&str]) -> JobEntry {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "command": "true",
            "schedule": { "type": "daily", "time": "09:00" },
            "dependencies": deps,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn registers_builtins_and_configured_jobs() {
        let mut config = HunterConfig::default();
        config.jobs = vec![entry("fetch", &[]), entry("digest", &["fetch"])];
        let (loaded, store) = loaded(config).await;

        let app = App::assemble(
            loaded,
            store,
            Arc::new(MemoryNotifier::new()),
            Arc::new(SystemClock),
        )
        .unwrap();
        assert!(app.registry.contains("prune_history"));
        assert!(app.registry.contains("resource_monitor"));
        assert!(!app.registry.contains("process_health"));
        assert!(app.registry.contains("digest"));
        assert_eq!(app.registry.len(), 4);
        assert!(app.registry.dangling_dependencies().is_empty());
    }

    #[tokio::test]
    async fn builtins_can_be_turned_off() {
        let mut config = HunterConfig::default();
        config.scheduler.builtin_jobs = false;
        config.jobs = vec![entry("only", &[])];
        let (loaded, store) = loaded(config).await;

        let app = App::assemble(
            loaded,
            store,
            Arc::new(MemoryNotifier::new()),
            Arc::new(SystemClock),
        )
        .unwrap();
        assert_eq!(app.registry.len(), 1);
    }

    #[tokio::test]
    async fn bad_schedule_fails_assembly() {
        let mut config = HunterConfig::default();
        let mut job = entry("broken", &[]);
        job.schedule = ScheduleSpec::daily("25:99");
        config.jobs = vec![job];
        let (loaded, store) = loaded(config).await;

        let result = App::assemble(
            loaded,
            store,
            Arc::new(MemoryNotifier::new()),
            Arc::new(SystemClock),
        );
        assert!(result.is_err());
    }

    #[test]
    fn telegram_without_credentials_is_an_error() {
        let mut config = HunterConfig::default();
        config.telegram.enabled = true;
        let loaded = LoadedConfig {
            config,
            path: None,
            data_dir: PathBuf::from("."),
        };
        assert!(loaded.notifier().is_err());
    }
}
