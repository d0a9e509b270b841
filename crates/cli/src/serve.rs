//! `hunter run`: the long-lived scheduler process.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

use {
    anyhow::{Context, anyhow},
    futures::FutureExt,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use {
    hunter_metrics::{MetricsRecorderConfig, gauge, init_metrics, labels, system},
    hunter_scheduler::{
        ExecutionStore, Notifier, NotifyLevel, ProcessSupervisor, SchedulerService,
        notify::notify_best_effort, store::reconcile_interrupted,
    },
};

use crate::{
    app::{App, Overrides},
    metrics_export::spawn_textfile_writer,
};

/// Run until SIGINT/SIGTERM. An `Err` means the scheduler crashed (error or
/// panic); a best-effort notification has already been sent.
pub async fn run(overrides: &Overrides) -> anyhow::Result<()> {
    let app = App::build(overrides).await?;
    let config = &app.loaded.config;
    let scheduler_config = config.scheduler_config()?;
    let cancel = CancellationToken::new();

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config
            .metrics
            .global_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
    .context("failed to install metrics recorder")?;
    gauge!(system::BUILD_INFO, labels::VERSION => env!("CARGO_PKG_VERSION")).set(1.0);
    let textfile = match (metrics, &config.metrics.textfile) {
        (Some(handle), Some(path)) => Some(spawn_textfile_writer(
            move || handle.render(),
            path.clone(),
            config.metrics_textfile_interval()?,
            cancel.child_token(),
        )),
        (None, Some(path)) => {
            warn!(path = %path.display(), "metrics.textfile is set but metrics are disabled");
            None
        },
        _ => None,
    };

    if config.scheduler.reconcile_on_startup {
        let store: &dyn ExecutionStore = app.store.as_ref();
        if let Err(e) = reconcile_interrupted(store, app.clock.now()).await {
            warn!(error = %e, "could not reconcile interrupted executions");
        }
    }

    if let Some(supervisor) = &app.supervisor
        && !supervisor.start().await
    {
        warn!(process = %supervisor.name(), "supervised process failed to start");
    }

    let service = SchedulerService::new(
        Arc::clone(&app.registry),
        scheduler_config,
        app.supervisor.clone(),
    );

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let result = drive(
        service.run(cancel.clone()),
        app.supervisor.as_deref(),
        app.notifier.as_ref(),
    )
    .await;
    cancel.cancel();

    if let Some(task) = textfile
        && let Err(e) = task.await
    {
        warn!(error = %e, "metrics writer task failed");
    }

    if result.is_ok() {
        info!("hunter stopped cleanly");
    }
    result
}

/// Await the scheduler loop, then stop the supervised process. An error or a
/// panic escaping the loop sends a crash notification and becomes `Err`.
async fn drive<F>(
    service: F,
    supervisor: Option<&ProcessSupervisor>,
    notifier: &dyn Notifier,
) -> anyhow::Result<()>
where
    F: Future<Output = hunter_scheduler::Result<()>>,
{
    let result = AssertUnwindSafe(service).catch_unwind().await;

    if let Some(supervisor) = supervisor {
        supervisor.stop().await;
    }

    let crash = match result {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => anyhow::Error::from(e),
        Err(payload) => anyhow!("panicked: {}", panic_text(payload.as_ref())),
    };
    error!(error = %crash, "scheduler crashed");
    let delivered = AssertUnwindSafe(notify_best_effort(
        notifier,
        &format!("Scheduler crashed: {crash}"),
        NotifyLevel::Error,
    ))
    .catch_unwind()
    .await;
    if delivered.is_err() {
        warn!("crash notification panicked");
    }
    Err(crash)
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        hunter_config::SupervisorSection,
        hunter_scheduler::{ProcessState, SupervisorConfig, SystemClock, notify::MemoryNotifier},
    };

    use crate::process::CommandProcess;

    struct PanickingNotifier;

    async fn exploding_tick() -> hunter_scheduler::Result<()> {
        panic!("snapshot exploded")
    }

    #[async_trait]
    impl Notifier for PanickingNotifier {
        async fn notify(&self, _: &str, _: NotifyLevel) -> hunter_scheduler::Result<()> {
            panic!("notifier exploded")
        }
    }

    async fn running_sleeper(notifier: Arc<dyn Notifier>) -> ProcessSupervisor {
        let section = SupervisorSection {
            name: "sleeper".into(),
            command: "sleep".into(),
            args: vec!["30".into()],
            ..SupervisorSection::default()
        };
        let supervisor = ProcessSupervisor::new(
            Arc::new(CommandProcess::from_section(&section).unwrap()),
            SupervisorConfig::default(),
            notifier,
            Arc::new(SystemClock),
        );
        assert!(supervisor.start().await);
        supervisor
    }

    #[tokio::test]
    async fn clean_exit_stops_supervised_process() {
        let notifier = Arc::new(MemoryNotifier::new());
        let supervisor = running_sleeper(notifier.clone()).await;

        drive(async { Ok(()) }, Some(&supervisor), notifier.as_ref())
            .await
            .unwrap();
        assert_eq!(supervisor.state(), ProcessState::Stopped);
        assert_eq!(notifier.count(NotifyLevel::Error), 0);
    }

    #[tokio::test]
    async fn loop_error_notifies_crash() {
        let notifier = MemoryNotifier::new();
        let err = drive(
            async { Err(hunter_scheduler::Error::message("tick failed")) },
            None,
            &notifier,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("tick failed"));
        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, NotifyLevel::Error);
        assert!(messages[0].1.starts_with("Scheduler crashed: "));
    }

    #[tokio::test]
    async fn loop_panic_takes_crash_path() {
        let notifier = Arc::new(MemoryNotifier::new());
        let supervisor = running_sleeper(notifier.clone()).await;

        let err = drive(exploding_tick(), Some(&supervisor), notifier.as_ref())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("snapshot exploded"), "{err}");
        assert_eq!(supervisor.state(), ProcessState::Stopped);
        assert!(
            notifier
                .messages()
                .iter()
                .any(|(level, msg)| *level == NotifyLevel::Error
                    && msg.contains("Scheduler crashed: panicked: snapshot exploded"))
        );
    }

    #[tokio::test]
    async fn panicking_notifier_still_exits_with_error() {
        let notifier = PanickingNotifier;
        let result = drive(
            async {
                notifier.notify("scheduler started", NotifyLevel::Info).await?;
                Ok(())
            },
            None,
            &notifier,
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("notifier exploded"), "{err}");
    }
}
