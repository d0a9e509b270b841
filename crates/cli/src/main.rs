mod app;
mod builtin_jobs;
mod command_job;
mod config_commands;
mod history_commands;
mod job_commands;
mod metrics_export;
mod process;
mod serve;

use std::{path::PathBuf, time::Duration};

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use hunter_scheduler::{ExecutionStatus, JobCategory, parse::parse_duration};

use crate::app::Overrides;

#[derive(Parser)]
#[command(name = "hunter", version, about = "Hunter: scheduled job runner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/hunter/).
    #[arg(long, global = true, env = "HUNTER_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the execution database.
    #[arg(long, global = true, env = "HUNTER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler (default when no subcommand is provided).
    Run,
    /// List registered jobs.
    Jobs {
        /// Only jobs in this category.
        #[arg(long)]
        category: Option<JobCategory>,
        #[arg(long)]
        json: bool,
    },
    /// Show recent executions.
    History {
        /// Only runs of this job.
        #[arg(long)]
        job: Option<String>,
        /// Only runs with this status (running, success, failed, interrupted).
        #[arg(long)]
        status: Option<ExecutionStatus>,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Per-job success rates and durations.
    Stats {
        #[arg(long)]
        job: Option<String>,
        /// Window in hours.
        #[arg(long, default_value_t = 24)]
        hours: u32,
        #[arg(long)]
        json: bool,
    },
    /// Run one job immediately.
    RunJob {
        name: String,
        /// Run even if the job is disabled.
        #[arg(long)]
        force: bool,
    },
    /// Mark executions left running by a dead process as interrupted.
    ///
    /// Do not run this while `hunter run` is active without `--older-than`:
    /// its in-flight executions would be marked interrupted too.
    Reconcile {
        /// Only close executions started at least this long ago (e.g. "2h").
        #[arg(long, value_parser = parse_age)]
        older_than: Option<Duration>,
    },
    /// Validate the config file and report errors and warnings.
    Check {
        /// Show informational diagnostics too.
        #[arg(long)]
        verbose: bool,
    },
    /// Write a documented starter config.
    Init {
        /// Destination (default ./hunter.toml).
        path: Option<PathBuf>,
        /// IANA timezone for wall-clock schedules.
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn parse_age(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "hunter starting");

    let overrides = Overrides {
        config: cli.config.clone(),
        data_dir: cli.data_dir.clone(),
    };

    match cli.command {
        None | Some(Commands::Run) => serve::run(&overrides).await,
        Some(Commands::Jobs { category, json }) => {
            job_commands::list(&overrides, category, json).await
        },
        Some(Commands::History {
            job,
            status,
            limit,
            json,
        }) => history_commands::history(&overrides, job, status, limit, json).await,
        Some(Commands::Stats { job, hours, json }) => {
            history_commands::stats(&overrides, job, hours, json).await
        },
        Some(Commands::RunJob { name, force }) => {
            job_commands::run_job(&overrides, &name, force).await
        },
        Some(Commands::Reconcile { older_than }) => {
            history_commands::reconcile(&overrides, older_than).await
        },
        Some(Commands::Check { verbose }) => {
            config_commands::check(overrides.config.as_deref(), verbose)
        },
        Some(Commands::Init {
            path,
            timezone,
            force,
        }) => config_commands::init(path, &timezone, force).map(|_| ()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["hunter"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_history_filters() {
        let cli = Cli::try_parse_from([
            "hunter", "history", "--job", "backup", "--status", "failed", "-n", "5",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::History {
                job, status, limit, ..
            }) => {
                assert_eq!(job.as_deref(), Some("backup"));
                assert_eq!(status, Some(ExecutionStatus::Failed));
                assert_eq!(limit, 5);
            },
            _ => panic!("expected history"),
        }
    }

    #[test]
    fn reconcile_takes_an_age() {
        let cli = Cli::try_parse_from(["hunter", "reconcile", "--older-than", "2h"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Reconcile { older_than: Some(d) }) if d == Duration::from_secs(7200)
        ));
        let cli = Cli::try_parse_from(["hunter", "reconcile"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Reconcile { older_than: None })
        ));
        assert!(Cli::try_parse_from(["hunter", "reconcile", "--older-than", "soon"]).is_err());
    }

    #[test]
    fn rejects_unknown_category() {
        assert!(Cli::try_parse_from(["hunter", "jobs", "--category", "gardening"]).is_err());
    }
}
