use std::time::Duration;

use anyhow::{Context, Result};

use {
    chrono::{DateTime, TimeDelta, Utc},
    chrono_tz::Tz,
    hunter_scheduler::{
        ExecutionRecord, ExecutionStatus, ExecutionStore,
        parse::format_duration,
        store::reconcile_interrupted,
        types::{ExecutionFilter, ExecutionSummary},
    },
};

use crate::app::{App, LoadedConfig, Overrides};

/// `hunter history`: newest executions first.
pub async fn history(
    overrides: &Overrides,
    job: Option<String>,
    status: Option<ExecutionStatus>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let loaded = LoadedConfig::load(overrides)?;
    let store = loaded.open_store().await?;
    let mut filter = ExecutionFilter::latest(limit);
    filter.job_name = job;
    filter.status = status;
    let records = store.recent(&filter).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", render_history(&records, loaded.config.timezone()?));
    }
    Ok(())
}

/// `hunter stats`: per-job success rate and durations over the last `hours`.
pub async fn stats(
    overrides: &Overrides,
    job: Option<String>,
    hours: u32,
    json: bool,
) -> Result<()> {
    let app = App::build(overrides).await?;
    let since = Utc::now() - TimeDelta::hours(i64::from(hours));
    let names = match job {
        Some(name) => vec![name],
        None => app.registry.list_jobs(None).into_iter().map(|j| j.name).collect(),
    };

    let mut summaries = Vec::with_capacity(names.len());
    for name in &names {
        summaries.push(app.store.summary(name, since).await?);
    }
    let failures = app.store.failed_since(since).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "since": since,
                "jobs": summaries,
                "failures": failures,
            }))?
        );
    } else {
        print!("{}", render_stats(&summaries, hours));
        if !failures.is_empty() {
            println!("\nFailures:");
            print!("{}", render_history(&failures, app.loaded.config.timezone()?));
        }
    }
    Ok(())
}

/// `hunter reconcile`: close records left `running` by a dead process.
///
/// Every `running` record older than `older_than` is closed, including
/// those of a scheduler that is still alive.
pub async fn reconcile(overrides: &Overrides, older_than: Option<Duration>) -> Result<()> {
    let loaded = LoadedConfig::load(overrides)?;
    let store = loaded.open_store().await?;
    let cutoff = reconcile_cutoff(Utc::now(), older_than)?;
    let closed = reconcile_interrupted(store.as_ref(), cutoff).await?;
    println!("Marked {closed} execution(s) started before {cutoff} as interrupted.");
    Ok(())
}

fn reconcile_cutoff(now: DateTime<Utc>, older_than: Option<Duration>) -> Result<DateTime<Utc>> {
    let Some(age) = older_than else {
        return Ok(now);
    };
    TimeDelta::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("--older-than {} is out of range", format_duration(age)))
}

pub fn render_history(records: &[ExecutionRecord], tz: Tz) -> String {
    if records.is_empty() {
        return "No executions recorded.\n".to_string();
    }
    let width = records.iter().map(|r| r.job_name.len()).max().unwrap_or(0).max(3);
    let mut out = String::new();
    for r in records {
        let started = r.started_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S");
        let duration = r
            .duration_seconds
            .map(|s| format_duration(Duration::from_secs_f64(s.max(0.0))))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{started}  {:<width$}  {:<11}  {duration:>8}",
            r.job_name,
            r.status.as_str(),
        ));
        if let Some(err) = &r.error_message {
            out.push_str(&format!("  {}", err.lines().next().unwrap_or_default()));
        }
        out.push('\n');
    }
    out
}

pub fn render_stats(summaries: &[ExecutionSummary], hours: u32) -> String {
    let mut out = format!("Last {hours}h\n");
    let width = summaries
        .iter()
        .map(|s| s.job_name.len())
        .max()
        .unwrap_or(0)
        .max(3);
    out.push_str(&format!(
        "{:<width$}  {:>5}  {:>5}  {:>7}  {:>8}  {:>8}\n",
        "JOB", "RUNS", "OK", "RATE", "AVG", "MAX"
    ));
    for s in summaries {
        let secs = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.1}s"));
        out.push_str(&format!(
            "{:<width$}  {:>5}  {:>5}  {:>6.1}%  {:>8}  {:>8}\n",
            s.job_name,
            s.total_runs,
            s.successful_runs,
            s.success_rate,
            secs(s.avg_duration),
            secs(s.max_duration),
        ));
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone};

    fn record(name: &str, status: ExecutionStatus, error: Option<&str>) -> ExecutionRecord {
        ExecutionRecord {
            id: 1,
            job_name: name.into(),
            category: "maintenance".into(),
            started_at: Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap(),
            completed_at: None,
            status,
            duration_seconds: Some(75.0),
            error_message: error.map(Into::into),
            error_detail: None,
            metadata: None,
        }
    }

    #[test]
    fn history_lines_show_local_time_and_first_error_line() {
        let out = render_history(
            &[record(
                "backup",
                ExecutionStatus::Failed,
                Some("exit 2\nstack"),
            )],
            chrono_tz::Europe::Berlin,
        );
        assert!(out.starts_with("2026-07-01 12:00:00  backup"), "{out}");
        assert!(out.contains("failed"));
        assert!(out.trim_end().ends_with("exit 2"), "{out}");
    }

    #[test]
    fn reconcile_cutoff_respects_age() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap();
        assert_eq!(reconcile_cutoff(now, None).unwrap(), now);
        assert_eq!(
            reconcile_cutoff(now, Some(Duration::from_secs(7200))).unwrap(),
            Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap()
        );
        assert!(reconcile_cutoff(now, Some(Duration::MAX)).is_err());
    }

    #[test]
    fn empty_history() {
        assert_eq!(render_history(&[], chrono_tz::UTC), "No executions recorded.\n");
    }

    #[test]
    fn stats_table_has_one_row_per_job() {
        let out = render_stats(
            &[ExecutionSummary {
                job_name: "fetch".into(),
                total_runs: 4,
                successful_runs: 3,
                success_rate: 75.0,
                avg_duration: Some(1.25),
                max_duration: Some(2.0),
                min_duration: Some(0.5),
            }],
            24,
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Last 24h");
        assert!(lines[2].starts_with("fetch"));
        assert!(lines[2].contains("75.0%"));
        assert!(lines[2].contains("1.2s") || lines[2].contains("1.3s"));
    }
}
