use anyhow::{Result, bail};

use {
    chrono_tz::Tz,
    hunter_scheduler::{JobCategory, RunOutcome, types::JobSummary},
};

use crate::app::{App, Overrides};

/// `hunter jobs`: registered jobs with their schedule and next fire time.
pub async fn list(overrides: &Overrides, category: Option<JobCategory>, json: bool) -> Result<()> {
    let app = App::build(overrides).await?;
    let jobs = app.registry.list_jobs(category);
    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
    } else {
        print!("{}", render_jobs(&jobs, app.registry.config().timezone));
    }
    Ok(())
}

/// `hunter run-job NAME`: run one job now, through the same guards as a
/// scheduled run. A failed run fails the command.
pub async fn run_job(overrides: &Overrides, name: &str, force: bool) -> Result<()> {
    let app = App::build(overrides).await?;
    let outcome = app.registry.run_now(name, force).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    match outcome {
        RunOutcome::Failed { error, .. } => bail!("{name} failed: {error}"),
        RunOutcome::Skipped { reason } => {
            eprintln!("{name} was skipped ({})", reason.as_str());
            Ok(())
        },
        RunOutcome::Succeeded { .. } => Ok(()),
    }
}

pub fn render_jobs(jobs: &[JobSummary], tz: Tz) -> String {
    if jobs.is_empty() {
        return "No jobs registered.\n".to_string();
    }
    let width = jobs.iter().map(|j| j.name.len()).max().unwrap_or(0).max(4);
    let mut out = format!(
        "{:<width$}  {:<18}  {:<8}  {:<30}  {}\n",
        "NAME", "CATEGORY", "PRIORITY", "SCHEDULE", "NEXT RUN"
    );
    for job in jobs {
        let next = match (job.enabled, job.next_run) {
            (false, _) => "disabled".to_string(),
            (true, Some(at)) => at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string(),
            (true, None) => "-".to_string(),
        };
        out.push_str(&format!(
            "{:<width$}  {:<18}  {:<8}  {:<30}  {next}\n",
            job.name,
            job.category.as_str(),
            job.priority.as_str(),
            job.schedule,
        ));
        if !job.dependencies.is_empty() {
            out.push_str(&format!(
                "{:<width$}  after: {}\n",
                "",
                job.dependencies.join(", ")
            ));
        }
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::{TimeZone, Utc},
        hunter_scheduler::{JobPriority, JobStatistics},
    };

    fn summary(name: &str, enabled: bool, deps: &[&str]) -> JobSummary {
        JobSummary {
            name: name.into(),
            category: JobCategory::DataIngestion,
            priority: JobPriority::High,
            description: String::new(),
            schedule: "daily at 09:00".into(),
            enabled,
            allow_overlap: false,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            next_run: Some(Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap()),
            stats: JobStatistics::default(),
        }
    }

    #[test]
    fn table_shows_next_run_in_zone() {
        let out = render_jobs(
            &[summary("fetch", true, &[]), summary("digest", false, &["fetch"])],
            chrono_tz::Europe::Berlin,
        );
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].starts_with("fetch"));
        assert!(lines[1].ends_with("2026-01-05 09:00 CET"), "{}", lines[1]);
        assert!(lines[2].ends_with("disabled"));
        assert!(lines[3].trim_start().starts_with("after: fetch"));
    }

    #[test]
    fn empty_table() {
        assert_eq!(render_jobs(&[], chrono_tz::UTC), "No jobs registered.\n");
    }
}
