//! Core data types shared by the registry, the stores and the reporting views.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::stats::JobStatistics;

/// Reporting bucket for a job. Has no effect on scheduling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    DataIngestion,
    ContentGeneration,
    SocialPosting,
    WebsiteGeneration,
    Maintenance,
    Monitoring,
}

impl JobCategory {
    pub const ALL: [JobCategory; 6] = [
        Self::DataIngestion,
        Self::ContentGeneration,
        Self::SocialPosting,
        Self::WebsiteGeneration,
        Self::Maintenance,
        Self::Monitoring,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataIngestion => "data_ingestion",
            Self::ContentGeneration => "content_generation",
            Self::SocialPosting => "social_posting",
            Self::WebsiteGeneration => "website_generation",
            Self::Maintenance => "maintenance",
            Self::Monitoring => "monitoring",
        }
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown job category: {s}"))
    }
}

/// Informational priority. Recorded with every execution, never used to
/// reorder or preempt work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl JobPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a persisted execution record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    /// Left `running` by a process that died; set by startup reconciliation.
    Interrupted,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "interrupted" => Ok(Self::Interrupted),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One persisted run of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub id: i64,
    pub job_name: String,
    pub category: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Fields written when an execution is opened.
#[derive(Debug, Clone)]
pub struct ExecutionStart {
    pub job_name: String,
    pub category: JobCategory,
    pub started_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// The terminal update applied to a running execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub completed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
    pub duration_seconds: f64,
    /// Merged into the metadata recorded at start.
    pub metadata: Option<serde_json::Value>,
}

/// Query for [`crate::store::ExecutionStore::recent`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub job_name: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: usize,
}

impl ExecutionFilter {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_job(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub(crate) fn matches(&self, record: &ExecutionRecord) -> bool {
        self.job_name
            .as_deref()
            .is_none_or(|name| record.job_name == name)
            && self.status.is_none_or(|status| record.status == status)
    }
}

/// Aggregate over persisted executions of one job.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionSummary {
    pub job_name: String,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub success_rate: f64,
    pub avg_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub min_duration: Option<f64>,
}

/// Roll-up of the in-memory statistics of every job in one category.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryStats {
    pub category: JobCategory,
    pub total_jobs: usize,
    pub total_executions: u64,
    pub total_failures: u64,
    pub success_rate: f64,
    pub jobs: Vec<String>,
}

/// Read-only view of a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub category: JobCategory,
    pub priority: JobPriority,
    pub description: String,
    pub schedule: String,
    pub enabled: bool,
    pub allow_overlap: bool,
    pub dependencies: Vec<String>,
    pub next_run: Option<DateTime<Utc>>,
    pub stats: JobStatistics,
}

/// Registry-wide counters used by heartbeats and `status`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RegistryTotals {
    pub jobs: usize,
    pub enabled: usize,
    pub executions: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub last_run: Option<DateTime<Utc>>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in JobCategory::ALL {
            assert_eq!(category.as_str().parse::<JobCategory>().unwrap(), category);
        }
        assert!("gardening".parse::<JobCategory>().is_err());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&JobCategory::DataIngestion).unwrap();
        assert_eq!(json, "\"data_ingestion\"");
    }

    #[test]
    fn priority_defaults_to_medium() {
        assert_eq!(JobPriority::default(), JobPriority::Medium);
    }

    #[test]
    fn status_terminality() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Interrupted.is_terminal());
        assert_eq!(
            "interrupted".parse::<ExecutionStatus>().unwrap(),
            ExecutionStatus::Interrupted
        );
    }

    #[test]
    fn filter_matches_job_and_status() {
        let record = ExecutionRecord {
            id: 1,
            job_name: "a".into(),
            category: "maintenance".into(),
            started_at: Utc::now(),
            completed_at: None,
            status: ExecutionStatus::Failed,
            duration_seconds: None,
            error_message: None,
            error_detail: None,
            metadata: None,
        };
        assert!(ExecutionFilter::latest(10).matches(&record));
        assert!(ExecutionFilter::latest(10).for_job("a").matches(&record));
        assert!(!ExecutionFilter::latest(10).for_job("b").matches(&record));
        assert!(
            !ExecutionFilter::latest(10)
                .with_status(ExecutionStatus::Success)
                .matches(&record)
        );
    }
}
