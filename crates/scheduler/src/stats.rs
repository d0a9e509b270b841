//! In-memory per-job execution statistics.

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
};

/// Counters for one job. Lives only in memory and resets on restart.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct JobStatistics {
    pub executions: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Seconds.
    pub total_duration: f64,
    /// Seconds.
    pub average_duration: f64,
}

impl JobStatistics {
    pub fn record_success(&mut self, at: DateTime<Utc>, duration_seconds: f64) {
        self.record(at, duration_seconds);
        self.last_success = Some(at);
    }

    pub fn record_failure(
        &mut self,
        at: DateTime<Utc>,
        duration_seconds: f64,
        error: impl Into<String>,
    ) {
        self.record(at, duration_seconds);
        self.failures += 1;
        self.last_failure = Some(at);
        self.last_error = Some(error.into());
    }

    fn record(&mut self, at: DateTime<Utc>, duration_seconds: f64) {
        self.executions += 1;
        self.last_run = Some(at);
        self.total_duration += duration_seconds;
        self.average_duration = self.total_duration / self.executions as f64;
    }

    pub fn successes(&self) -> u64 {
        self.executions.saturating_sub(self.failures)
    }

    /// Percentage of successful runs rounded to two decimals; 0 before the
    /// first run.
    pub fn success_rate(&self) -> f64 {
        success_rate(self.successes(), self.executions)
    }
}

/// `successes / total * 100`, rounded to two decimals. 0 when `total` is 0.
pub fn success_rate(successes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(successes as f64 / total as f64 * 100.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn counters_track_outcomes() {
        let mut stats = JobStatistics::default();
        stats.record_success(at("2026-01-05T09:00:00Z"), 2.0);
        stats.record_failure(at("2026-01-05T10:00:00Z"), 4.0, "boom");
        stats.record_success(at("2026-01-05T11:00:00Z"), 3.0);

        assert_eq!(stats.executions, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.successes(), 2);
        assert_eq!(stats.last_run, Some(at("2026-01-05T11:00:00Z")));
        assert_eq!(stats.last_success, Some(at("2026-01-05T11:00:00Z")));
        assert_eq!(stats.last_failure, Some(at("2026-01-05T10:00:00Z")));
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
        assert!((stats.total_duration - 9.0).abs() < f64::EPSILON);
        assert!((stats.average_duration - 3.0).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case(0, 0, 0.0)]
    #[case(3, 3, 100.0)]
    #[case(2, 3, 66.67)]
    #[case(1, 3, 33.33)]
    #[case(0, 4, 0.0)]
    fn test_success_rate(#[case] ok: u64, #[case] total: u64, #[case] expected: f64) {
        assert!((success_rate(ok, total) - expected).abs() < 1e-9);
    }

    #[test]
    fn rate_never_leaves_bounds() {
        let mut stats = JobStatistics::default();
        assert_eq!(stats.success_rate(), 0.0);
        for i in 0..7 {
            if i % 3 == 0 {
                stats.record_failure(Utc::now(), 0.1, "x");
            } else {
                stats.record_success(Utc::now(), 0.1);
            }
            let rate = stats.success_rate();
            assert!((0.0..=100.0).contains(&rate));
            assert!(stats.failures <= stats.executions);
        }
    }
}
