//! Metric names and label keys.

/// Job registry and scheduler loop metrics
pub mod scheduler {
    /// Registered jobs
    pub const JOBS_REGISTERED: &str = "hunter_scheduler_jobs_registered";
    /// Jobs dispatched by the loop
    pub const DISPATCHED_TOTAL: &str = "hunter_scheduler_dispatched_total";
    /// Job runs that reached the action (labels: job, category)
    pub const EXECUTIONS_TOTAL: &str = "hunter_scheduler_executions_total";
    /// Failed job runs (labels: job, category)
    pub const ERRORS_TOTAL: &str = "hunter_scheduler_errors_total";
    /// Skipped job runs (labels: job, reason)
    pub const SKIPPED_TOTAL: &str = "hunter_scheduler_skipped_total";
    /// Job run duration in seconds (labels: job)
    pub const EXECUTION_DURATION_SECONDS: &str = "hunter_scheduler_execution_duration_seconds";
    /// Job tasks currently in flight
    pub const IN_FLIGHT: &str = "hunter_scheduler_in_flight";
    /// Execution store failures (labels: operation)
    pub const STORE_ERRORS_TOTAL: &str = "hunter_scheduler_store_errors_total";
    /// Records closed as interrupted by startup reconciliation
    pub const INTERRUPTED_TOTAL: &str = "hunter_scheduler_interrupted_total";
}

/// Supervised process metrics
pub mod supervisor {
    /// Process starts, including restarts
    pub const STARTS_TOTAL: &str = "hunter_supervisor_starts_total";
    /// Restarts (labels: success)
    pub const RESTARTS_TOTAL: &str = "hunter_supervisor_restarts_total";
    /// Failed health checks
    pub const HEALTH_CHECK_FAILURES_TOTAL: &str = "hunter_supervisor_health_check_failures_total";
    /// Restarts refused by the policy (rate limit or open circuit)
    pub const RESTARTS_DENIED_TOTAL: &str = "hunter_supervisor_restarts_denied_total";
    /// 1 while the circuit breaker is open
    pub const CIRCUIT_OPEN: &str = "hunter_supervisor_circuit_open";
}

/// Notification delivery metrics
pub mod notify {
    /// Notifications sent (labels: level)
    pub const SENT_TOTAL: &str = "hunter_notify_sent_total";
    /// Failed deliveries (labels: level)
    pub const FAILURES_TOTAL: &str = "hunter_notify_failures_total";
}

/// Telegram Bot API calls
pub mod telegram {
    /// Message chunks delivered
    pub const MESSAGES_SENT_TOTAL: &str = "hunter_telegram_messages_sent_total";
    /// Chunks resent as plain text after an HTML parse rejection
    pub const PLAIN_FALLBACK_TOTAL: &str = "hunter_telegram_plain_fallback_total";
    /// Failed API calls
    pub const ERRORS_TOTAL: &str = "hunter_telegram_errors_total";
}

/// Host resource gauges sampled by the heartbeat
pub mod system {
    pub const MEMORY_USED_PERCENT: &str = "hunter_system_memory_used_percent";
    pub const CPU_USED_PERCENT: &str = "hunter_system_cpu_used_percent";
    pub const DISK_USED_PERCENT: &str = "hunter_system_disk_used_percent";
    /// Build information (labels: version)
    pub const BUILD_INFO: &str = "hunter_build_info";
}

/// Common label keys used across metrics
pub mod labels {
    pub const JOB: &str = "job";
    pub const CATEGORY: &str = "category";
    pub const REASON: &str = "reason";
    pub const LEVEL: &str = "level";
    pub const OPERATION: &str = "operation";
    pub const SUCCESS: &str = "success";
    pub const VERSION: &str = "version";
}

/// Histogram buckets
pub mod buckets {
    /// Job durations: 100ms to 1 hour
    pub const JOB_DURATION: [f64; 12] = [
        0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
    ];
}
