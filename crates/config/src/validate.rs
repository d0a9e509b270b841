//! Config validation: syntax, unknown (likely misspelled) keys, type errors
//! and semantic checks on the parsed config.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    path::{Path, PathBuf},
};

use hunter_scheduler::service::MAX_TICK_INTERVAL;

use crate::{
    env_subst::{substitute_env, unresolved_placeholders},
    loader::{find_config_file, parse_config, parse_config_value},
    schema::{HunterConfig, duration_field},
};

/// Names of the jobs the binary registers when `scheduler.builtin_jobs` is on.
pub const BUILTIN_JOB_NAMES: &[&str] = &["prune_history", "resource_monitor", "process_health"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "invalid-value", "env",
    /// "dependency" or "file-ref".
    pub category: &'static str,
    /// Dotted path, e.g. `jobs[2].schedule.time`.
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Expected shape of the config tree.
enum Shape {
    Struct(BTreeMap<&'static str, Shape>),
    /// Free-form keys with leaf values (`env`, `global_labels`).
    StringMap,
    Array(Box<Shape>),
    Leaf,
}

fn struct_of<const N: usize>(fields: [(&'static str, Shape); N]) -> Shape {
    Shape::Struct(BTreeMap::from(fields))
}

fn leaves(names: &[&'static str]) -> Vec<(&'static str, Shape)> {
    names.iter().map(|n| (*n, Shape::Leaf)).collect()
}

fn schema_shape() -> Shape {
    use Shape::{Array, Leaf, StringMap, Struct};

    let scheduler = Struct(
        leaves(&[
            "tick_interval",
            "timezone",
            "max_concurrent_jobs",
            "freshness_window",
            "shutdown_grace",
            "reconcile_on_startup",
            "builtin_jobs",
        ])
        .into_iter()
        .collect(),
    );
    let heartbeat = Struct(
        leaves(&[
            "enabled",
            "every",
            "quick_every",
            "include_system",
            "memory_threshold",
            "cpu_threshold",
            "disk_threshold",
        ])
        .into_iter()
        .collect(),
    );
    let history = Struct(
        leaves(&["database", "retention_days"])
            .into_iter()
            .collect(),
    );
    let telegram = Struct(
        leaves(&["enabled", "bot_token", "chat_id", "api_url", "timeout"])
            .into_iter()
            .collect(),
    );
    let mut supervisor: BTreeMap<_, _> = leaves(&[
        "name",
        "command",
        "args",
        "working_dir",
        "health_url",
        "health_check_interval",
        "startup_timeout",
        "unhealthy_threshold",
        "max_restarts_per_hour",
        "base_backoff",
        "max_backoff",
        "circuit_breaker_threshold",
        "circuit_cooldown",
    ])
    .into_iter()
    .collect();
    supervisor.insert("env", StringMap);

    let mut metrics: BTreeMap<_, _> = leaves(&["enabled", "textfile", "textfile_interval"])
        .into_iter()
        .collect();
    metrics.insert("global_labels", StringMap);

    let schedule = Struct(
        leaves(&["type", "minute", "time", "day", "value", "unit"])
            .into_iter()
            .collect(),
    );
    let mut job: BTreeMap<_, _> = leaves(&[
        "name",
        "command",
        "args",
        "working_dir",
        "timeout",
        "category",
        "priority",
        "description",
        "dependencies",
        "allow_overlap",
        "enabled",
    ])
    .into_iter()
    .collect();
    job.insert("schedule", schedule);
    job.insert("env", StringMap);

    struct_of([
        ("scheduler", scheduler),
        ("heartbeat", heartbeat),
        ("history", history),
        ("telegram", telegram),
        ("supervisor", Struct(supervisor)),
        ("metrics", Struct(metrics)),
        ("jobs", Array(Box::new(Struct(job)))),
        ("$schema", Leaf),
    ])
}

/// Edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Closest candidate within three edits.
fn suggest<'a>(needle: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .map(|c| (c, levenshtein(needle, c)))
        .filter(|(_, d)| (1..=3).contains(d))
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn check_unknown_fields(
    value: &serde_json::Value,
    shape: &Shape,
    prefix: &str,
    out: &mut Vec<Diagnostic>,
) {
    match (value, shape) {
        (serde_json::Value::Object(map), Shape::Struct(fields)) => {
            for (key, child) in map {
                let path = join_path(prefix, key);
                match fields.get(key.as_str()) {
                    Some(child_shape) => check_unknown_fields(child, child_shape, &path, out),
                    None => {
                        let message = match suggest(key, fields.keys().copied()) {
                            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                            None => "unknown field".to_string(),
                        };
                        out.push(Diagnostic::new(
                            Severity::Error,
                            "unknown-field",
                            path,
                            message,
                        ));
                    },
                }
            }
        },
        (serde_json::Value::Array(items), Shape::Array(item_shape)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_shape, &format!("{prefix}[{i}]"), out);
            }
        },
        // Leaves, string maps and type mismatches; the typed parse reports
        // the latter.
        _ => {},
    }
}

/// Warn about `${VAR}` placeholders whose variable is not set. Comments are
/// never seen here, only parsed values.
fn check_unresolved_env(value: &serde_json::Value, prefix: &str, out: &mut Vec<Diagnostic>) {
    match value {
        serde_json::Value::String(s) => {
            for name in unresolved_placeholders(s) {
                out.push(Diagnostic::new(
                    Severity::Warning,
                    "env",
                    prefix,
                    format!("environment variable {name} is not set"),
                ));
            }
        },
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                check_unresolved_env(child, &join_path(prefix, key), out);
            }
        },
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_unresolved_env(item, &format!("{prefix}[{i}]"), out);
            }
        },
        _ => {},
    }
}

/// Validate the file at `path`, or the discovered config when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(path) = path.map(Path::to_path_buf).or_else(find_config_file) else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&path) {
        Ok(raw) => validate_str(&raw, &path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "file-ref",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(path);
    result
}

/// Validate raw config text. `path` only selects the format by extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let raw = substitute_env(raw);

    let value = match parse_config_value(&raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("parse error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unresolved_env(&value, "", &mut diagnostics);
    check_unknown_fields(&value, &schema_shape(), "", &mut diagnostics);

    match parse_config(&raw, path) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn invalid(out: &mut Vec<Diagnostic>, path: impl Into<String>, message: impl Into<String>) {
    out.push(Diagnostic::new(
        Severity::Error,
        "invalid-value",
        path,
        message,
    ));
}

fn check_duration(out: &mut Vec<Diagnostic>, path: &str, value: &str) {
    if let Err(e) = duration_field(path, value) {
        invalid(out, path, e.to_string());
    }
}

/// Semantic checks on a config that deserialized cleanly.
pub fn check_semantics(config: &HunterConfig, out: &mut Vec<Diagnostic>) {
    let sched = &config.scheduler;
    match duration_field("scheduler.tick_interval", &sched.tick_interval) {
        Ok(tick) if tick > MAX_TICK_INTERVAL => invalid(
            out,
            "scheduler.tick_interval",
            "must be at most 60s or minute-granular schedules can be missed",
        ),
        Ok(_) => {},
        Err(e) => invalid(out, "scheduler.tick_interval", e.to_string()),
    }
    check_duration(out, "scheduler.freshness_window", &sched.freshness_window);
    check_duration(out, "scheduler.shutdown_grace", &sched.shutdown_grace);
    if let Err(e) = config.timezone() {
        invalid(out, "scheduler.timezone", e.to_string());
    }
    if sched.max_concurrent_jobs == 0 {
        invalid(out, "scheduler.max_concurrent_jobs", "must be at least 1");
    }

    let hb = &config.heartbeat;
    check_duration(out, "heartbeat.every", &hb.every);
    check_duration(out, "heartbeat.quick_every", &hb.quick_every);
    for (name, value) in [
        ("heartbeat.memory_threshold", hb.memory_threshold),
        ("heartbeat.cpu_threshold", hb.cpu_threshold),
        ("heartbeat.disk_threshold", hb.disk_threshold),
    ] {
        if !(value > 0.0 && value <= 100.0) {
            out.push(Diagnostic::new(
                Severity::Warning,
                "invalid-value",
                name,
                format!("{value} is not a percentage in (0, 100]"),
            ));
        }
    }

    if config.history.retention_days == 0 {
        out.push(Diagnostic::new(
            Severity::Warning,
            "invalid-value",
            "history.retention_days",
            "0 prunes all finished runs every day",
        ));
    }

    let tg = &config.telegram;
    check_duration(out, "telegram.timeout", &tg.timeout);
    if tg.enabled {
        if tg.bot_token.is_none() {
            invalid(out, "telegram.bot_token", "required when telegram is enabled");
        }
        if tg.chat_id.as_deref().is_none_or(str::is_empty) {
            invalid(out, "telegram.chat_id", "required when telegram is enabled");
        }
    }

    if let Some(sup) = &config.supervisor {
        if sup.command.trim().is_empty() {
            invalid(out, "supervisor.command", "must not be empty");
        }
        if !(sup.health_url.starts_with("http://") || sup.health_url.starts_with("https://")) {
            invalid(out, "supervisor.health_url", "must be an http(s) URL");
        }
        for (field, value) in [
            ("health_check_interval", &sup.health_check_interval),
            ("startup_timeout", &sup.startup_timeout),
            ("base_backoff", &sup.base_backoff),
            ("max_backoff", &sup.max_backoff),
            ("circuit_cooldown", &sup.circuit_cooldown),
        ] {
            check_duration(out, &format!("supervisor.{field}"), value);
        }
    }

    let m = &config.metrics;
    check_duration(out, "metrics.textfile_interval", &m.textfile_interval);
    if m.textfile.is_some() && !m.enabled {
        out.push(Diagnostic::new(
            Severity::Warning,
            "invalid-value",
            "metrics.textfile",
            "ignored while metrics.enabled = false",
        ));
    }

    check_jobs(config, out);
}

fn check_jobs(config: &HunterConfig, out: &mut Vec<Diagnostic>) {
    let mut known: HashSet<&str> = config.jobs.iter().map(|j| j.name.as_str()).collect();
    if config.scheduler.builtin_jobs {
        known.extend(BUILTIN_JOB_NAMES.iter().copied());
    }

    let mut seen = HashSet::new();
    for (i, job) in config.jobs.iter().enumerate() {
        let path = format!("jobs[{i}]");
        if job.name.trim().is_empty() {
            invalid(out, format!("{path}.name"), "must not be empty");
        } else if !seen.insert(job.name.as_str()) {
            invalid(
                out,
                format!("{path}.name"),
                format!("duplicate job name '{}'", job.name),
            );
        } else if config.scheduler.builtin_jobs && BUILTIN_JOB_NAMES.contains(&job.name.as_str())
        {
            invalid(
                out,
                format!("{path}.name"),
                format!("'{}' is reserved for a built-in job", job.name),
            );
        }
        if job.command.trim().is_empty() {
            invalid(out, format!("{path}.command"), "must not be empty");
        }
        if let Err(e) = job.schedule.validate() {
            invalid(out, format!("{path}.schedule"), e.to_string());
        }
        if let Err(e) = job.timeout() {
            invalid(out, format!("{path}.timeout"), e.to_string());
        }
        for dep in &job.dependencies {
            if dep == &job.name {
                invalid(
                    out,
                    format!("{path}.dependencies"),
                    "a job cannot depend on itself",
                );
            } else if !known.contains(dep.as_str()) {
                let hint = suggest(dep, known.iter().copied())
                    .map(|s| format!(" (did you mean \"{s}\"?)"))
                    .unwrap_or_default();
                out.push(Diagnostic::new(
                    Severity::Warning,
                    "dependency",
                    format!("{path}.dependencies"),
                    format!("'{dep}' is not a configured job; the job will never run{hint}"),
                ));
            }
        }
    }
}
