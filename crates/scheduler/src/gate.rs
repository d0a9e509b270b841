//! Dependency gate: a job may only run when every dependency succeeded
//! recently enough.

use std::{collections::HashMap, fmt, time::Duration};

use {
    chrono::{DateTime, TimeDelta, Utc},
    serde::Serialize,
};

use crate::stats::JobStatistics;

/// Default freshness window for dependency successes (2 hours).
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

/// Why a gate passed or which dependency blocked it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Satisfied,
    /// The dependency name is not registered.
    UnknownDependency { dependency: String },
    /// The dependency is registered but has never succeeded.
    NeverSucceeded { dependency: String },
    /// The dependency's last success is older than the freshness window.
    Stale {
        dependency: String,
        last_success: DateTime<Utc>,
    },
}

impl GateDecision {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }

    pub fn blocking_dependency(&self) -> Option<&str> {
        match self {
            Self::Satisfied => None,
            Self::UnknownDependency { dependency }
            | Self::NeverSucceeded { dependency }
            | Self::Stale { dependency, .. } => Some(dependency),
        }
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied => f.write_str("dependencies satisfied"),
            Self::UnknownDependency { dependency } => {
                write!(f, "dependency '{dependency}' is not registered")
            },
            Self::NeverSucceeded { dependency } => {
                write!(f, "dependency '{dependency}' has never succeeded")
            },
            Self::Stale {
                dependency,
                last_success,
            } => write!(
                f,
                "dependency '{dependency}' last succeeded at {}",
                last_success.to_rfc3339()
            ),
        }
    }
}

/// Evaluates dependency recency against the in-memory statistics.
#[derive(Debug, Clone, Copy)]
pub struct DependencyGate {
    freshness: TimeDelta,
}

impl Default for DependencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW)
    }
}

impl DependencyGate {
    pub fn new(freshness: Duration) -> Self {
        Self {
            freshness: TimeDelta::from_std(freshness).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn freshness(&self) -> TimeDelta {
        self.freshness
    }

    /// Check `dependencies` in order and report the first one that blocks.
    ///
    /// Only recency is checked: a success exactly at the window edge still
    /// counts, and the dependency's output is never inspected.
    pub fn evaluate(
        &self,
        dependencies: &[String],
        stats: &HashMap<String, JobStatistics>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        for dependency in dependencies {
            let Some(dep_stats) = stats.get(dependency) else {
                return GateDecision::UnknownDependency {
                    dependency: dependency.clone(),
                };
            };
            let Some(last_success) = dep_stats.last_success else {
                return GateDecision::NeverSucceeded {
                    dependency: dependency.clone(),
                };
            };
            if now.signed_duration_since(last_success) > self.freshness {
                return GateDecision::Stale {
                    dependency: dependency.clone(),
                    last_success,
                };
            }
        }
        GateDecision::Satisfied
    }
}
