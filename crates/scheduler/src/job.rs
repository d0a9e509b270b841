//! Job definitions as handed to the registry, and the validated spec it keeps.

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use serde_json::{Map, Value};

use crate::{
    Result,
    schedule::{JobSchedule, ScheduleSpec},
    types::{JobCategory, JobPriority},
};

/// Optional JSON result of a successful run, stored with the execution.
pub type JobOutput = Option<Value>;

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<JobOutput>> + Send>>;

/// Zero-argument async callable. Any `Err` or panic counts as a failure.
pub type JobAction = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure as a [`JobAction`].
pub fn action<F, Fut>(f: F) -> JobAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<JobOutput>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Everything needed to register a job.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub action: JobAction,
    pub schedule: ScheduleSpec,
    pub category: JobCategory,
    pub priority: JobPriority,
    pub description: String,
    pub dependencies: Vec<String>,
    pub allow_overlap: bool,
    pub enabled: bool,
    pub metadata: Map<String, Value>,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        schedule: ScheduleSpec,
        category: JobCategory,
        action: JobAction,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            schedule,
            category,
            priority: JobPriority::default(),
            description: String::new(),
            dependencies: Vec::new(),
            allow_overlap: false,
            enabled: true,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_allow_overlap(mut self, allow: bool) -> Self {
        self.allow_overlap = allow;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate the schedule and freeze the definition.
    pub(crate) fn into_spec(self) -> Result<(JobSpec, bool)> {
        let schedule = self.schedule.validate()?;
        let enabled = self.enabled;
        Ok((
            JobSpec {
                name: self.name,
                action: self.action,
                schedule,
                category: self.category,
                priority: self.priority,
                description: self.description,
                dependencies: self.dependencies,
                allow_overlap: self.allow_overlap,
                metadata: self.metadata,
            },
            enabled,
        ))
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("category", &self.category)
            .field("dependencies", &self.dependencies)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Immutable, validated job as owned by the registry.
pub struct JobSpec {
    pub name: String,
    pub(crate) action: JobAction,
    pub schedule: JobSchedule,
    pub category: JobCategory,
    pub priority: JobPriority,
    pub description: String,
    pub dependencies: Vec<String>,
    pub allow_overlap: bool,
    pub metadata: Map<String, Value>,
}

impl JobSpec {
    /// Metadata recorded when an execution opens.
    pub fn tracking_metadata(&self) -> Value {
        let mut meta = self.metadata.clone();
        meta.insert("priority".into(), Value::from(self.priority.as_str()));
        if !self.description.is_empty() {
            meta.insert("description".into(), Value::from(self.description.as_str()));
        }
        Value::Object(meta)
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("allow_overlap", &self.allow_overlap)
            .finish_non_exhaustive()
    }
}
