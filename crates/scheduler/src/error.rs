use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("a job named '{name}' is already registered")]
    DuplicateJob { name: String },

    #[error("unknown schedule type: {kind}")]
    UnknownScheduleType { kind: String },

    #[error("invalid {kind} schedule: {reason}")]
    InvalidSchedule { kind: String, reason: String },

    #[error("job not found: {name}")]
    JobNotFound { name: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn duplicate_job(name: impl Into<String>) -> Self {
        Self::DuplicateJob { name: name.into() }
    }

    #[must_use]
    pub fn unknown_schedule_type(kind: impl Into<String>) -> Self {
        Self::UnknownScheduleType { kind: kind.into() }
    }

    #[must_use]
    pub fn invalid_schedule(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn job_not_found(name: impl Into<String>) -> Self {
        Self::JobNotFound { name: name.into() }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
