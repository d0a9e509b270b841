use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Telegram(#[from] teloxide::RequestError),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error("invalid telegram api url '{url}': {reason}")]
    InvalidApiUrl { url: String, reason: String },

    #[error("telegram notifier is missing {field}")]
    MissingField { field: &'static str },
}

impl Error {
    #[must_use]
    pub fn invalid_api_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidApiUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<Error> for hunter_scheduler::Error {
    fn from(e: Error) -> Self {
        Self::external("telegram delivery failed", e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
