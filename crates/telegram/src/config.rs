use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    teloxide::types::{ChatId, Recipient},
};

use crate::{Error, Result};

/// Public Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Settings for [`crate::TelegramNotifier`].
#[derive(Clone)]
pub struct TelegramNotifierConfig {
    /// Bot token from @BotFather.
    pub token: Secret<String>,
    /// Numeric chat id (`-100…` for channels and groups) or `@channelname`.
    pub chat_id: String,
    pub api_url: String,
    /// HTTP timeout for a single API call.
    pub timeout: Duration,
    /// Zone used for the `HH:MM:SS` stamp in the message header.
    pub timezone: chrono_tz::Tz,
}

impl TelegramNotifierConfig {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: Secret::new(token.into()),
            chat_id: chat_id.into(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
            timezone: chrono_tz::UTC,
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, tz: chrono_tz::Tz) -> Self {
        self.timezone = tz;
        self
    }

    pub(crate) fn recipient(&self) -> Result<Recipient> {
        let chat = self.chat_id.trim();
        if chat.is_empty() {
            return Err(Error::MissingField { field: "chat_id" });
        }
        Ok(match chat.parse::<i64>() {
            Ok(id) => Recipient::Id(ChatId(id)),
            Err(_) if chat.starts_with('@') => Recipient::ChannelUsername(chat.to_string()),
            Err(_) => Recipient::ChannelUsername(format!("@{chat}")),
        })
    }

    pub(crate) fn api_url(&self) -> Result<reqwest::Url> {
        reqwest::Url::parse(&self.api_url).map_err(|e| Error::invalid_api_url(&self.api_url, e))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.token.expose_secret().trim().is_empty() {
            return Err(Error::MissingField { field: "bot_token" });
        }
        self.recipient()?;
        self.api_url()?;
        Ok(())
    }
}

impl std::fmt::Debug for TelegramNotifierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifierConfig")
            .field("token", &"[REDACTED]")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
