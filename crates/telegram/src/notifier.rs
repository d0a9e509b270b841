use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    secrecy::ExposeSecret,
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{ParseMode, Recipient},
    },
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use hunter_metrics::{counter, telegram as telegram_metrics};

use hunter_scheduler::{Notifier, NotifyLevel};

use crate::{
    Result,
    config::TelegramNotifierConfig,
    markdown::{MESSAGE_CHUNK_LEN, chunk_message, escape_html, render_html},
};

/// Header line in HTML: `✅ <b>SUCCESS</b> | 14:05:09`.
pub fn format_header(level: NotifyLevel, at: DateTime<Tz>) -> String {
    format!(
        "{} <b>{}</b> | {}",
        level.emoji(),
        escape_html(level.as_str()),
        at.format("%H:%M:%S")
    )
}

fn plain_header(level: NotifyLevel, at: DateTime<Tz>) -> String {
    format!("{} {} | {}", level.emoji(), level.as_str(), at.format("%H:%M:%S"))
}

/// One outgoing message: the HTML body and its plain-text fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingChunk {
    pub html: String,
    pub plain: String,
}

/// Split `message` into Telegram-sized chunks. The first carries the header.
pub fn format_message(level: NotifyLevel, message: &str, at: DateTime<Tz>) -> Vec<OutgoingChunk> {
    chunk_message(message, MESSAGE_CHUNK_LEN)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            if i == 0 {
                OutgoingChunk {
                    html: format!("{}\n{}", format_header(level, at), render_html(&chunk)),
                    plain: format!("{}\n{chunk}", plain_header(level, at)),
                }
            } else {
                OutgoingChunk {
                    html: render_html(&chunk),
                    plain: chunk,
                }
            }
        })
        .collect()
}

/// Sends notifications to one chat through the Bot API.
pub struct TelegramNotifier {
    bot: Bot,
    recipient: Recipient,
    timezone: Tz,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramNotifierConfig) -> Result<Self> {
        config.validate()?;
        let client = teloxide::net::default_reqwest_settings()
            .timeout(config.timeout)
            .build()?;
        let bot = Bot::with_client(config.token.expose_secret(), client)
            .set_api_url(config.api_url()?);
        Ok(Self {
            bot,
            recipient: config.recipient()?,
            timezone: config.timezone,
        })
    }

    async fn send_chunk(&self, chunk: &OutgoingChunk) -> std::result::Result<(), RequestError> {
        let html = self
            .bot
            .send_message(self.recipient.clone(), &chunk.html)
            .parse_mode(ParseMode::Html)
            .await;
        match html {
            Ok(_) => Ok(()),
            Err(RequestError::Api(ApiError::CantParseEntities(reason))) => {
                warn!(%reason, "telegram rejected HTML, resending as plain text");
                #[cfg(feature = "metrics")]
                counter!(telegram_metrics::PLAIN_FALLBACK_TOTAL).increment(1);
                self.bot
                    .send_message(self.recipient.clone(), &chunk.plain)
                    .await
                    .map(|_| ())
            },
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("recipient", &self.recipient)
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str, level: NotifyLevel) -> hunter_scheduler::Result<()> {
        let at = Utc::now().with_timezone(&self.timezone);
        let chunks = format_message(level, message, at);
        for chunk in &chunks {
            if let Err(e) = self.send_chunk(chunk).await {
                #[cfg(feature = "metrics")]
                counter!(telegram_metrics::ERRORS_TOTAL).increment(1);
                return Err(crate::Error::from(e).into());
            }
            #[cfg(feature = "metrics")]
            counter!(telegram_metrics::MESSAGES_SENT_TOTAL).increment(1);
        }
        debug!(level = %level, chunks = chunks.len(), "telegram notification sent");
        Ok(())
    }
}
