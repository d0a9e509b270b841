//! Telegram notification sink for hunter.
//!
//! [`TelegramNotifier`] implements [`hunter_scheduler::Notifier`] by sending
//! each notification to one chat with the Bot API `sendMessage` call, as HTML
//! with a plain-text fallback.

pub mod config;
pub mod error;
pub mod markdown;
pub mod notifier;

pub use {
    config::TelegramNotifierConfig,
    error::{Error, Result},
    notifier::TelegramNotifier,
};
