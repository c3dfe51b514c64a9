//! Messaging adapters (Telegram).

pub mod telegram;

pub use telegram::TelegramAdapter;
