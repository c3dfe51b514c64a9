//! Telegram adapter using teloxide.
//!
//! Maps Telegram updates to [`InboundEvent`]s, hands them to the engine, and
//! delivers [`Reply`]s. Delivery tries HTML formatting first; when the Bot
//! API rejects the markup it retries once with tags stripped, and a second
//! failure is logged and surfaced as a minimal plain-text error — a delivery
//! problem never crashes the session.

use crate::flow::Engine;
use crate::format;
use crate::{EventPayload, InboundEvent, Keyboard, Reply};

use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, MaybeInaccessibleMessage, MessageId, ParseMode,
};

pub struct TelegramAdapter {
    bot: Bot,
    engine: Arc<Engine>,
}

impl TelegramAdapter {
    pub fn new(token: &str, engine: Arc<Engine>) -> Self {
        Self {
            bot: Bot::new(token),
            engine,
        }
    }

    /// Run the long-poll dispatcher until shutdown.
    pub async fn run(self: Arc<Self>) {
        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint({
                let adapter = Arc::clone(&self);
                move |message: Message, bot: Bot| {
                    let adapter = Arc::clone(&adapter);
                    async move {
                        adapter.handle_message(message, bot).await;
                        respond(())
                    }
                }
            }))
            .branch(Update::filter_callback_query().endpoint({
                let adapter = Arc::clone(&self);
                move |query: CallbackQuery, bot: Bot| {
                    let adapter = Arc::clone(&adapter);
                    async move {
                        adapter.handle_callback(query, bot).await;
                        respond(())
                    }
                }
            }));

        tracing::info!("telegram adapter connected");
        Dispatcher::builder(self.bot.clone(), handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    async fn handle_message(&self, message: Message, bot: Bot) {
        let Some(user) = message.from.as_ref() else {
            return;
        };
        let Some(text) = message.text() else {
            return;
        };

        let payload = match parse_command(text) {
            Some((name, arg)) => EventPayload::Command { name, arg },
            None => EventPayload::Text(text.to_string()),
        };
        let event = InboundEvent {
            user_id: user.id.0 as i64,
            chat_id: message.chat.id.0,
            payload,
        };

        let reply = self.engine.handle(event).await;
        deliver(&bot, message.chat.id, reply, None).await;
    }

    async fn handle_callback(&self, query: CallbackQuery, bot: Bot) {
        // Acknowledge immediately so the button stops spinning even if the
        // remote call below is slow.
        if let Err(error) = bot.answer_callback_query(query.id.clone()).await {
            tracing::debug!(%error, "failed to answer callback query");
        }

        let Some(token) = query.data.clone() else {
            return;
        };
        let user_id = query.from.id.0 as i64;

        // Edit the menu message in place when it is still accessible,
        // otherwise fall back to a fresh message in the DM chat.
        let (chat_id, edit) = match &query.message {
            Some(MaybeInaccessibleMessage::Regular(message)) => {
                (message.chat.id, Some(message.id))
            }
            _ => (ChatId(user_id), None),
        };

        let event = InboundEvent {
            user_id,
            chat_id: chat_id.0,
            payload: EventPayload::Action(token),
        };

        let reply = self.engine.handle(event).await;
        deliver(&bot, chat_id, reply, edit).await;
    }
}

/// Split a slash command into name and argument. Handles the
/// `/command@botname` form used in group chats. Returns `None` for ordinary
/// text.
fn parse_command(text: &str) -> Option<(String, String)> {
    let stripped = text.strip_prefix('/')?;
    let mut parts = stripped.splitn(2, char::is_whitespace);
    let name = parts
        .next()?
        .split('@')
        .next()
        .unwrap_or_default()
        .to_string();
    if name.is_empty() {
        return None;
    }
    let arg = parts.next().unwrap_or("").trim().to_string();
    Some((name, arg))
}

fn to_markup(keyboard: Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.into_iter().map(|row| {
        row.into_iter()
            .map(|button| InlineKeyboardButton::callback(button.label, button.action))
            .collect::<Vec<_>>()
    }))
}

/// Two-attempt delivery: rich HTML first, then a plain-text retry with tags
/// stripped. Used by both the message and callback paths so the fallback
/// policy lives in exactly one place.
async fn deliver(bot: &Bot, chat_id: ChatId, reply: Reply, edit: Option<MessageId>) {
    let markup = reply.keyboard.clone().map(to_markup);

    let rich = match edit {
        Some(message_id) => {
            let mut request = bot
                .edit_message_text(chat_id, message_id, reply.text.clone())
                .parse_mode(ParseMode::Html);
            if let Some(markup) = markup.clone() {
                request = request.reply_markup(markup);
            }
            request.await.map(|_| ())
        }
        None => {
            let mut request = bot
                .send_message(chat_id, reply.text.clone())
                .parse_mode(ParseMode::Html);
            if let Some(markup) = markup.clone() {
                request = request.reply_markup(markup);
            }
            request.await.map(|_| ())
        }
    };

    let Err(first_error) = rich else {
        return;
    };

    // Editing a message to its current content is a no-op, not a delivery
    // failure.
    if first_error
        .to_string()
        .contains("message is not modified")
    {
        return;
    }

    tracing::warn!(%first_error, %chat_id, "rich delivery failed, retrying as plain text");
    let plain = format::strip_html(&reply.text);
    let mut request = bot.send_message(chat_id, plain);
    if let Some(markup) = markup {
        request = request.reply_markup(markup);
    }

    if let Err(second_error) = request.await {
        tracing::error!(%second_error, %chat_id, "plain delivery failed");
        if let Err(error) = bot
            .send_message(chat_id, "Failed to deliver the response.")
            .await
        {
            tracing::error!(%error, %chat_id, "could not notify user of delivery failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_splits_name_and_argument() {
        assert_eq!(
            parse_command("/login rnd_key_123"),
            Some(("login".to_string(), "rnd_key_123".to_string()))
        );
        assert_eq!(
            parse_command("/menu"),
            Some(("menu".to_string(), String::new()))
        );
    }

    #[test]
    fn parse_command_strips_bot_mention() {
        assert_eq!(
            parse_command("/start@deploy_bot"),
            Some(("start".to_string(), String::new()))
        );
    }

    #[test]
    fn parse_command_rejects_plain_text() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn keyboard_converts_to_inline_markup() {
        let keyboard = Keyboard::new(vec![vec![crate::Button::new("Tap", "svc:srv-1")]]);
        let markup = to_markup(keyboard);
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0][0].text, "Tap");
    }
}
