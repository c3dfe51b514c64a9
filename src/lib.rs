//! deploybot — a Telegram control surface for Render services.
//!
//! Users authenticate with a personal API key, browse their services through
//! inline-button menus, and run mutating operations (restart, deploy, delete,
//! env-var edits, repository changes, service creation) via button taps plus
//! short free-text replies.
//!
//! The core is transport-agnostic: the [`flow::Engine`] consumes
//! [`InboundEvent`]s and produces [`Reply`]s, and only the adapter in
//! [`messaging`] knows about Telegram.

pub mod config;
pub mod error;
pub mod flow;
pub mod format;
pub mod messaging;
pub mod render;
pub mod store;

pub use error::Result;

/// One inbound event from the chat transport.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Opaque identity of the originating user.
    pub user_id: i64,
    /// Chat the reply should go to. For direct messages this equals the
    /// user id, but the engine never relies on that.
    pub chat_id: i64,
    pub payload: EventPayload,
}

/// The three event shapes the engine understands.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// A slash command, split into name and the remainder of the line.
    Command { name: String, arg: String },
    /// An opaque action token from an inline button tap.
    Action(String),
    /// Ordinary free text, fed to whatever flow is pending.
    Text(String),
}

/// Outbound message produced by the engine. `text` is HTML-formatted; the
/// delivery layer owns the plain-text fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

/// Transport-agnostic inline keyboard: rows of buttons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }
}

/// One inline button: a label plus the action token sent back when tapped.
#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub action: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}
