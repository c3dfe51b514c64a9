//! Action tokens and inline keyboards.
//!
//! Callback data round-trips through [`Action`]: the engine encodes actions
//! into buttons, the transport hands tapped tokens back, and `Action::parse`
//! turns them into typed values. Unknown tokens fall through to a harmless
//! "unknown action" reply rather than an error.

use crate::{Button, Keyboard};

/// Every button action the bot understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Account,
    ListServices,
    CreateService,
    MainMenu,
    Cancel,
    Service(String),
    Status(String),
    Restart(String),
    Delete(String),
    Logs(String),
    Deploy(String),
    EnvList(String),
    EnvAdd(String),
    EnvDelete(String),
    SetRepository(String),
}

impl Action {
    /// Parse a callback token. Returns `None` for unknown tokens.
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "account" => return Some(Action::Account),
            "list" => return Some(Action::ListServices),
            "create" => return Some(Action::CreateService),
            "menu" => return Some(Action::MainMenu),
            "cancel" => return Some(Action::Cancel),
            _ => {}
        }

        let (prefix, id) = data.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        let id = id.to_string();
        match prefix {
            "svc" => Some(Action::Service(id)),
            "svc_status" => Some(Action::Status(id)),
            "svc_restart" => Some(Action::Restart(id)),
            "svc_delete" => Some(Action::Delete(id)),
            "svc_logs" => Some(Action::Logs(id)),
            "svc_deploy" => Some(Action::Deploy(id)),
            "svc_env" => Some(Action::EnvList(id)),
            "env_add" => Some(Action::EnvAdd(id)),
            "env_del" => Some(Action::EnvDelete(id)),
            "svc_repo" => Some(Action::SetRepository(id)),
            _ => None,
        }
    }

    /// Encode into the callback token `parse` accepts.
    pub fn encode(&self) -> String {
        match self {
            Action::Account => "account".to_string(),
            Action::ListServices => "list".to_string(),
            Action::CreateService => "create".to_string(),
            Action::MainMenu => "menu".to_string(),
            Action::Cancel => "cancel".to_string(),
            Action::Service(id) => format!("svc:{id}"),
            Action::Status(id) => format!("svc_status:{id}"),
            Action::Restart(id) => format!("svc_restart:{id}"),
            Action::Delete(id) => format!("svc_delete:{id}"),
            Action::Logs(id) => format!("svc_logs:{id}"),
            Action::Deploy(id) => format!("svc_deploy:{id}"),
            Action::EnvList(id) => format!("svc_env:{id}"),
            Action::EnvAdd(id) => format!("env_add:{id}"),
            Action::EnvDelete(id) => format!("env_del:{id}"),
            Action::SetRepository(id) => format!("svc_repo:{id}"),
        }
    }
}

fn button(label: &str, action: Action) -> Button {
    Button::new(label, action.encode())
}

/// Top-level menu.
pub fn main_menu() -> Keyboard {
    Keyboard::new(vec![
        vec![button("👤 Account", Action::Account)],
        vec![button("📋 List Services", Action::ListServices)],
        vec![button("✨ Create Service", Action::CreateService)],
    ])
}

/// Per-service menu.
pub fn service_menu(service_id: &str) -> Keyboard {
    let id = service_id.to_string();
    Keyboard::new(vec![
        vec![button("📡 Status", Action::Status(id.clone()))],
        vec![
            button("🔄 Restart", Action::Restart(id.clone())),
            button("🗑 Delete", Action::Delete(id.clone())),
        ],
        vec![
            button("🪵 Logs", Action::Logs(id.clone())),
            button("🌐 Env Vars", Action::EnvList(id.clone())),
        ],
        vec![
            button("🔗 Set Repo", Action::SetRepository(id.clone())),
            button("🚀 Deploy", Action::Deploy(id)),
        ],
        vec![button("⬅️ Back to Services", Action::ListServices)],
    ])
}

/// Env-var submenu for a service.
pub fn env_menu(service_id: &str) -> Keyboard {
    let id = service_id.to_string();
    Keyboard::new(vec![
        vec![button("➕ Add/Update", Action::EnvAdd(id.clone()))],
        vec![button("➖ Delete", Action::EnvDelete(id.clone()))],
        vec![button("⬅️ Back", Action::Service(id))],
    ])
}

/// Single-row cancel keyboard shown while a flow is collecting input.
pub fn cancel_menu() -> Keyboard {
    Keyboard::new(vec![vec![button("✖️ Cancel", Action::Cancel)]])
}
