//! Single-slot per-user store for in-flight flows.
//!
//! Purely in-memory: a restart cancels every pending flow, which is the
//! intended behavior. `begin` silently overwrites — a user switching flows
//! mid-way is expected and must not require an explicit cancel first.

use crate::flow::{FlowKind, PendingAction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct PendingActionStore {
    inner: Arc<RwLock<HashMap<i64, PendingAction>>>,
}

impl PendingActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a flow for a user, unconditionally replacing any pending one.
    pub async fn begin(&self, user_id: i64, kind: FlowKind, target: Option<String>) {
        self.inner
            .write()
            .await
            .insert(user_id, PendingAction::new(kind, target));
    }

    /// Record the current step's value and advance. Returns the updated
    /// action, or `None` when nothing is pending (the caller then treats the
    /// message as ordinary free text).
    pub async fn advance(&self, user_id: i64, value: String) -> Option<PendingAction> {
        let mut pending = self.inner.write().await;
        let action = pending.get_mut(&user_id)?;
        let field = action.current_field()?;
        action.fields.push((field.name.to_string(), value));
        action.step += 1;
        Some(action.clone())
    }

    /// The pending action, if any, without modifying it.
    pub async fn peek(&self, user_id: i64) -> Option<PendingAction> {
        self.inner.read().await.get(&user_id).cloned()
    }

    /// Remove and return the pending action once all fields are collected.
    pub async fn complete(&self, user_id: i64) -> Option<PendingAction> {
        self.inner.write().await.remove(&user_id)
    }

    /// Remove without returning. Idempotent.
    pub async fn cancel(&self, user_id: i64) -> bool {
        self.inner.write().await.remove(&user_id).is_some()
    }
}
