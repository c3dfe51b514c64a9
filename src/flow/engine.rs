//! The conversation engine.
//!
//! Consumes one [`InboundEvent`] at a time per user, consults the pending
//! action store, advances or completes the active flow, and issues remote
//! calls through the [`ManagementApi`] seam. Every failure class is data
//! handed to the formatter — nothing here is a crash condition, and every
//! reply carries a keyboard so the user is never left at a dead end.
//!
//! Events for one user are linearized through a per-user mutex held for the
//! whole event, remote calls included; without it two rapid replies could
//! both read step `i` before either writes `i + 1`. Different users never
//! contend on each other's lock.

use crate::flow::menus::{self, Action};
use crate::flow::{parse_env_block, FlowKind, PendingAction, PendingActionStore, SKIP_SENTINEL};
use crate::format::{self, ServiceFields};
use crate::render::{ApiError, ManagementApi, NewService, VALID_SERVICE_TYPES};
use crate::store::{default_branch, ResourceMapping, StateStore, UserSession};
use crate::{EventPayload, InboundEvent, Reply};

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Engine {
    api: Arc<dyn ManagementApi>,
    store: Arc<StateStore>,
    pending: PendingActionStore,
    /// One mutex per user id, created on first contact. An idle user keeps
    /// its entry; the map is bounded by user count.
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(api: Arc<dyn ManagementApi>, store: Arc<StateStore>) -> Self {
        Self {
            api,
            store,
            pending: PendingActionStore::new(),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one inbound event to completion and produce the reply.
    pub async fn handle(&self, event: InboundEvent) -> Reply {
        let lock = self.user_lock(event.user_id).await;
        let _guard = lock.lock().await;

        let result = match &event.payload {
            EventPayload::Command { name, arg } => {
                self.handle_command(event.user_id, name, arg).await
            }
            EventPayload::Action(token) => self.handle_action(event.user_id, token).await,
            EventPayload::Text(text) => self.handle_text(event.user_id, text).await,
        };

        match result {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(%error, user_id = event.user_id, "event processing failed");
                Reply::with_keyboard(
                    "Something went wrong on our side. Please try again.",
                    menus::main_menu(),
                )
            }
        }
    }

    async fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.user_locks
            .lock()
            .await
            .entry(user_id)
            .or_default()
            .clone()
    }

    fn session(&self, user_id: i64) -> crate::Result<Option<UserSession>> {
        Ok(self.store.session(user_id)?)
    }

    fn login_prompt() -> Reply {
        Reply::with_keyboard(
            "You are not logged in. Send <b>/login &lt;API_KEY&gt;</b> first.",
            menus::main_menu(),
        )
    }

    // ---- commands ----

    async fn handle_command(&self, user_id: i64, name: &str, arg: &str) -> crate::Result<Reply> {
        match name {
            "start" => Ok(Reply::with_keyboard(
                "Welcome to <b>Render Manager Bot</b>.\n\n\
                 1. Connect with <b>/login &lt;API_KEY&gt;</b>\n\
                 2. Manage your services with the buttons below.",
                menus::main_menu(),
            )),
            "login" => self.handle_login(user_id, arg).await,
            "menu" => Ok(Reply::with_keyboard("Main menu:", menus::main_menu())),
            "cancel" => {
                let cancelled = self.pending.cancel(user_id).await;
                let text = if cancelled {
                    "Flow cancelled."
                } else {
                    "Nothing to cancel."
                };
                Ok(Reply::with_keyboard(text, menus::main_menu()))
            }
            "whoami" => self.account_info(user_id).await,
            _ => Ok(Reply::with_keyboard(
                "Unknown command. Try /menu.",
                menus::main_menu(),
            )),
        }
    }

    async fn handle_login(&self, user_id: i64, arg: &str) -> crate::Result<Reply> {
        let api_key = arg.trim();
        if api_key.is_empty() {
            return Ok(Reply::new("Usage: <b>/login &lt;API_KEY&gt;</b>"));
        }

        match self.api.verify_credential(api_key).await {
            Ok(_) => {
                // Re-login overwrites the whole session; the default
                // workspace is re-resolved lazily for the new credential.
                self.store.set_session(user_id, &UserSession::new(api_key))?;
                tracing::info!(user_id, "user logged in");
                Ok(Reply::with_keyboard(
                    "✅ API key saved. Use the menu below.",
                    menus::main_menu(),
                ))
            }
            Err(error) => Ok(Reply::new(format::render_error("Login", &error))),
        }
    }

    // ---- button actions ----

    async fn handle_action(&self, user_id: i64, token: &str) -> crate::Result<Reply> {
        let Some(action) = Action::parse(token) else {
            tracing::debug!(user_id, token, "unknown action token");
            return Ok(Reply::with_keyboard(
                "Unknown action. Use /menu.",
                menus::main_menu(),
            ));
        };

        // Actions that need no credential.
        match &action {
            Action::MainMenu => {
                return Ok(Reply::with_keyboard("Main menu:", menus::main_menu()));
            }
            Action::Cancel => {
                self.pending.cancel(user_id).await;
                return Ok(Reply::with_keyboard("Flow cancelled.", menus::main_menu()));
            }
            _ => {}
        }

        let Some(session) = self.session(user_id)? else {
            return Ok(Self::login_prompt());
        };
        let key = session.api_key.as_str();

        match action {
            Action::MainMenu | Action::Cancel => unreachable!("handled above"),
            Action::Account => self.account_info(user_id).await,
            Action::ListServices => Ok(self.list_services(key).await),
            Action::CreateService => Ok(self.begin_flow(user_id, FlowKind::CreateService, None).await),
            Action::Service(id) | Action::Status(id) => Ok(self.service_card(key, &id).await),
            Action::Restart(id) => Ok(self.restart(key, &id).await),
            Action::Delete(id) => Ok(self.delete(key, &id).await),
            Action::Logs(id) => Ok(self.logs(key, &id).await),
            Action::Deploy(id) => Ok(self.deploy(key, &id).await),
            Action::EnvList(id) => Ok(self.env_list(key, &id).await),
            Action::EnvAdd(id) => {
                Ok(self.begin_flow(user_id, FlowKind::AddEnvVars, Some(id)).await)
            }
            Action::EnvDelete(id) => {
                Ok(self.begin_flow(user_id, FlowKind::DeleteEnvVar, Some(id)).await)
            }
            Action::SetRepository(id) => {
                Ok(self.begin_flow(user_id, FlowKind::SetRepository, Some(id)).await)
            }
        }
    }

    async fn account_info(&self, user_id: i64) -> crate::Result<Reply> {
        let Some(session) = self.session(user_id)? else {
            return Ok(Self::login_prompt());
        };
        match self.api.list_workspaces(&session.api_key).await {
            Ok(payload) => Ok(Reply::with_keyboard(
                format::render_account(&payload),
                menus::main_menu(),
            )),
            Err(error) => Ok(Reply::with_keyboard(
                format::render_error("Account lookup", &error),
                menus::main_menu(),
            )),
        }
    }

    async fn list_services(&self, key: &str) -> Reply {
        match self.api.list_services(key, 50).await {
            Ok(payload) => {
                let services = format::service_summaries(&payload);
                if services.is_empty() {
                    return Reply::with_keyboard("No services found.", menus::main_menu());
                }
                let mut rows: Vec<Vec<crate::Button>> = services
                    .iter()
                    .map(|service| {
                        vec![crate::Button::new(
                            format!("📱 {}", service.name),
                            Action::Service(service.id.clone()).encode(),
                        )]
                    })
                    .collect();
                rows.push(vec![crate::Button::new(
                    "⬅️ Back",
                    Action::MainMenu.encode(),
                )]);
                Reply::with_keyboard("📋 <b>Your Services</b>:", crate::Keyboard::new(rows))
            }
            Err(error) => Reply::with_keyboard(
                format::render_error("List services", &error),
                menus::main_menu(),
            ),
        }
    }

    async fn service_card(&self, key: &str, service_id: &str) -> Reply {
        match self.api.get_service(key, service_id).await {
            Ok(payload) => {
                let fields = ServiceFields::from_payload(&payload);
                Reply::with_keyboard(
                    format::render_service(&fields),
                    menus::service_menu(service_id),
                )
            }
            Err(error) => Reply::with_keyboard(
                format::render_error("Fetch service", &error),
                menus::main_menu(),
            ),
        }
    }

    async fn restart(&self, key: &str, service_id: &str) -> Reply {
        match self.api.restart_service(key, service_id).await {
            Ok(_) => Reply::with_keyboard("✅ Restart triggered.", menus::service_menu(service_id)),
            Err(error) => Reply::with_keyboard(
                format::render_error("Restart", &error),
                menus::service_menu(service_id),
            ),
        }
    }

    async fn delete(&self, key: &str, service_id: &str) -> Reply {
        match self.api.delete_service(key, service_id).await {
            Ok(_) => Reply::with_keyboard("🗑 Service deleted.", menus::main_menu()),
            Err(error) => Reply::with_keyboard(
                format::render_error("Delete", &error),
                menus::service_menu(service_id),
            ),
        }
    }

    async fn logs(&self, key: &str, service_id: &str) -> Reply {
        match self.api.fetch_logs(key, service_id, 100).await {
            Ok(payload) => {
                Reply::with_keyboard(format::render_logs(&payload), menus::service_menu(service_id))
            }
            Err(error) => Reply::with_keyboard(
                format::render_error("Fetch logs", &error),
                menus::service_menu(service_id),
            ),
        }
    }

    async fn deploy(&self, key: &str, service_id: &str) -> Reply {
        match self.api.trigger_deploy(key, service_id, false).await {
            Ok(payload) => {
                let deploy_id = payload
                    .get("id")
                    .or_else(|| payload.get("deploy").and_then(|d| d.get("id")))
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(format::MISSING_FIELD);
                Reply::with_keyboard(
                    format!(
                        "🚀 Deploy triggered.\nDeploy ID: <code>{}</code>",
                        format::escape_html(deploy_id)
                    ),
                    menus::service_menu(service_id),
                )
            }
            Err(error) => Reply::with_keyboard(
                format::render_error("Deploy", &error),
                menus::service_menu(service_id),
            ),
        }
    }

    async fn env_list(&self, key: &str, service_id: &str) -> Reply {
        match self.api.list_env_vars(key, service_id).await {
            Ok(payload) => {
                let pairs = format::env_pairs(&payload);
                Reply::with_keyboard(format::render_env_vars(&pairs), menus::env_menu(service_id))
            }
            Err(error) => Reply::with_keyboard(
                format::render_error("List env vars", &error),
                menus::service_menu(service_id),
            ),
        }
    }

    /// Start a flow, silently discarding any pending one, and prompt for the
    /// first field.
    async fn begin_flow(&self, user_id: i64, kind: FlowKind, target: Option<String>) -> Reply {
        self.pending.begin(user_id, kind, target).await;
        let prompt = kind.fields()[0].prompt;
        Reply::with_keyboard(
            format!("<b>{}</b>\n{}", kind.describe(), prompt),
            menus::cancel_menu(),
        )
    }

    // ---- free text ----

    async fn handle_text(&self, user_id: i64, text: &str) -> crate::Result<Reply> {
        let Some(action) = self.pending.peek(user_id).await else {
            // Never silently drop input: the user must know it was not
            // consumed by anything.
            return Ok(Reply::with_keyboard(
                "Nothing is pending. Use the menu to start an action.",
                menus::main_menu(),
            ));
        };

        let Some(field) = action.current_field() else {
            // A complete action should never sit in the store; clear it.
            tracing::warn!(user_id, "pending action had no remaining step");
            self.pending.cancel(user_id).await;
            return Ok(Reply::with_keyboard("Main menu:", menus::main_menu()));
        };

        let trimmed = text.trim();
        let skipped = field.optional && trimmed == SKIP_SENTINEL;

        // Invalid input keeps the flow at the current step and re-prompts.
        if !skipped && trimmed.is_empty() {
            return Ok(Reply::with_keyboard(
                format!("That can't be empty.\n\n{}", field.prompt),
                menus::cancel_menu(),
            ));
        }
        if action.kind == FlowKind::CreateService
            && field.name == "type"
            && !VALID_SERVICE_TYPES.contains(&trimmed)
        {
            return Ok(Reply::with_keyboard(
                format!(
                    "'{}' is not a valid service type.\n\n{}",
                    format::escape_html(trimmed),
                    field.prompt
                ),
                menus::cancel_menu(),
            ));
        }
        if action.kind == FlowKind::AddEnvVars && parse_env_block(trimmed).is_empty() {
            return Ok(Reply::with_keyboard(
                format!("No valid KEY=VALUE pairs found.\n\n{}", field.prompt),
                menus::cancel_menu(),
            ));
        }

        let value = if skipped { String::new() } else { trimmed.to_string() };
        let Some(advanced) = self.pending.advance(user_id, value).await else {
            return Ok(Reply::with_keyboard(
                "Nothing is pending. Use the menu to start an action.",
                menus::main_menu(),
            ));
        };

        if !advanced.is_complete() {
            let prompt = advanced
                .current_field()
                .map(|field| field.prompt)
                .unwrap_or_default();
            return Ok(Reply::with_keyboard(prompt, menus::cancel_menu()));
        }

        let completed = self.pending.complete(user_id).await.unwrap_or(advanced);
        self.finish(user_id, completed).await
    }

    // ---- flow completion ----

    async fn finish(&self, user_id: i64, action: PendingAction) -> crate::Result<Reply> {
        let Some(session) = self.session(user_id)? else {
            return Ok(Self::login_prompt());
        };

        match action.kind {
            FlowKind::CreateService => self.finish_create(user_id, session, &action).await,
            FlowKind::SetRepository => self.finish_set_repository(&session, &action).await,
            FlowKind::AddEnvVars => self.finish_add_env_vars(&session, &action).await,
            FlowKind::DeleteEnvVar => self.finish_delete_env_var(&session, &action).await,
        }
    }

    async fn finish_create(
        &self,
        user_id: i64,
        session: UserSession,
        action: &PendingAction,
    ) -> crate::Result<Reply> {
        // The owning workspace is never asked of the user; resolve it once
        // per credential and cache it on the session.
        let workspace = match session.default_workspace.clone() {
            Some(workspace) => workspace,
            None => match self.api.resolve_default_workspace(&session.api_key).await {
                Ok(workspace) => {
                    let mut updated = session.clone();
                    updated.default_workspace = Some(workspace.clone());
                    updated.updated_at = chrono::Utc::now();
                    self.store.set_session(user_id, &updated)?;
                    workspace
                }
                Err(error) => {
                    return Ok(Reply::with_keyboard(
                        format::render_error("Create service", &error),
                        menus::main_menu(),
                    ));
                }
            },
        };

        let repository = action.field("repository").map(str::to_string);
        let branch = action
            .field("branch")
            .map(str::to_string)
            .unwrap_or_else(default_branch);
        let start_command = action.field("start_command").map(str::to_string);
        let spec = NewService {
            service_type: action.field("type").unwrap_or_default().to_string(),
            name: action.field("name").unwrap_or_default().to_string(),
            workspace_id: workspace,
            repository: repository.clone(),
            branch: branch.clone(),
            start_command: start_command.clone(),
        };

        match self.api.create_service(&session.api_key, &spec).await {
            Ok(payload) => {
                let fields = ServiceFields::from_payload(&payload);
                if let Some(repository) = repository
                    && fields.id != format::MISSING_FIELD
                {
                    let mut mapping = ResourceMapping::new(repository, branch);
                    mapping.start_command = start_command;
                    self.store.set_mapping(&fields.id, &mapping)?;
                }
                let keyboard = if fields.id == format::MISSING_FIELD {
                    menus::main_menu()
                } else {
                    menus::service_menu(&fields.id)
                };
                Ok(Reply::with_keyboard(
                    format!("✅ Service created.\n\n{}", format::render_service(&fields)),
                    keyboard,
                ))
            }
            Err(error) => Ok(Reply::with_keyboard(
                format::render_error("Create service", &error),
                menus::main_menu(),
            )),
        }
    }

    async fn finish_set_repository(
        &self,
        session: &UserSession,
        action: &PendingAction,
    ) -> crate::Result<Reply> {
        let Some(service_id) = action.target.clone() else {
            tracing::warn!("set-repository flow completed without a target");
            return Ok(Reply::with_keyboard("Main menu:", menus::main_menu()));
        };
        let repository = action.field("repository").unwrap_or_default().to_string();
        let branch = action
            .field("branch")
            .map(str::to_string)
            .unwrap_or_else(default_branch);
        let start_command = action.field("start_command").map(str::to_string);

        let mut fields = json!({ "repo": repository, "branch": branch });
        if let Some(start_command) = &start_command {
            fields["startCommand"] = json!(start_command);
        }

        match self
            .api
            .update_service(&session.api_key, &service_id, fields)
            .await
        {
            Ok(_) => {
                let mut mapping = ResourceMapping::new(repository.clone(), branch.clone());
                mapping.start_command = start_command;
                self.store.set_mapping(&service_id, &mapping)?;
                Ok(Reply::with_keyboard(
                    format!(
                        "✅ Repo set: <code>{}</code> @ <b>{}</b>",
                        format::escape_html(&repository),
                        format::escape_html(&branch)
                    ),
                    menus::service_menu(&service_id),
                ))
            }
            Err(error) => Ok(Reply::with_keyboard(
                format::render_error("Set repository", &error),
                menus::service_menu(&service_id),
            )),
        }
    }

    async fn finish_add_env_vars(
        &self,
        session: &UserSession,
        action: &PendingAction,
    ) -> crate::Result<Reply> {
        let Some(service_id) = action.target.clone() else {
            tracing::warn!("env-var flow completed without a target");
            return Ok(Reply::with_keyboard("Main menu:", menus::main_menu()));
        };
        // Validated non-empty when the step was accepted.
        let pairs = parse_env_block(action.field("env_block").unwrap_or_default());

        match self
            .api
            .upsert_env_vars(&session.api_key, &service_id, &pairs)
            .await
        {
            Ok(_) => Ok(Reply::with_keyboard(
                format!("✅ Upserted {} env var(s).", pairs.len()),
                menus::service_menu(&service_id),
            )),
            Err(error) => Ok(Reply::with_keyboard(
                format::render_error("Upsert env vars", &error),
                menus::service_menu(&service_id),
            )),
        }
    }

    async fn finish_delete_env_var(
        &self,
        session: &UserSession,
        action: &PendingAction,
    ) -> crate::Result<Reply> {
        let Some(service_id) = action.target.clone() else {
            tracing::warn!("env-delete flow completed without a target");
            return Ok(Reply::with_keyboard("Main menu:", menus::main_menu()));
        };
        let key = action.field("key").unwrap_or_default().to_string();

        match self
            .api
            .delete_env_var(&session.api_key, &service_id, &key)
            .await
        {
            Ok(_) => Ok(Reply::with_keyboard(
                format!("✅ Env var <b>{}</b> deleted.", format::escape_html(&key)),
                menus::service_menu(&service_id),
            )),
            Err(error) => Ok(Reply::with_keyboard(
                format::render_error("Delete env var", &error),
                menus::service_menu(&service_id),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ApiResult;
    use crate::store::StateStore;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    /// Which remote operations were issued, in order.
    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Verify,
        ListWorkspaces,
        ListServices,
        GetService(String),
        Create(NewService),
        Update(String),
        Delete(String),
        Restart(String),
        Deploy(String),
        Logs(String),
        EnvList(String),
        Upsert(String, Vec<(String, String)>),
        EnvDelete(String, String),
    }

    /// Recording fake for the management API seam.
    #[derive(Default)]
    struct FakeApi {
        calls: StdMutex<Vec<Call>>,
        restart_error: Option<ApiError>,
    }

    impl FakeApi {
        fn record(&self, call: Call) {
            self.calls.lock().expect("calls lock").push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl ManagementApi for FakeApi {
        async fn verify_credential(&self, _credential: &str) -> ApiResult {
            self.record(Call::Verify);
            Ok(serde_json::json!([]))
        }

        async fn list_workspaces(&self, _credential: &str) -> ApiResult {
            self.record(Call::ListWorkspaces);
            Ok(serde_json::json!([
                { "owner": { "id": "tea-1", "type": "team", "name": "Acme", "email": "ops@acme.example" } }
            ]))
        }

        async fn list_services(&self, _credential: &str, _limit: u32) -> ApiResult {
            self.record(Call::ListServices);
            Ok(serde_json::json!([
                { "service": { "id": "srv-1", "name": "demo" } }
            ]))
        }

        async fn get_service(&self, _credential: &str, service_id: &str) -> ApiResult {
            self.record(Call::GetService(service_id.to_string()));
            Ok(serde_json::json!({ "id": service_id, "name": "demo", "type": "web_service" }))
        }

        async fn create_service(&self, _credential: &str, spec: &NewService) -> ApiResult {
            self.record(Call::Create(spec.clone()));
            Ok(serde_json::json!({
                "id": "srv-new",
                "name": spec.name,
                "type": spec.service_type,
            }))
        }

        async fn update_service(
            &self,
            _credential: &str,
            service_id: &str,
            _fields: Value,
        ) -> ApiResult {
            self.record(Call::Update(service_id.to_string()));
            Ok(Value::Null)
        }

        async fn delete_service(&self, _credential: &str, service_id: &str) -> ApiResult {
            self.record(Call::Delete(service_id.to_string()));
            Ok(Value::Null)
        }

        async fn restart_service(&self, _credential: &str, service_id: &str) -> ApiResult {
            self.record(Call::Restart(service_id.to_string()));
            match &self.restart_error {
                Some(error) => Err(error.clone()),
                None => Ok(Value::Null),
            }
        }

        async fn trigger_deploy(
            &self,
            _credential: &str,
            service_id: &str,
            _clear_cache: bool,
        ) -> ApiResult {
            self.record(Call::Deploy(service_id.to_string()));
            Ok(serde_json::json!({ "id": "dep-1" }))
        }

        async fn fetch_logs(&self, _credential: &str, service_id: &str, _limit: u32) -> ApiResult {
            self.record(Call::Logs(service_id.to_string()));
            Ok(serde_json::json!({ "logs": [ { "message": "hello" } ] }))
        }

        async fn list_env_vars(&self, _credential: &str, service_id: &str) -> ApiResult {
            self.record(Call::EnvList(service_id.to_string()));
            Ok(serde_json::json!({ "envVars": [] }))
        }

        async fn upsert_env_vars(
            &self,
            _credential: &str,
            service_id: &str,
            vars: &[(String, String)],
        ) -> ApiResult {
            self.record(Call::Upsert(service_id.to_string(), vars.to_vec()));
            Ok(Value::Null)
        }

        async fn delete_env_var(
            &self,
            _credential: &str,
            service_id: &str,
            key: &str,
        ) -> ApiResult {
            self.record(Call::EnvDelete(service_id.to_string(), key.to_string()));
            Ok(Value::Null)
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        api: Arc<FakeApi>,
        store: Arc<StateStore>,
        engine: Engine,
    }

    fn harness_with(api: FakeApi) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(StateStore::open(dir.path().join("state.redb")).expect("store"));
        let api = Arc::new(api);
        let engine = Engine::new(api.clone(), store.clone());
        Harness {
            _dir: dir,
            api,
            store,
            engine,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeApi::default())
    }

    fn logged_in(harness: &Harness, user_id: i64) {
        harness
            .store
            .set_session(user_id, &UserSession::new("rnd_key"))
            .expect("session");
    }

    fn action_event(user_id: i64, token: &str) -> InboundEvent {
        InboundEvent {
            user_id,
            chat_id: user_id,
            payload: EventPayload::Action(token.to_string()),
        }
    }

    fn text_event(user_id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            user_id,
            chat_id: user_id,
            payload: EventPayload::Text(text.to_string()),
        }
    }

    #[tokio::test]
    async fn list_without_credential_issues_no_remote_calls() {
        let harness = harness();
        let reply = harness.engine.handle(action_event(1, "list")).await;

        assert!(reply.text.contains("/login"));
        assert!(harness.api.calls().is_empty());
    }

    #[tokio::test]
    async fn login_verifies_and_stores_session() {
        let harness = harness();
        let reply = harness
            .engine
            .handle(InboundEvent {
                user_id: 5,
                chat_id: 5,
                payload: EventPayload::Command {
                    name: "login".to_string(),
                    arg: "rnd_live_key".to_string(),
                },
            })
            .await;

        assert!(reply.text.contains("API key saved"));
        assert_eq!(harness.api.calls(), vec![Call::Verify]);
        let session = harness.store.session(5).expect("read").expect("present");
        assert_eq!(session.api_key, "rnd_live_key");
    }

    #[tokio::test]
    async fn env_var_batch_issues_exactly_one_upsert_with_all_pairs() {
        let harness = harness();
        logged_in(&harness, 2);

        harness.engine.handle(action_event(2, "env_add:srv-1")).await;
        let reply = harness
            .engine
            .handle(text_event(2, "MY_KEY=123\nOTHER=abc"))
            .await;

        assert!(reply.text.contains("Upserted 2"));
        let upserts: Vec<Call> = harness
            .api
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Upsert(..)))
            .collect();
        assert_eq!(
            upserts,
            vec![Call::Upsert(
                "srv-1".to_string(),
                vec![
                    ("MY_KEY".to_string(), "123".to_string()),
                    ("OTHER".to_string(), "abc".to_string()),
                ]
            )]
        );
        // Flow is done; the slot is free again.
        assert!(harness.engine.pending.peek(2).await.is_none());
    }

    #[tokio::test]
    async fn env_var_batch_with_no_pairs_sends_nothing_and_stays_pending() {
        let harness = harness();
        logged_in(&harness, 3);

        harness.engine.handle(action_event(3, "env_add:srv-1")).await;
        let reply = harness
            .engine
            .handle(text_event(3, "no separators here"))
            .await;

        assert!(reply.text.contains("No valid KEY=VALUE"));
        assert!(!harness
            .api
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Upsert(..))));
        // ValidationFailed keeps the flow at the current step.
        let pending = harness.engine.pending.peek(3).await.expect("still pending");
        assert_eq!(pending.step, 0);
    }

    #[tokio::test]
    async fn create_flow_with_skipped_branch_sends_default_main() {
        let harness = harness();
        logged_in(&harness, 4);

        harness.engine.handle(action_event(4, "create")).await;
        harness.engine.handle(text_event(4, "web_service")).await;
        harness.engine.handle(text_event(4, "demo")).await;
        harness
            .engine
            .handle(text_event(4, "https://example.com/u/r"))
            .await;
        harness.engine.handle(text_event(4, "-")).await;
        let reply = harness.engine.handle(text_event(4, "-")).await;

        assert!(reply.text.contains("Service created"));
        let create = harness
            .api
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::Create(spec) => Some(spec),
                _ => None,
            })
            .expect("create call issued");
        assert_eq!(create.branch, "main");
        assert_eq!(create.workspace_id, "tea-1");
        assert_eq!(create.repository.as_deref(), Some("https://example.com/u/r"));
        assert_eq!(create.start_command, None);

        // Collected fields round-trip into the persisted mapping.
        let mapping = harness
            .store
            .mapping("srv-new")
            .expect("read")
            .expect("mapping persisted");
        assert_eq!(mapping.repository, "https://example.com/u/r");
        assert_eq!(mapping.branch, "main");
        assert_eq!(mapping.start_command, None);

        // The resolved workspace is cached on the session.
        let session = harness.store.session(4).expect("read").expect("present");
        assert_eq!(session.default_workspace.as_deref(), Some("tea-1"));
    }

    #[tokio::test]
    async fn invalid_service_type_reprompts_without_advancing() {
        let harness = harness();
        logged_in(&harness, 6);

        harness.engine.handle(action_event(6, "create")).await;
        let reply = harness.engine.handle(text_event(6, "blimp")).await;

        assert!(reply.text.contains("not a valid service type"));
        let pending = harness.engine.pending.peek(6).await.expect("pending");
        assert_eq!(pending.step, 0);
    }

    #[tokio::test]
    async fn starting_a_second_flow_discards_the_first() {
        let harness = harness();
        logged_in(&harness, 7);

        harness.engine.handle(action_event(7, "env_add:srv-a")).await;
        harness.engine.handle(action_event(7, "svc_repo:srv-b")).await;

        let pending = harness.engine.pending.peek(7).await.expect("pending");
        assert_eq!(pending.kind, FlowKind::SetRepository);
        assert_eq!(pending.target.as_deref(), Some("srv-b"));
        assert!(pending.fields.is_empty());
    }

    #[tokio::test]
    async fn set_repository_flow_updates_service_and_persists_mapping() {
        let harness = harness();
        logged_in(&harness, 8);

        harness.engine.handle(action_event(8, "svc_repo:srv-9")).await;
        harness
            .engine
            .handle(text_event(8, "https://example.com/u/r"))
            .await;
        harness.engine.handle(text_event(8, "develop")).await;
        let reply = harness.engine.handle(text_event(8, "npm start")).await;

        assert!(reply.text.contains("Repo set"));
        assert!(harness
            .api
            .calls()
            .contains(&Call::Update("srv-9".to_string())));
        let mapping = harness
            .store
            .mapping("srv-9")
            .expect("read")
            .expect("present");
        assert_eq!(mapping.branch, "develop");
        assert_eq!(mapping.start_command.as_deref(), Some("npm start"));
    }

    #[tokio::test]
    async fn free_text_without_pending_flow_reports_nothing_pending() {
        let harness = harness();
        logged_in(&harness, 9);

        let reply = harness.engine.handle(text_event(9, "stray message")).await;
        assert!(reply.text.contains("Nothing is pending"));
        assert!(harness.api.calls().is_empty());
    }

    #[tokio::test]
    async fn unreachable_restart_for_one_user_does_not_block_another() {
        let harness = harness_with(FakeApi {
            restart_error: Some(ApiError::unreachable("service returned 503")),
            ..FakeApi::default()
        });
        logged_in(&harness, 10);
        logged_in(&harness, 11);

        let (restart_reply, list_reply) = tokio::join!(
            harness.engine.handle(action_event(10, "svc_restart:srv-1")),
            harness.engine.handle(action_event(11, "list")),
        );

        assert!(restart_reply.text.contains("try again later"));
        assert!(list_reply.text.contains("Your Services"));
    }

    #[tokio::test]
    async fn delete_env_var_flow_targets_the_right_key() {
        let harness = harness();
        logged_in(&harness, 12);

        harness.engine.handle(action_event(12, "env_del:srv-1")).await;
        let reply = harness.engine.handle(text_event(12, "DATABASE_URL")).await;

        assert!(reply.text.contains("DATABASE_URL"));
        assert!(harness
            .api
            .calls()
            .contains(&Call::EnvDelete("srv-1".to_string(), "DATABASE_URL".to_string())));
    }

    #[tokio::test]
    async fn cancel_command_clears_pending_flow() {
        let harness = harness();
        logged_in(&harness, 13);

        harness.engine.handle(action_event(13, "env_add:srv-1")).await;
        let reply = harness
            .engine
            .handle(InboundEvent {
                user_id: 13,
                chat_id: 13,
                payload: EventPayload::Command {
                    name: "cancel".to_string(),
                    arg: String::new(),
                },
            })
            .await;

        assert!(reply.text.contains("cancelled"));
        assert!(harness.engine.pending.peek(13).await.is_none());
    }
}
