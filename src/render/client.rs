//! HTTP client for the Render management API.
//!
//! Every operation funnels through one request wrapper that normalizes the
//! outcome into [`ApiResult`]: 2xx → the parsed JSON body, 4xx →
//! [`ApiErrorKind::Rejected`] with the remote message preserved verbatim,
//! 5xx or any transport failure → [`ApiErrorKind::Unreachable`]. No reqwest
//! error ever escapes this module, and nothing here retries — a mutating
//! call is issued at most once per user action.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;

/// Documented page-size ceiling of the service listing endpoint. Caller
/// limits are clamped here rather than forwarded out of range.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Ceiling on log lines per fetch.
pub const MAX_LOG_LINES: u32 = 100;

/// Service types the creation endpoint accepts.
pub const VALID_SERVICE_TYPES: [&str; 6] = [
    "static_site",
    "web_service",
    "private_service",
    "background_worker",
    "cron_job",
    "workflow",
];

/// Service types that take a repository at creation time.
const REPO_SERVICE_TYPES: [&str; 5] = [
    "web_service",
    "private_service",
    "background_worker",
    "workflow",
    "static_site",
];

/// Failure classification every layer above the client consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The remote service rejected the call (4xx): bad input, not found,
    /// invalid credential. The message is shown to the user verbatim.
    Rejected { status: u16 },
    /// The remote service could not be reached or failed (network error,
    /// timeout, 5xx). Surfaced as a generic retry-later message.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Rejected { status },
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Unreachable,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ApiErrorKind::Rejected { status } => {
                write!(f, "rejected ({}): {}", status, self.message)
            }
            ApiErrorKind::Unreachable => write!(f, "unreachable: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Uniform outcome of one remote operation.
pub type ApiResult = Result<Value, ApiError>;

/// Fields collected for service creation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewService {
    pub service_type: String,
    pub name: String,
    pub workspace_id: String,
    pub repository: Option<String>,
    pub branch: String,
    pub start_command: Option<String>,
}

/// Capability set of the management API. The engine and tests depend on this
/// seam rather than on the HTTP client, so flows can be exercised with a
/// recording fake.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Cheap credential check: fetch the workspace list.
    async fn verify_credential(&self, credential: &str) -> ApiResult;

    /// Workspaces (owners) visible to the credential.
    async fn list_workspaces(&self, credential: &str) -> ApiResult;

    /// Pick the owning workspace used for service creation. Deterministic
    /// tie-break: the first team workspace in API order wins, then the first
    /// personal workspace. The choice is silent and consequential, so it
    /// must never depend on anything but the API's ordering.
    async fn resolve_default_workspace(&self, credential: &str) -> Result<String, ApiError> {
        let workspaces = self.list_workspaces(credential).await?;
        pick_default_workspace(&workspaces).ok_or_else(|| {
            ApiError::rejected(404, "no workspace is visible to this API key")
        })
    }

    async fn list_services(&self, credential: &str, limit: u32) -> ApiResult;
    async fn get_service(&self, credential: &str, service_id: &str) -> ApiResult;
    async fn create_service(&self, credential: &str, spec: &NewService) -> ApiResult;
    async fn update_service(&self, credential: &str, service_id: &str, fields: Value)
        -> ApiResult;
    async fn delete_service(&self, credential: &str, service_id: &str) -> ApiResult;
    async fn restart_service(&self, credential: &str, service_id: &str) -> ApiResult;
    async fn trigger_deploy(
        &self,
        credential: &str,
        service_id: &str,
        clear_cache: bool,
    ) -> ApiResult;
    async fn fetch_logs(&self, credential: &str, service_id: &str, limit: u32) -> ApiResult;
    async fn list_env_vars(&self, credential: &str, service_id: &str) -> ApiResult;
    async fn upsert_env_vars(
        &self,
        credential: &str,
        service_id: &str,
        vars: &[(String, String)],
    ) -> ApiResult;
    async fn delete_env_var(&self, credential: &str, service_id: &str, key: &str) -> ApiResult;
}

/// reqwest-backed client. Stateless per call: the caller's credential is an
/// argument, never stored.
pub struct RenderClient {
    http: reqwest::Client,
    base_url: String,
}

impl RenderClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        credential: &str,
        query: Option<&[(&str, String)]>,
        body: Option<Value>,
    ) -> ApiResult {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(credential)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, %method, %url, "management API request failed");
                return Err(ApiError::unreachable(format!("request failed: {error}")));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(%error, %method, %url, "failed to read management API body");
                return Err(ApiError::unreachable(format!(
                    "failed to read response body: {error}"
                )));
            }
        };

        // Some endpoints (DELETE, restart) return an empty body on success.
        let payload: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()))
        };

        if status.is_success() {
            Ok(payload)
        } else if status.is_client_error() {
            tracing::debug!(status = status.as_u16(), %url, "management API rejected call");
            Err(ApiError::rejected(status.as_u16(), remote_message(&payload)))
        } else {
            tracing::warn!(status = status.as_u16(), %url, "management API server error");
            Err(ApiError::unreachable(format!(
                "service returned {status}"
            )))
        }
    }
}

#[async_trait]
impl ManagementApi for RenderClient {
    async fn verify_credential(&self, credential: &str) -> ApiResult {
        self.request(Method::GET, "/owners", credential, None, None)
            .await
    }

    async fn list_workspaces(&self, credential: &str) -> ApiResult {
        self.request(Method::GET, "/owners", credential, None, None)
            .await
    }

    async fn list_services(&self, credential: &str, limit: u32) -> ApiResult {
        let limit = clamp_limit(limit, MAX_PAGE_SIZE);
        self.request(
            Method::GET,
            "/services",
            credential,
            Some(&[("limit", limit.to_string())]),
            None,
        )
        .await
    }

    async fn get_service(&self, credential: &str, service_id: &str) -> ApiResult {
        self.request(
            Method::GET,
            &format!("/services/{service_id}"),
            credential,
            None,
            None,
        )
        .await
    }

    async fn create_service(&self, credential: &str, spec: &NewService) -> ApiResult {
        // Rejected locally so an impossible request never reaches the wire.
        if !VALID_SERVICE_TYPES.contains(&spec.service_type.as_str()) {
            return Err(ApiError::rejected(
                400,
                format!("invalid service type: {}", spec.service_type),
            ));
        }

        let mut body = json!({
            "ownerId": spec.workspace_id,
            "name": spec.name,
            "type": spec.service_type,
        });
        if REPO_SERVICE_TYPES.contains(&spec.service_type.as_str())
            && let Some(repository) = &spec.repository
        {
            body["repo"] = json!(repository);
            body["branch"] = json!(spec.branch);
            if let Some(start_command) = &spec.start_command {
                body["startCommand"] = json!(start_command);
            }
        }

        self.request(Method::POST, "/services", credential, None, Some(body))
            .await
    }

    async fn update_service(
        &self,
        credential: &str,
        service_id: &str,
        fields: Value,
    ) -> ApiResult {
        self.request(
            Method::PATCH,
            &format!("/services/{service_id}"),
            credential,
            None,
            Some(fields),
        )
        .await
    }

    async fn delete_service(&self, credential: &str, service_id: &str) -> ApiResult {
        self.request(
            Method::DELETE,
            &format!("/services/{service_id}"),
            credential,
            None,
            None,
        )
        .await
    }

    async fn restart_service(&self, credential: &str, service_id: &str) -> ApiResult {
        let result = self
            .request(
                Method::POST,
                &format!("/services/{service_id}/restart"),
                credential,
                None,
                Some(json!({})),
            )
            .await;

        // Some service types have no restart endpoint; a fresh deploy is the
        // closest equivalent.
        match result {
            Err(ApiError {
                kind: ApiErrorKind::Rejected { .. },
                ..
            }) => self.trigger_deploy(credential, service_id, false).await,
            other => other,
        }
    }

    async fn trigger_deploy(
        &self,
        credential: &str,
        service_id: &str,
        clear_cache: bool,
    ) -> ApiResult {
        self.request(
            Method::POST,
            &format!("/services/{service_id}/deploys"),
            credential,
            None,
            Some(json!({ "clearCache": clear_cache })),
        )
        .await
    }

    async fn fetch_logs(&self, credential: &str, service_id: &str, limit: u32) -> ApiResult {
        let limit = clamp_limit(limit, MAX_LOG_LINES);
        self.request(
            Method::GET,
            &format!("/services/{service_id}/logs"),
            credential,
            Some(&[
                ("tail", "true".to_string()),
                ("limit", limit.to_string()),
            ]),
            None,
        )
        .await
    }

    async fn list_env_vars(&self, credential: &str, service_id: &str) -> ApiResult {
        self.request(
            Method::GET,
            &format!("/services/{service_id}/env-vars"),
            credential,
            None,
            None,
        )
        .await
    }

    async fn upsert_env_vars(
        &self,
        credential: &str,
        service_id: &str,
        vars: &[(String, String)],
    ) -> ApiResult {
        let body = Value::Array(
            vars.iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect(),
        );
        self.request(
            Method::PUT,
            &format!("/services/{service_id}/env-vars"),
            credential,
            None,
            Some(body),
        )
        .await
    }

    async fn delete_env_var(&self, credential: &str, service_id: &str, key: &str) -> ApiResult {
        self.request(
            Method::DELETE,
            &format!("/services/{service_id}/env-vars/{key}"),
            credential,
            None,
            None,
        )
        .await
    }
}

/// Clamp a caller-supplied page size into the service's documented range.
fn clamp_limit(limit: u32, max: u32) -> u32 {
    limit.clamp(1, max)
}

/// Pull the human-readable message out of an error body, falling back to the
/// raw body so the remote reason is never dropped.
fn remote_message(payload: &Value) -> String {
    if let Some(message) = payload.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    match payload {
        Value::String(text) => text.clone(),
        Value::Null => "(no details provided)".to_string(),
        other => other.to_string(),
    }
}

/// Select the owning workspace from a workspace-list payload.
///
/// Entries arrive either wrapped (`{"owner": {...}}`) or bare. Team
/// workspaces are preferred over personal ones; within a type, API order
/// decides.
pub fn pick_default_workspace(payload: &Value) -> Option<String> {
    let entries = payload.as_array()?;

    let owner_of = |entry: &Value| -> Option<(String, String)> {
        let owner = entry.get("owner").unwrap_or(entry);
        let id = owner.get("id")?.as_str()?.to_string();
        let owner_type = owner
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("user")
            .to_string();
        Some((id, owner_type))
    };

    let owners: Vec<(String, String)> = entries.iter().filter_map(owner_of).collect();

    owners
        .iter()
        .find(|(_, owner_type)| owner_type == "team")
        .or_else(|| owners.iter().find(|(_, owner_type)| owner_type == "user"))
        .map(|(id, _)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_bounds_both_ends() {
        assert_eq!(clamp_limit(0, MAX_PAGE_SIZE), 1);
        assert_eq!(clamp_limit(50, MAX_PAGE_SIZE), 50);
        assert_eq!(clamp_limit(5000, MAX_PAGE_SIZE), 100);
    }

    #[test]
    fn workspace_pick_prefers_team_over_user() {
        let payload = serde_json::json!([
            { "owner": { "id": "usr-1", "type": "user" } },
            { "owner": { "id": "tea-1", "type": "team" } },
            { "owner": { "id": "tea-2", "type": "team" } },
        ]);
        assert_eq!(pick_default_workspace(&payload).as_deref(), Some("tea-1"));
    }

    #[test]
    fn workspace_pick_falls_back_to_first_user() {
        let payload = serde_json::json!([
            { "owner": { "id": "usr-1", "type": "user" } },
            { "owner": { "id": "usr-2", "type": "user" } },
        ]);
        assert_eq!(pick_default_workspace(&payload).as_deref(), Some("usr-1"));
    }

    #[test]
    fn workspace_pick_handles_unwrapped_entries() {
        let payload = serde_json::json!([
            { "id": "tea-9", "type": "team" },
        ]);
        assert_eq!(pick_default_workspace(&payload).as_deref(), Some("tea-9"));
    }

    #[test]
    fn workspace_pick_empty_list_yields_none() {
        assert_eq!(pick_default_workspace(&serde_json::json!([])), None);
        assert_eq!(pick_default_workspace(&serde_json::json!({})), None);
    }

    #[test]
    fn remote_message_prefers_structured_message() {
        let payload = serde_json::json!({ "message": "service not found" });
        assert_eq!(remote_message(&payload), "service not found");

        let raw = Value::String("plain body".to_string());
        assert_eq!(remote_message(&raw), "plain body");
    }

    #[test]
    fn error_display_names_the_class() {
        let rejected = ApiError::rejected(404, "not found");
        assert_eq!(rejected.to_string(), "rejected (404): not found");

        let unreachable = ApiError::unreachable("timed out");
        assert_eq!(unreachable.to_string(), "unreachable: timed out");
    }
}
