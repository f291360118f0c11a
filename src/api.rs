//! REST client for the hub backend.
//!
//! Every request carries the bearer credential from a [`TokenProvider`].
//! Non-2xx responses become [`ApiError::Status`] with the backend's
//! `message` when it sent one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::errors::ApiError;
use crate::models::{
    AdminAction, Priority, Project, ProjectEvent, ProjectMember, ProjectStatus, Task, TaskKind,
};
use crate::util::error_message_from_body;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Supplies the bearer credential for each request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `None` sends the request unauthenticated.
    async fn token(&self) -> Option<String>;
}

/// A fixed credential, e.g. from `--token` or `OPSHUB_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Filters for `GET /projects`.
#[derive(Debug, Clone, Default)]
pub struct ProjectQuery {
    pub org_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub status: ProjectStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMeeting {
    pub title: String,
    pub start_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meet_link: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient").field("base", &self.base).finish()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        let base = base_url.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base: base.to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<reqwest::Response, ApiError> {
        debug!(method = %method, path, "api request");
        let mut req = self.http.request(method, self.url(path));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = self.tokens.token().await {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = error_message_from_body(&text).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        Err(ApiError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        self.request(method, path, query, body)
            .await?
            .json::<T>()
            .await
            .map_err(|source| ApiError::Decode {
                path: path.to_string(),
                source,
            })
    }

    /// Like [`call`](Self::call) but discards the response body.
    async fn call_unit(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(), ApiError> {
        self.request(method, path, &[], body).await.map(|_| ())
    }

    fn encode<B: Serialize>(path: &str, body: &B) -> Result<Value, ApiError> {
        serde_json::to_value(body).map_err(|source| ApiError::Encode {
            path: path.to_string(),
            source,
        })
    }

    // ── Projects ─────────────────────────────────────────────────────

    pub async fn list_projects(&self, filter: &ProjectQuery) -> Result<Vec<Project>, ApiError> {
        let mut query = Vec::new();
        if let Some(org) = filter.org_id.as_deref() {
            query.push(("orgId", org));
        }
        if let Some(user) = filter.user_id.as_deref() {
            query.push(("userId", user));
        }
        self.call(Method::GET, "/projects", &query, None).await
    }

    pub async fn get_project(&self, id: &str) -> Result<Project, ApiError> {
        let path = format!("/projects/{}", segment(id));
        self.call(Method::GET, &path, &[], None).await
    }

    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ApiError> {
        let body = Self::encode("/projects", project)?;
        self.call(Method::POST, "/projects", &[], Some(&body)).await
    }

    /// Partial update: only the fields present in `patch` change.
    pub async fn update_project(&self, id: &str, patch: &Value) -> Result<Project, ApiError> {
        let path = format!("/projects/{}", segment(id));
        self.call(Method::PUT, &path, &[], Some(patch)).await
    }

    pub async fn delete_project(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/projects/{}", segment(id));
        self.call_unit(Method::DELETE, &path, None).await
    }

    pub async fn project_members(&self, id: &str) -> Result<Vec<ProjectMember>, ApiError> {
        let path = format!("/projects/{}/members", segment(id));
        self.call(Method::GET, &path, &[], None).await
    }

    pub async fn project_meetings(&self, id: &str) -> Result<Vec<ProjectEvent>, ApiError> {
        let path = format!("/projects/{}/events", segment(id));
        self.call(Method::GET, &path, &[], None).await
    }

    pub async fn create_meeting(
        &self,
        project_id: &str,
        meeting: &NewMeeting,
    ) -> Result<ProjectEvent, ApiError> {
        let path = format!("/projects/{}/events", segment(project_id));
        let body = Self::encode(&path, meeting)?;
        self.call(Method::POST, &path, &[], Some(&body)).await
    }

    // ── Tasks ────────────────────────────────────────────────────────

    pub async fn get_task(&self, id: &str) -> Result<Task, ApiError> {
        let path = format!("/tasks/{}", segment(id));
        self.call(Method::GET, &path, &[], None).await
    }

    pub async fn user_tasks(&self, user_id: &str) -> Result<Vec<Task>, ApiError> {
        let path = format!("/tasks/user/{}", segment(user_id));
        self.call(Method::GET, &path, &[], None).await
    }

    pub async fn project_tasks(&self, project_id: &str) -> Result<Vec<Task>, ApiError> {
        self.call(Method::GET, "/tasks", &[("projectId", project_id)], None)
            .await
    }

    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        let body = Self::encode("/tasks", task)?;
        self.call(Method::POST, "/tasks", &[], Some(&body)).await
    }

    /// Partial update, e.g. `{"status": "Done"}`.
    pub async fn update_task(&self, id: &str, patch: &Value) -> Result<Task, ApiError> {
        let path = format!("/tasks/{}", segment(id));
        self.call(Method::PUT, &path, &[], Some(patch)).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/tasks/{}", segment(id));
        self.call_unit(Method::DELETE, &path, None).await
    }

    pub async fn invite_to_task(&self, id: &str, target_user_id: &str) -> Result<(), ApiError> {
        let path = format!("/tasks/{}/invite", segment(id));
        let body = json!({ "targetUserId": target_user_id });
        self.call_unit(Method::POST, &path, Some(&body)).await
    }

    pub async fn approve_task(
        &self,
        id: &str,
        comment: &str,
        admin_name: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/tasks/{}/approve", segment(id));
        let body = json!({ "comment": comment, "adminName": admin_name });
        self.call_unit(Method::PUT, &path, Some(&body)).await
    }

    pub async fn disapprove_task(
        &self,
        id: &str,
        comment: &str,
        admin_name: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/tasks/{}/disapprove", segment(id));
        let body = json!({ "comment": comment, "adminName": admin_name });
        self.call_unit(Method::PUT, &path, Some(&body)).await
    }

    // ── Admin actions ────────────────────────────────────────────────

    pub async fn pending_actions(&self, org_id: &str) -> Result<Vec<AdminAction>, ApiError> {
        self.call(
            Method::GET,
            "/admin-actions/pending",
            &[("orgId", org_id)],
            None,
        )
        .await
    }

    pub async fn request_demotion(&self, target_user_id: &str, org_id: &str) -> Result<(), ApiError> {
        let body = json!({ "targetUserId": target_user_id, "orgId": org_id });
        self.call_unit(Method::POST, "/admin-actions/demote/request", Some(&body))
            .await
    }

    pub async fn approve_demotion(&self, action_id: &str) -> Result<(), ApiError> {
        let path = format!("/admin-actions/demote/approve/{}", segment(action_id));
        self.call_unit(Method::POST, &path, None).await
    }

    pub async fn approve_org_deletion(&self, action_id: &str) -> Result<(), ApiError> {
        let path = format!("/admin-actions/delete-org/approve/{}", segment(action_id));
        self.call_unit(Method::POST, &path, None).await
    }

    pub async fn reject_action(&self, action_id: &str) -> Result<(), ApiError> {
        let path = format!("/admin-actions/reject/{}", segment(action_id));
        self.call_unit(Method::POST, &path, None).await
    }

    pub async fn promote(&self, target_user_id: &str, org_id: &str) -> Result<(), ApiError> {
        let body = json!({ "targetUserId": target_user_id, "orgId": org_id });
        self.call_unit(Method::POST, "/admin-actions/promote", Some(&body))
            .await
    }
}

/// Percent-encode one path segment. Unreserved characters pass through.
fn segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
