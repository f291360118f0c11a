//! Domain types decoded from the backend's JSON.
//!
//! The backend is a MongoDB service: ids arrive as `_id` and field names are
//! camelCase. Everything except the id is optional on input so that a sparse
//! pushed payload still decodes; missing fields take their defaults.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::sync::Entity;

/// How long an approved task stays visible before it expires.
pub const APPROVAL_WINDOW_DAYS: i64 = 15;

// ── Enums ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    #[default]
    Active,
    Planning,
    OnHold,
    Completed,
    Cancelled,
    Archived,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectStatus::Active => "ACTIVE",
            ProjectStatus::Planning => "PLANNING",
            ProjectStatus::OnHold => "ON_HOLD",
            ProjectStatus::Completed => "COMPLETED",
            ProjectStatus::Cancelled => "CANCELLED",
            ProjectStatus::Archived => "ARCHIVED",
            ProjectStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            _ => Err(format!(
                "Invalid priority '{}'. Valid options: low, medium, high",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    #[default]
    Task,
    Bug,
    Feature,
    Improvement,
    Other,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Task => "TASK",
            TaskKind::Bug => "BUG",
            TaskKind::Feature => "FEATURE",
            TaskKind::Improvement => "IMPROVEMENT",
            TaskKind::Other => "OTHER",
            TaskKind::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentKind {
    #[default]
    Doc,
    Github,
    Link,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommentKind {
    #[default]
    Comment,
    Approval,
    Rejection,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminActionKind {
    DemoteAdmin,
    DeleteOrg,
    PromoteAdmin,
    #[serde(other)]
    Other,
}

impl AdminActionKind {
    pub fn title(&self) -> &'static str {
        match self {
            AdminActionKind::DemoteAdmin => "Admin Demotion Request",
            AdminActionKind::DeleteOrg => "Organization Deletion Request",
            AdminActionKind::PromoteAdmin => "Admin Promotion Request",
            AdminActionKind::Other => "Admin Request",
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Project {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A task's project: either the bare id or the populated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProjectRef {
    Id(String),
    Populated {
        #[serde(alias = "_id")]
        id: String,
        #[serde(default)]
        title: String,
    },
}

impl ProjectRef {
    pub fn id(&self) -> &str {
        match self {
            ProjectRef::Id(id) | ProjectRef::Populated { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAttachment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskComment {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "type")]
    pub kind: CommentKind,
    #[serde(default, deserialize_with = "lenient_date")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_task_status() -> String {
    "To Do".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: TaskKind,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_task_status")]
    pub status: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default, rename = "projectId")]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub attachments: Vec<TaskAttachment>,
    #[serde(default)]
    pub comments: Vec<TaskComment>,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default, deserialize_with = "lenient_date")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Task {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Task {
    pub fn project_id(&self) -> Option<&str> {
        self.project.as_ref().map(ProjectRef::id)
    }

    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.assignees.iter().any(|a| a == user_id)
    }

    pub fn is_done(&self) -> bool {
        self.status.eq_ignore_ascii_case("done")
    }

    /// When an approved task drops out of the approval window.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
            .map(|at| at + Duration::days(APPROVAL_WINDOW_DAYS))
    }

    /// Whole days left in the approval window, rounded up. A task that has
    /// not been approved reports the full window.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        let Some(expires) = self.expires_at() else {
            return APPROVAL_WINDOW_DAYS;
        };
        let remaining = (expires - now).num_seconds().abs();
        (remaining + 86_399) / 86_400
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
    pub clerk_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl ProjectMember {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

impl Entity for ProjectMember {
    fn id(&self) -> &str {
        &self.clerk_id
    }
}

/// A meeting scheduled on a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meet_link: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl Entity for ProjectEvent {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A pending admin-approval request, shown as a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAction {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AdminActionKind,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub requester_user_id: Option<String>,
    #[serde(default)]
    pub requester_name: Option<String>,
    #[serde(default)]
    pub target_user_id: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for AdminAction {
    fn id(&self) -> &str {
        &self.id
    }
}

impl AdminAction {
    pub fn is_pending(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("pending"))
            .unwrap_or(true)
    }

    /// Human summary, e.g. "Ana requested to demote Bo".
    pub fn summary(&self) -> String {
        let requester = self.requester_name.as_deref().unwrap_or("Someone");
        match self.kind {
            AdminActionKind::DeleteOrg => {
                format!("{} requested to delete this organization", requester)
            }
            AdminActionKind::DemoteAdmin => format!(
                "{} requested to demote {}",
                requester,
                self.target_name.as_deref().unwrap_or("an admin")
            ),
            AdminActionKind::PromoteAdmin => format!(
                "{} requested to promote {}",
                requester,
                self.target_name.as_deref().unwrap_or("a member")
            ),
            AdminActionKind::Other => format!("{} submitted a request", requester),
        }
    }
}

/// The signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    /// Organization role, e.g. `org:admin` or `org:member`.
    #[serde(default)]
    pub org_role: Option<String>,
    /// Role from the user's public metadata, e.g. `admin`.
    #[serde(default)]
    pub role: Option<String>,
}

impl Identity {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_org(mut self, org_id: &str) -> Self {
        self.org_id = Some(org_id.to_string());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin") || self.org_role.as_deref() == Some("org:admin")
    }
}

// ── Date handling ────────────────────────────────────────────────────

/// Accepts RFC 3339 timestamps, bare `YYYY-MM-DD` dates (midnight UTC),
/// and `null`. Strings that parse as neither are treated as absent.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_date))
}

pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
