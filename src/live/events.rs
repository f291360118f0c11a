//! Event names shared with the backend.
//!
//! The set is open: these constants are the names the backend emits today,
//! and any other string may be subscribed to as well.

/// Client → server: announce the signed-in user (`{"userId": ...}`).
pub const SETUP: &str = "setup";

pub const PROJECT_CREATED: &str = "project:created";
pub const PROJECT_UPDATED: &str = "project:updated";
pub const PROJECT_DELETED: &str = "project:deleted";
pub const PROJECTS_REFRESH: &str = "projects:refresh";

pub const TASK_CREATED: &str = "task:created";
pub const TASK_UPDATED: &str = "task:updated";
pub const TASK_DELETED: &str = "task:deleted";
pub const TASKS_REFRESH: &str = "tasks:refresh";

/// A meeting was scheduled on a project.
pub const MEETING_CREATED: &str = "event:created";

pub const MEMBER_ADDED: &str = "member:added";
pub const MEMBER_REMOVED: &str = "member:removed";
pub const MEMBERS_REFRESH: &str = "members:refresh";

pub const ADMIN_ACTION_CREATED: &str = "admin-action:created";
pub const ADMIN_ACTION_RESOLVED: &str = "admin-action:resolved";
pub const NOTIFICATIONS_REFRESH: &str = "notifications:refresh";
