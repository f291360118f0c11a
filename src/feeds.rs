//! Ready-made live views over the hub backend.
//!
//! Each feed is a thin configuration of [`LiveCollection`] or
//! [`LiveCounter`]: a REST snapshot, the events that mutate it, the rooms
//! its scope needs and the local signals that force a re-fetch.

use std::cmp::Ordering;

use crate::hub::Hub;
use crate::live::Room;
use crate::live::events::*;
use crate::models::{AdminAction, Project, ProjectEvent, ProjectMember, Task};
use crate::sync::{CounterOp, CounterSpec, LiveCollection, LiveCounter, Mutation, Signal, SyncSpec};

/// Scope of the project list: the active organization and/or the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceScope {
    pub org_id: Option<String>,
    pub user_id: Option<String>,
}

/// Scope of a single task's detail view. The project id picks the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskScope {
    pub task_id: String,
    pub project_id: Option<String>,
}

// ── Specs ────────────────────────────────────────────────────────────

pub fn projects_spec() -> SyncSpec<Project, WorkspaceScope> {
    SyncSpec::new()
        .on(PROJECT_CREATED, Mutation::Insert)
        .on(PROJECT_UPDATED, Mutation::Replace)
        .on(PROJECT_DELETED, Mutation::Remove)
        .on(PROJECTS_REFRESH, Mutation::Refresh)
        .rooms(|scope: &WorkspaceScope| {
            let mut rooms = Vec::new();
            if let Some(org) = &scope.org_id {
                rooms.push(Room::Org(org.clone()));
            }
            if let Some(user) = &scope.user_id {
                rooms.push(Room::User(user.clone()));
            }
            rooms
        })
        .refresh_on(Signal::ProjectUpdate)
        .accept(|scope: &WorkspaceScope, project: &Project| {
            match (&scope.org_id, &project.org_id) {
                (Some(want), Some(have)) => want == have,
                _ => true,
            }
        })
}

pub fn project_tasks_spec() -> SyncSpec<Task, String> {
    SyncSpec::new()
        .on(TASK_CREATED, Mutation::Insert)
        .on(TASK_UPDATED, Mutation::Replace)
        .on(TASK_DELETED, Mutation::Remove)
        .on(TASKS_REFRESH, Mutation::Refresh)
        .rooms(|project_id: &String| vec![Room::Project(project_id.clone())])
        .refresh_on(Signal::TaskUpdate)
        .accept(|project_id: &String, task: &Task| task.project_id() == Some(project_id.as_str()))
}

pub fn member_tasks_spec() -> SyncSpec<Task, String> {
    SyncSpec::new()
        .on(TASK_CREATED, Mutation::Insert)
        .on(TASK_UPDATED, Mutation::Replace)
        .on(TASK_DELETED, Mutation::Remove)
        .on(TASKS_REFRESH, Mutation::Refresh)
        .rooms(|user_id: &String| vec![Room::User(user_id.clone())])
        .refresh_on(Signal::TaskUpdate)
        .accept(|user_id: &String, task: &Task| task.is_assigned_to(user_id))
}

pub fn task_detail_spec() -> SyncSpec<Task, TaskScope> {
    SyncSpec::new()
        .on(TASK_UPDATED, Mutation::Replace)
        .on(TASK_DELETED, Mutation::Remove)
        .rooms(|scope: &TaskScope| {
            scope
                .project_id
                .iter()
                .map(|id| Room::Project(id.clone()))
                .collect()
        })
        .accept(|scope: &TaskScope, task: &Task| task.id == scope.task_id)
}

pub fn project_meetings_spec() -> SyncSpec<ProjectEvent, String> {
    SyncSpec::new()
        .on(MEETING_CREATED, Mutation::Insert)
        .rooms(|project_id: &String| vec![Room::Project(project_id.clone())])
        .accept(|project_id: &String, meeting: &ProjectEvent| {
            meeting
                .project_id
                .as_deref()
                .is_none_or(|id| id == project_id)
        })
        .sort_by(by_start_date)
}

pub fn project_members_spec() -> SyncSpec<ProjectMember, String> {
    SyncSpec::new()
        .on(MEMBER_ADDED, Mutation::Insert)
        .on(MEMBER_REMOVED, Mutation::Remove)
        .on(MEMBERS_REFRESH, Mutation::Refresh)
        .rooms(|project_id: &String| vec![Room::Project(project_id.clone())])
        .refresh_on(Signal::MemberUpdate)
}

pub fn pending_actions_spec() -> SyncSpec<AdminAction, String> {
    SyncSpec::new()
        .on(ADMIN_ACTION_CREATED, Mutation::Insert)
        .on(ADMIN_ACTION_RESOLVED, Mutation::Remove)
        .on(NOTIFICATIONS_REFRESH, Mutation::Refresh)
        .rooms(|org_id: &String| vec![Room::Org(org_id.clone())])
        .refresh_on(Signal::NotificationUpdate)
        .accept(|org_id: &String, action: &AdminAction| {
            action.is_pending() && action.org_id.as_deref().is_none_or(|id| id == org_id)
        })
}

pub fn unread_badge_spec() -> CounterSpec<String> {
    CounterSpec::new()
        .on(ADMIN_ACTION_CREATED, CounterOp::Increment)
        .on(ADMIN_ACTION_RESOLVED, CounterOp::Decrement)
        .on(NOTIFICATIONS_REFRESH, CounterOp::Recompute)
        .rooms(|org_id: &String| vec![Room::Org(org_id.clone())])
        .refresh_on(Signal::NotificationUpdate)
}

/// Open tasks assigned to a user. A created task only counts when it is
/// assigned to the user and not already done; updates and deletes can
/// change either, so they recount.
pub fn my_task_count_spec() -> CounterSpec<String> {
    CounterSpec::new()
        .on(TASK_CREATED, CounterOp::Increment)
        .on(TASK_UPDATED, CounterOp::Recompute)
        .on(TASK_DELETED, CounterOp::Recompute)
        .on(TASKS_REFRESH, CounterOp::Recompute)
        .rooms(|user_id: &String| vec![Room::User(user_id.clone())])
        .refresh_on(Signal::TaskUpdate)
        .filter(|user_id: &String, payload: &serde_json::Value| {
            serde_json::from_value::<Task>(payload.clone())
                .map(|task| task.is_assigned_to(user_id) && !task.is_done())
                .unwrap_or(false)
        })
}

fn by_start_date(a: &ProjectEvent, b: &ProjectEvent) -> Ordering {
    // Undated meetings sort last.
    match (a.start_date, b.start_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ── Feeds ────────────────────────────────────────────────────────────

pub fn projects(hub: &Hub) -> LiveCollection<Project, WorkspaceScope> {
    let api = hub.api().clone();
    LiveCollection::new(
        "projects",
        hub.manager().clone(),
        hub.signals().clone(),
        move |scope: WorkspaceScope| {
            let api = api.clone();
            async move {
                let query = crate::api::ProjectQuery {
                    org_id: scope.org_id,
                    user_id: scope.user_id,
                };
                api.list_projects(&query).await.map_err(anyhow::Error::from)
            }
        },
        projects_spec(),
    )
}

pub fn project_tasks(hub: &Hub) -> LiveCollection<Task, String> {
    let api = hub.api().clone();
    LiveCollection::new(
        "project_tasks",
        hub.manager().clone(),
        hub.signals().clone(),
        move |project_id: String| {
            let api = api.clone();
            async move { api.project_tasks(&project_id).await.map_err(anyhow::Error::from) }
        },
        project_tasks_spec(),
    )
}

pub fn member_tasks(hub: &Hub) -> LiveCollection<Task, String> {
    let api = hub.api().clone();
    LiveCollection::new(
        "member_tasks",
        hub.manager().clone(),
        hub.signals().clone(),
        move |user_id: String| {
            let api = api.clone();
            async move { api.user_tasks(&user_id).await.map_err(anyhow::Error::from) }
        },
        member_tasks_spec(),
    )
}

/// A one-element collection. A deleted task leaves it empty.
pub fn task_detail(hub: &Hub) -> LiveCollection<Task, TaskScope> {
    let api = hub.api().clone();
    LiveCollection::new(
        "task_detail",
        hub.manager().clone(),
        hub.signals().clone(),
        move |scope: TaskScope| {
            let api = api.clone();
            async move { Ok::<_, anyhow::Error>(vec![api.get_task(&scope.task_id).await?]) }
        },
        task_detail_spec(),
    )
}

pub fn project_meetings(hub: &Hub) -> LiveCollection<ProjectEvent, String> {
    let api = hub.api().clone();
    LiveCollection::new(
        "project_meetings",
        hub.manager().clone(),
        hub.signals().clone(),
        move |project_id: String| {
            let api = api.clone();
            async move { api.project_meetings(&project_id).await.map_err(anyhow::Error::from) }
        },
        project_meetings_spec(),
    )
}

pub fn project_members(hub: &Hub) -> LiveCollection<ProjectMember, String> {
    let api = hub.api().clone();
    LiveCollection::new(
        "project_members",
        hub.manager().clone(),
        hub.signals().clone(),
        move |project_id: String| {
            let api = api.clone();
            async move { api.project_members(&project_id).await.map_err(anyhow::Error::from) }
        },
        project_members_spec(),
    )
}

pub fn pending_actions(hub: &Hub) -> LiveCollection<AdminAction, String> {
    let api = hub.api().clone();
    LiveCollection::new(
        "pending_actions",
        hub.manager().clone(),
        hub.signals().clone(),
        move |org_id: String| {
            let api = api.clone();
            async move { api.pending_actions(&org_id).await.map_err(anyhow::Error::from) }
        },
        pending_actions_spec(),
    )
}

pub fn unread_badge(hub: &Hub) -> LiveCounter<String> {
    let api = hub.api().clone();
    LiveCounter::new(
        "unread_badge",
        hub.manager().clone(),
        hub.signals().clone(),
        move |org_id: String| {
            let api = api.clone();
            async move {
                let pending = api.pending_actions(&org_id).await?;
                Ok::<_, anyhow::Error>(pending.iter().filter(|a| a.is_pending()).count() as u64)
            }
        },
        unread_badge_spec(),
    )
}

pub fn my_task_count(hub: &Hub) -> LiveCounter<String> {
    let api = hub.api().clone();
    LiveCounter::new(
        "my_task_count",
        hub.manager().clone(),
        hub.signals().clone(),
        move |user_id: String| {
            let api = api.clone();
            async move {
                let tasks = api.user_tasks(&user_id).await?;
                Ok::<_, anyhow::Error>(tasks.iter().filter(|t| !t.is_done()).count() as u64)
            }
        },
        my_task_count_spec(),
    )
}
