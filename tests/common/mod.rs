//! In-process fake of the hub backend: REST routes under `/api`, a storage
//! upload endpoint and a Socket.IO WebSocket endpoint, all on one
//! `127.0.0.1:0` listener.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use opshub::live::wire::{self, EnginePacket, OpenInfo, SocketPacket};
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub path: String,
    pub apikey: Option<String>,
    pub content_type: Option<String>,
    pub upsert: Option<String>,
    pub cache_control: Option<String>,
    pub size: usize,
}

#[derive(Default)]
pub struct Db {
    pub projects: Vec<Value>,
    pub tasks: Vec<Value>,
    pub actions: Vec<Value>,
    pub uploads: Vec<Upload>,
}

pub struct Backend {
    pub db: Mutex<Db>,
    pub requests: Mutex<Vec<Recorded>>,
    /// Events the clients emitted, in arrival order.
    pub client_events: Mutex<Vec<(String, Value)>>,
    push: broadcast::Sender<String>,
    next_id: AtomicU64,
}

impl Backend {
    fn id(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn push(&self, event: &str, payload: Value) {
        let _ = self.push.send(wire::event_frame(event, payload));
    }
}

pub struct FakeBackend {
    pub addr: SocketAddr,
    pub state: Arc<Backend>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let (push, _) = broadcast::channel(256);
        let state = Arc::new(Backend {
            db: Mutex::new(Db::default()),
            requests: Mutex::new(Vec::new()),
            client_events: Mutex::new(Vec::new()),
            push,
            next_id: AtomicU64::new(100),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn seed_project(&self, project: Value) {
        self.state.db.lock().unwrap().projects.push(project);
    }

    pub fn seed_task(&self, task: Value) {
        self.state.db.lock().unwrap().tasks.push(task);
    }

    pub fn seed_action(&self, action: Value) {
        self.state.db.lock().unwrap().actions.push(action);
    }

    /// Push an event to every connected socket.
    pub fn push(&self, event: &str, payload: Value) {
        self.state.push(event, payload);
    }

    pub fn client_events(&self) -> Vec<(String, Value)> {
        self.state.client_events.lock().unwrap().clone()
    }

    pub fn saw_client_event(&self, name: &str, payload: &Value) -> bool {
        self.client_events()
            .iter()
            .any(|(n, p)| n == name && p == payload)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state.db.lock().unwrap().uploads.clone()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Poll `check` until it holds, failing after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn router(state: Arc<Backend>) -> Router {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/user/{user_id}", get(user_tasks))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/admin-actions/pending", get(pending_actions))
        .route("/api/admin-actions/reject/{id}", post(reject_action))
        .route("/storage/v1/object/{bucket}/{name}", post(upload_object))
        .route("/socket.io/", get(socket_io))
        .layer(middleware::from_fn_with_state(state.clone(), record))
        .with_state(state)
}

async fn record(State(state): State<Arc<Backend>>, req: Request, next: Next) -> Response {
    let uri = req.uri();
    state.requests.lock().unwrap().push(Recorded {
        method: req.method().to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        authorization: req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });
    next.run(req).await
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": format!("{} not found", what) })),
    )
        .into_response()
}

fn id_of(doc: &Value) -> &str {
    doc["_id"].as_str().unwrap_or_default()
}

// ── Projects ─────────────────────────────────────────────────────────

async fn list_projects(
    State(state): State<Arc<Backend>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let db = state.db.lock().unwrap();
    let projects = db
        .projects
        .iter()
        .filter(|p| match query.get("orgId") {
            Some(org) => p["orgId"].as_str() == Some(org.as_str()),
            None => true,
        })
        .cloned()
        .collect();
    Json(projects)
}

async fn create_project(State(state): State<Arc<Backend>>, Json(mut body): Json<Value>) -> Response {
    body["_id"] = json!(state.id("p"));
    state.db.lock().unwrap().projects.push(body.clone());
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn get_project(State(state): State<Arc<Backend>>, Path(id): Path<String>) -> Response {
    let db = state.db.lock().unwrap();
    match db.projects.iter().find(|p| id_of(p) == id) {
        Some(p) => Json(p.clone()).into_response(),
        None => not_found("Project"),
    }
}

// ── Tasks ────────────────────────────────────────────────────────────

async fn list_tasks(
    State(state): State<Arc<Backend>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let db = state.db.lock().unwrap();
    let tasks = db
        .tasks
        .iter()
        .filter(|t| match query.get("projectId") {
            Some(project) => t["projectId"].as_str() == Some(project.as_str()),
            None => true,
        })
        .cloned()
        .collect();
    Json(tasks)
}

async fn user_tasks(State(state): State<Arc<Backend>>, Path(user_id): Path<String>) -> Json<Vec<Value>> {
    let db = state.db.lock().unwrap();
    let tasks = db
        .tasks
        .iter()
        .filter(|t| {
            t["assignees"]
                .as_array()
                .is_some_and(|a| a.iter().any(|u| u.as_str() == Some(user_id.as_str())))
        })
        .cloned()
        .collect();
    Json(tasks)
}

/// Stores the task, pushes `task:created`, then responds, the order the
/// real backend uses.
async fn create_task(State(state): State<Arc<Backend>>, Json(mut body): Json<Value>) -> Response {
    body["_id"] = json!(state.id("t"));
    if body.get("status").is_none() {
        body["status"] = json!("To Do");
    }
    state.db.lock().unwrap().tasks.push(body.clone());
    state.push("task:created", body.clone());
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn get_task(State(state): State<Arc<Backend>>, Path(id): Path<String>) -> Response {
    let db = state.db.lock().unwrap();
    match db.tasks.iter().find(|t| id_of(t) == id) {
        Some(t) => Json(t.clone()).into_response(),
        None => not_found("Task"),
    }
}

async fn update_task(
    State(state): State<Arc<Backend>>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Response {
    let updated = {
        let mut db = state.db.lock().unwrap();
        let Some(task) = db.tasks.iter_mut().find(|t| id_of(t) == id) else {
            return not_found("Task");
        };
        if let (Some(doc), Some(fields)) = (task.as_object_mut(), patch.as_object()) {
            for (k, v) in fields {
                doc.insert(k.clone(), v.clone());
            }
        }
        task.clone()
    };
    state.push("task:updated", updated.clone());
    Json(updated).into_response()
}

async fn delete_task(State(state): State<Arc<Backend>>, Path(id): Path<String>) -> Response {
    let removed = {
        let mut db = state.db.lock().unwrap();
        let before = db.tasks.len();
        db.tasks.retain(|t| id_of(t) != id);
        before != db.tasks.len()
    };
    if !removed {
        return not_found("Task");
    }
    state.push("task:deleted", json!({ "_id": id }));
    Json(json!({ "message": "Task deleted" })).into_response()
}

// ── Admin actions ────────────────────────────────────────────────────

async fn pending_actions(
    State(state): State<Arc<Backend>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let db = state.db.lock().unwrap();
    let org = query.get("orgId").cloned().unwrap_or_default();
    let actions = db
        .actions
        .iter()
        .filter(|a| a["orgId"].as_str() == Some(org.as_str()) && a["status"] == "PENDING")
        .cloned()
        .collect();
    Json(actions)
}

async fn reject_action(State(state): State<Arc<Backend>>, Path(id): Path<String>) -> Response {
    let org = {
        let mut db = state.db.lock().unwrap();
        let Some(action) = db.actions.iter_mut().find(|a| id_of(a) == id) else {
            return not_found("Request");
        };
        action["status"] = json!("REJECTED");
        action["orgId"].clone()
    };
    state.push("admin-action:resolved", json!({ "_id": id, "orgId": org }));
    Json(json!({ "message": "Request rejected" })).into_response()
}

// ── Storage ──────────────────────────────────────────────────────────

async fn upload_object(
    State(state): State<Arc<Backend>>,
    Path((bucket, name)): Path<(String, String)>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    if header("apikey").is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Missing apikey" })),
        )
            .into_response();
    }
    state.db.lock().unwrap().uploads.push(Upload {
        path: format!("{}/{}", bucket, name),
        apikey: header("apikey"),
        content_type: header("content-type"),
        upsert: header("x-upsert"),
        cache_control: header("cache-control"),
        size: body.len(),
    });
    Json(json!({ "Key": format!("{}/{}", bucket, name) })).into_response()
}

// ── Socket.IO ────────────────────────────────────────────────────────

async fn socket_io(ws: WebSocketUpgrade, State(state): State<Arc<Backend>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn session(socket: WebSocket, state: Arc<Backend>) {
    let (mut sender, mut receiver) = socket.split();
    let mut pushes = state.push.subscribe();

    let open = EnginePacket::Open(OpenInfo {
        sid: state.id("eio"),
        upgrades: Vec::new(),
        ping_interval: 25_000,
        ping_timeout: 20_000,
        max_payload: None,
    });
    if sender.send(Message::Text(open.encode().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = pushes.recv() => match frame {
                Ok(frame) => {
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_frame(&state, text.as_str()) {
                        if sender.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn handle_frame(state: &Backend, frame: &str) -> Option<String> {
    let EnginePacket::Message(body) = EnginePacket::decode(frame).ok()? else {
        return None;
    };
    match SocketPacket::decode(&body).ok()? {
        SocketPacket::Connect { .. } => {
            let connected = SocketPacket::Connect {
                namespace: wire::DEFAULT_NAMESPACE.to_string(),
                data: Some(json!({ "sid": state.id("sock") })),
            };
            Some(EnginePacket::Message(connected.encode()).encode())
        }
        SocketPacket::Event { name, args, .. } => {
            let payload = args.into_iter().next().unwrap_or(Value::Null);
            state.client_events.lock().unwrap().push((name, payload));
            None
        }
        _ => None,
    }
}
