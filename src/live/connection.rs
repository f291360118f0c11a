//! The shared live connection and the manager that owns it.
//!
//! [`ConnectionManager`] holds at most one [`Connection`] per session. The
//! connection handle is created synchronously by `connect()` and a background
//! driver task establishes the link, announces the user with `setup`, re-joins
//! every held room and then pumps events into the handler registry until the
//! link drops, at which point it reconnects with a bounded retry budget.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──handshake──▶ Connected
//!      ▲                        │   ▲                      │
//!      │   budget exhausted     │   └──── link lost ───────┘
//!      └────────────────────────┘
//!      ▲
//!      └──── disconnect() / server disconnect (from any state)
//! ```
//!
//! Nothing here returns an error to the caller: failures are logged and the
//! handle simply stays out of `Connected` (degraded, snapshot-only mode).

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events;
use super::rooms::{Room, RoomTable};
use super::transport::{Link, Transport};
use super::wire::{self, EnginePacket, OpenInfo, SocketPacket};
use crate::errors::SyncError;
use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        write!(f, "{}", s)
    }
}

/// Retry and timeout policy for the connection driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Retries after the first failed attempt before giving up.
    pub reconnection_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    /// Bound on opening the transport plus the whole handshake.
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnection_attempts: 5,
            reconnect_delay: Duration::from_millis(1_000),
            reconnect_delay_max: Duration::from_millis(5_000),
            connect_timeout: Duration::from_millis(20_000),
        }
    }
}

impl ConnectionOptions {
    /// Delay before the next attempt after `failures` consecutive failures.
    /// Doubles from `reconnect_delay` and is capped at `reconnect_delay_max`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.reconnect_delay
            .saturating_mul(1u32 << shift)
            .min(self.reconnect_delay_max)
    }
}

/// Identifies one registered handler on a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;
type AnyHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    events: HashMap<String, Vec<(HandlerId, EventHandler)>>,
    any: Vec<(HandlerId, AnyHandler)>,
}

impl Registry {
    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }
}

struct DriverSlot {
    epoch: u64,
    cancel: CancellationToken,
    running: bool,
}

/// Handle to the shared live connection.
///
/// Any part of the application may emit on it or register handlers; only the
/// [`ConnectionManager`] starts or stops its driver.
pub struct Connection {
    user_id: Mutex<String>,
    state: watch::Sender<ConnectionState>,
    sid: Mutex<Option<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    handlers: Mutex<Registry>,
    rooms: Mutex<RoomTable>,
    driver: Mutex<DriverSlot>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("user_id", &*lock(&self.user_id))
            .field("state", &self.state())
            .field("sid", &*lock(&self.sid))
            .finish_non_exhaustive()
    }
}

impl Connection {
    fn new(user_id: &str) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            user_id: Mutex::new(user_id.to_string()),
            state,
            sid: Mutex::new(None),
            outbound: Mutex::new(None),
            handlers: Mutex::new(Registry::default()),
            rooms: Mutex::new(RoomTable::default()),
            driver: Mutex::new(DriverSlot {
                epoch: 0,
                cancel: CancellationToken::new(),
                running: false,
            }),
        }
    }

    pub fn user_id(&self) -> String {
        lock(&self.user_id).clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Socket id assigned by the server for the current session.
    pub fn sid(&self) -> Option<String> {
        lock(&self.sid).clone()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Resolve once the connection reaches `want`.
    pub async fn wait_for_state(&self, want: ConnectionState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == want).await;
    }

    // ── Emitting ─────────────────────────────────────────────────────

    /// Emit an event to the server. Fire-and-forget: returns `false` when
    /// there is no live link and the event was dropped.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(wire::event_frame(event, payload)).is_ok(),
            None => {
                debug!(event, "no live link; dropping emit");
                false
            }
        }
    }

    fn announce(&self, user_id: &str) {
        let changed = {
            let mut current = lock(&self.user_id);
            if *current == user_id {
                false
            } else {
                *current = user_id.to_string();
                true
            }
        };
        if changed {
            info!(user_id, "live identity changed");
            self.emit(events::SETUP, json!({ "userId": user_id }));
        }
    }

    // ── Rooms ────────────────────────────────────────────────────────

    /// Hold `room`. The join is emitted only for the first holder; if the
    /// link is down it is sent on the next (re)connect.
    pub fn join_room(&self, room: &Room) {
        let mut rooms = lock(&self.rooms);
        if rooms.acquire(room) {
            debug!(room = %room, "joining room");
            self.emit(&room.join_event(), Value::String(room.name()));
        }
    }

    /// Release `room`. The leave is emitted only when the last holder goes.
    pub fn leave_room(&self, room: &Room) {
        let mut rooms = lock(&self.rooms);
        if rooms.release(room) {
            debug!(room = %room, "leaving room");
            self.emit(&room.leave_event(), Value::String(room.name()));
        }
    }

    /// Join `room` for as long as the returned lease is alive.
    pub fn lease_room(self: &Arc<Self>, room: Room) -> RoomLease {
        self.join_room(&room);
        RoomLease {
            conn: Arc::downgrade(self),
            room,
        }
    }

    pub fn joined_rooms(&self) -> Vec<Room> {
        lock(&self.rooms).held()
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// Register a handler for `event`. Prefer [`Connection::subscribe`],
    /// which unregisters on drop.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.handlers);
        let id = registry.next_id();
        registry
            .events
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister a handler. Returns `false` if it was not registered.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut registry = lock(&self.handlers);
        let Some(handlers) = registry.events.get_mut(event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            registry.events.remove(event);
        }
        removed
    }

    pub fn subscribe<F>(self: &Arc<Self>, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.on(event, handler);
        Subscription {
            conn: Arc::downgrade(self),
            event: Some(event.to_string()),
            id,
        }
    }

    /// Observe every inbound event regardless of name.
    pub fn on_any<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.handlers);
            let id = registry.next_id();
            registry.any.push((id, Arc::new(handler)));
            id
        };
        Subscription {
            conn: Arc::downgrade(self),
            event: None,
            id,
        }
    }

    fn off_any(&self, id: HandlerId) -> bool {
        let mut registry = lock(&self.handlers);
        let before = registry.any.len();
        registry.any.retain(|(hid, _)| *hid != id);
        registry.any.len() != before
    }

    /// Handlers currently registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        lock(&self.handlers)
            .events
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver an event to the local handlers, as if the server pushed it.
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe. A panicking handler is logged and skipped; the others
    /// still run. Returns the number of named handlers invoked.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let (named, any): (Vec<EventHandler>, Vec<AnyHandler>) = {
            let registry = lock(&self.handlers);
            (
                registry
                    .events
                    .get(event)
                    .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default(),
                registry.any.iter().map(|(_, h)| h.clone()).collect(),
            )
        };

        for handler in &any {
            guarded(event, || handler(event, payload));
        }
        for handler in &named {
            guarded(event, || handler(payload));
        }
        named.len()
    }

    // ── Driver plumbing ──────────────────────────────────────────────

    fn begin_driver(&self) -> (u64, CancellationToken) {
        let mut slot = lock(&self.driver);
        slot.cancel.cancel();
        slot.epoch += 1;
        slot.cancel = CancellationToken::new();
        slot.running = true;
        self.state.send_replace(ConnectionState::Connecting);
        (slot.epoch, slot.cancel.clone())
    }

    fn driver_running(&self) -> bool {
        lock(&self.driver).running
    }

    fn finish_driver(&self, epoch: u64) {
        let mut slot = lock(&self.driver);
        if slot.epoch == epoch {
            slot.running = false;
        }
    }

    /// Update state on behalf of driver `epoch`; ignored once superseded.
    fn set_driver_state(&self, epoch: u64, state: ConnectionState) {
        let slot = lock(&self.driver);
        if slot.epoch == epoch && !slot.cancel.is_cancelled() {
            self.state.send_replace(state);
        }
    }

    /// Install a freshly handshaken link: announce identity, re-join every
    /// held room, then publish `Connected`.
    fn attach_link(&self, epoch: u64, tx: mpsc::UnboundedSender<String>, sid: &str) -> bool {
        let slot = lock(&self.driver);
        if slot.epoch != epoch || slot.cancel.is_cancelled() {
            return false;
        }

        let rooms = lock(&self.rooms);
        let user_id = lock(&self.user_id).clone();
        let _ = tx.send(wire::event_frame(events::SETUP, json!({ "userId": user_id })));
        for room in rooms.held() {
            let _ = tx.send(wire::event_frame(
                &room.join_event(),
                Value::String(room.name()),
            ));
        }
        *lock(&self.sid) = Some(sid.to_string());
        *lock(&self.outbound) = Some(tx);
        drop(rooms);

        self.state.send_replace(ConnectionState::Connected);
        true
    }

    fn detach_link(&self) {
        *lock(&self.outbound) = None;
        *lock(&self.sid) = None;
    }

    fn shutdown(&self) {
        {
            let mut slot = lock(&self.driver);
            slot.cancel.cancel();
            slot.running = false;
        }
        self.detach_link();
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

fn guarded(event: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(event, "event handler panicked; skipping it for this event");
    }
}

/// Unregisters its handler when dropped.
#[derive(Debug)]
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    conn: Weak<Connection>,
    event: Option<String>,
    id: HandlerId,
}

impl Subscription {
    /// Event name, or `None` for a catch-all subscription.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Whether this handler is registered on `conn`.
    pub fn is_on(&self, conn: &Arc<Connection>) -> bool {
        std::ptr::eq(self.conn.as_ptr(), Arc::as_ptr(conn))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(conn) = self.conn.upgrade() else {
            return;
        };
        match &self.event {
            Some(event) => conn.off(event, self.id),
            None => conn.off_any(self.id),
        };
    }
}

/// Holds a room joined until dropped.
#[derive(Debug)]
#[must_use = "dropping a RoomLease leaves the room"]
pub struct RoomLease {
    conn: Weak<Connection>,
    room: Room,
}

impl RoomLease {
    pub fn room(&self) -> &Room {
        &self.room
    }
}

impl Drop for RoomLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.upgrade() {
            conn.leave_room(&self.room);
        }
    }
}

// ── Manager ──────────────────────────────────────────────────────────

/// Owns the single live connection for the session.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    current: Mutex<Option<Arc<Connection>>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.transport.target())
            .field("connected", &lock(&self.current).is_some())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, options: ConnectionOptions) -> Self {
        Self {
            transport,
            options,
            current: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Connect as `user_id`, or return the existing handle.
    ///
    /// Never blocks: the handshake runs on a background task. Calling again
    /// returns the same `Arc`; a changed user id is re-announced, and a driver
    /// that gave up after its retry budget is restarted.
    ///
    /// Must be called from within a tokio runtime. Outside one the handle is
    /// returned in `Disconnected` and the failure is logged.
    pub fn connect(&self, user_id: &str) -> Arc<Connection> {
        let mut current = lock(&self.current);
        if let Some(conn) = current.as_ref() {
            conn.announce(user_id);
            if !conn.driver_running() {
                self.start_driver(conn);
            }
            return conn.clone();
        }

        info!(user_id, target_url = %self.transport.target(), "opening live connection");
        let conn = Arc::new(Connection::new(user_id));
        self.start_driver(&conn);
        *current = Some(conn.clone());
        conn
    }

    /// The current handle, if any. `None` is a normal state.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        lock(&self.current).clone()
    }

    /// Tear down the live connection and clear the handle. No-op when
    /// already disconnected.
    pub fn disconnect(&self) {
        let taken = lock(&self.current).take();
        if let Some(conn) = taken {
            conn.shutdown();
            info!(user_id = %conn.user_id(), "live connection closed");
        }
    }

    fn start_driver(&self, conn: &Arc<Connection>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "cannot start live connection outside a tokio runtime");
                return;
            }
        };
        let (epoch, cancel) = conn.begin_driver();
        runtime.spawn(drive(
            conn.clone(),
            self.transport.clone(),
            self.options.clone(),
            cancel,
            epoch,
        ));
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ── Driver ───────────────────────────────────────────────────────────

struct Session {
    link: Link,
    info: OpenInfo,
    sid: String,
}

enum SessionEnd {
    Cancelled,
    ServerDisconnect,
    Lost(String),
}

async fn drive(
    conn: Arc<Connection>,
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    cancel: CancellationToken,
    epoch: u64,
) {
    let url = transport.target();

    'session: loop {
        let mut failures = 0u32;
        let Session {
            mut link,
            info,
            sid,
        } = loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => break 'session,
                result = establish(transport.as_ref(), options.connect_timeout) => result,
            };
            match attempt {
                Ok(session) => break session,
                Err(e) => {
                    failures += 1;
                    if failures > options.reconnection_attempts {
                        warn!(
                            url = %url,
                            attempts = failures,
                            error = %e,
                            "giving up on live connection; continuing without real-time updates"
                        );
                        conn.set_driver_state(epoch, ConnectionState::Disconnected);
                        break 'session;
                    }
                    let delay = options.backoff(failures);
                    warn!(
                        url = %url,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "live connection attempt failed; retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break 'session,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        if !conn.attach_link(epoch, link.outbound.clone(), &sid) {
            break;
        }
        info!(sid = %sid, rooms = conn.joined_rooms().len(), "live connection established");

        let end = run_session(&conn, &mut link, &info, &cancel).await;
        match end {
            SessionEnd::Cancelled => break,
            SessionEnd::ServerDisconnect => {
                info!(sid = %sid, "server closed the socket; not reconnecting");
                conn.detach_link();
                conn.set_driver_state(epoch, ConnectionState::Disconnected);
                break;
            }
            SessionEnd::Lost(reason) => {
                warn!(sid = %sid, reason = %reason, "live connection lost; reconnecting");
                conn.detach_link();
                conn.set_driver_state(epoch, ConnectionState::Connecting);
            }
        }
    }

    conn.finish_driver(epoch);
}

async fn establish(transport: &dyn Transport, timeout: Duration) -> Result<Session, SyncError> {
    let attempt = async {
        let mut link = transport.open().await?;
        let (info, sid) = handshake(&mut link).await?;
        Ok::<_, SyncError>(Session { link, info, sid })
    };
    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| SyncError::HandshakeTimeout {
            url: transport.target(),
            timeout_ms: timeout.as_millis() as u64,
        })?
}

/// Engine.IO open, then Socket.IO connect on the default namespace.
async fn handshake(link: &mut Link) -> Result<(OpenInfo, String), SyncError> {
    let info = loop {
        let frame = link
            .inbound
            .recv()
            .await
            .ok_or(SyncError::ClosedDuringHandshake)?;
        match EnginePacket::decode(&frame)? {
            EnginePacket::Open(info) => break info,
            other => debug!(packet = ?other, "ignoring packet before open"),
        }
    };

    link.outbound
        .send(wire::connect_frame())
        .map_err(|_| SyncError::ClosedDuringHandshake)?;

    loop {
        let frame = link
            .inbound
            .recv()
            .await
            .ok_or(SyncError::ClosedDuringHandshake)?;
        match EnginePacket::decode(&frame)? {
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                packet if !packet.is_default_namespace() => {
                    debug!(namespace = packet.namespace(), "ignoring packet for another namespace");
                }
                SocketPacket::Connect { data, .. } => {
                    let sid = data
                        .as_ref()
                        .and_then(|d| d.get("sid"))
                        .and_then(Value::as_str)
                        .unwrap_or(&info.sid)
                        .to_string();
                    return Ok((info, sid));
                }
                SocketPacket::ConnectError { data, .. } => {
                    let message = data
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| data.to_string());
                    return Err(SyncError::ConnectRejected(message));
                }
                other => debug!(packet = ?other, "ignoring packet before connect"),
            },
            EnginePacket::Ping(data) => {
                let _ = link.outbound.send(EnginePacket::Pong(data).encode());
            }
            EnginePacket::Close => return Err(SyncError::ClosedDuringHandshake),
            _ => {}
        }
    }
}

async fn run_session(
    conn: &Connection,
    link: &mut Link,
    info: &OpenInfo,
    cancel: &CancellationToken,
) -> SessionEnd {
    // Any inbound frame proves the link is alive.
    let liveness = Duration::from_millis(info.ping_interval.saturating_add(info.ping_timeout));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            next = tokio::time::timeout(liveness, link.inbound.recv()) => next,
        };
        let frame = match next {
            Err(_) => {
                return SessionEnd::Lost(format!("no frame within {}ms", liveness.as_millis()));
            }
            Ok(None) => return SessionEnd::Lost("transport closed".to_string()),
            Ok(Some(frame)) => frame,
        };

        let packet = match EnginePacket::decode(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                continue;
            }
        };

        match packet {
            EnginePacket::Ping(data) => {
                if link.outbound.send(EnginePacket::Pong(data).encode()).is_err() {
                    return SessionEnd::Lost("transport closed".to_string());
                }
            }
            EnginePacket::Close => {
                return SessionEnd::Lost("server closed the transport".to_string());
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                Ok(packet) if !packet.is_default_namespace() => {
                    debug!(namespace = packet.namespace(), "ignoring packet for another namespace");
                }
                Ok(SocketPacket::Event { name, args, .. }) => {
                    let payload = args.into_iter().next().unwrap_or(Value::Null);
                    let handled = conn.dispatch(&name, &payload);
                    debug!(event = %name, handlers = handled, "dispatched event");
                }
                Ok(SocketPacket::Disconnect { .. }) => return SessionEnd::ServerDisconnect,
                Ok(SocketPacket::ConnectError { data, .. }) => {
                    warn!(data = %data, "server reported a socket error");
                }
                Ok(other) => debug!(packet = ?other, "ignoring socket packet"),
                Err(e) => warn!(error = %e, "dropping malformed socket packet"),
            },
            EnginePacket::Pong(_)
            | EnginePacket::Open(_)
            | EnginePacket::Upgrade
            | EnginePacket::Noop => {}
        }
    }
}
