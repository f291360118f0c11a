//! A live-synced, id-keyed collection.
//!
//! One `LiveCollection` backs one view. It is configured with a snapshot
//! source (REST), a [`SyncSpec`] mapping event names to [`Mutation`]s, the
//! rooms a scope needs and the local signals that force a re-fetch.
//!
//! Mounting a scope:
//! 1. tears down the previous mount (handlers, then rooms, then signals)
//! 2. registers one handler per configured event
//! 3. leases the scope's rooms and subscribes to its signals
//! 4. fetches the snapshot
//!
//! Handlers are registered before the fetch so no event is missed while it
//! is in flight. Events that arrive during a fetch are applied immediately
//! and journaled; when the snapshot lands it replaces the cache and the
//! journal is replayed on top. The primitives are idempotent, so the result
//! is the same whichever side saw a change first.
//!
//! Every handler and fetch is tagged with the mount generation it belongs to.
//! After `unmount()` or a scope change, late events and late snapshots from
//! the old generation are dropped.

use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::mount::MountGuards;
use super::reconcile::{
    Entity, Mutation, decode, extract_id, insert_if_absent, remove_by_id, replace_by_id,
};
use super::signals::{Signal, SignalBus};
use crate::live::{ConnectionManager, Room};
use crate::util::{lock, spawn_on_current};

/// Values a view can be scoped by (a project id, an org id, `()` ...).
pub trait Scope: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<S: Clone + PartialEq + Debug + Send + Sync + 'static> Scope for S {}

/// Where the authoritative snapshot for a scope comes from.
#[async_trait]
pub trait SnapshotSource<T, S>: Send + Sync {
    async fn fetch(&self, scope: &S) -> anyhow::Result<Vec<T>>;
}

#[async_trait]
impl<T, S, F, Fut> SnapshotSource<T, S> for F
where
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send,
    S: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    async fn fetch(&self, scope: &S) -> anyhow::Result<Vec<T>> {
        (self)(scope.clone()).await
    }
}

/// Load state of a mounted view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Unmounted,
    Loading,
    Ready,
    /// The first snapshot failed. Events still apply to the (partial) cache.
    Failed(String),
}

pub(crate) type RoomsFn<S> = Arc<dyn Fn(&S) -> Vec<Room> + Send + Sync>;
type AcceptFn<T, S> = Arc<dyn Fn(&S, &T) -> bool + Send + Sync>;
type OrderFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Event, room and signal wiring for a [`LiveCollection`].
pub struct SyncSpec<T, S> {
    events: Vec<(String, Mutation)>,
    rooms: RoomsFn<S>,
    signals: Vec<Signal>,
    accepts: Option<AcceptFn<T, S>>,
    order: Option<OrderFn<T>>,
}

impl<T: 'static, S: 'static> Default for SyncSpec<T, S> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            rooms: Arc::new(|_: &S| Vec::new()),
            signals: Vec::new(),
            accepts: None,
            order: None,
        }
    }
}

impl<T: 'static, S: 'static> SyncSpec<T, S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `mutation` whenever `event` arrives.
    pub fn on(mut self, event: &str, mutation: Mutation) -> Self {
        self.events.push((event.to_string(), mutation));
        self
    }

    /// Rooms to hold while mounted on a scope.
    pub fn rooms<F>(mut self, rooms: F) -> Self
    where
        F: Fn(&S) -> Vec<Room> + Send + Sync + 'static,
    {
        self.rooms = Arc::new(rooms);
        self
    }

    /// Re-fetch the snapshot whenever `signal` is published.
    pub fn refresh_on(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }

    /// Scope membership test for pushed entities.
    ///
    /// An inserted entity that fails the test is ignored; a replaced one is
    /// removed, since it has left the scope.
    pub fn accept<F>(mut self, accepts: F) -> Self
    where
        F: Fn(&S, &T) -> bool + Send + Sync + 'static,
    {
        self.accepts = Some(Arc::new(accepts));
        self
    }

    /// Keep the cache sorted. Without it, snapshot order is kept and inserts
    /// append.
    pub fn sort_by<F>(mut self, order: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.order = Some(Arc::new(order));
        self
    }

    pub fn events(&self) -> &[(String, Mutation)] {
        &self.events
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn rooms_for(&self, scope: &S) -> Vec<Room> {
        (self.rooms)(scope)
    }

    fn admits(&self, scope: Option<&S>, entity: &T) -> bool {
        match (&self.accepts, scope) {
            (Some(accepts), Some(scope)) => accepts(scope, entity),
            _ => true,
        }
    }

    fn apply(&self, scope: Option<&S>, items: &mut Vec<T>, op: Op<T>) -> bool
    where
        T: Entity,
    {
        match op {
            Op::Insert(entity) => {
                if !self.admits(scope, &entity) {
                    return false;
                }
                insert_if_absent(items, entity)
            }
            Op::Replace(entity) => {
                if self.admits(scope, &entity) {
                    replace_by_id(items, entity)
                } else {
                    remove_by_id(items, entity.id())
                }
            }
            Op::Remove(id) => remove_by_id(items, &id),
        }
    }

    fn sort(&self, items: &mut [T]) {
        if let Some(order) = &self.order {
            items.sort_by(|a, b| order(a, b));
        }
    }
}

#[derive(Clone)]
enum Op<T> {
    Insert(T),
    Replace(T),
    Remove(String),
}

struct State<T, S> {
    scope: Option<S>,
    generation: u64,
    ticket: u64,
    fetching: bool,
    phase: Phase,
    items: Vec<T>,
    journal: Vec<Op<T>>,
    guards: Option<MountGuards>,
}

struct Shared<T, S> {
    name: String,
    connections: Arc<ConnectionManager>,
    signals: SignalBus,
    source: Arc<dyn SnapshotSource<T, S>>,
    spec: SyncSpec<T, S>,
    state: Mutex<State<T, S>>,
    version: watch::Sender<u64>,
}

/// Live-synced collection of `T`, scoped by `S`. Cheap to clone.
pub struct LiveCollection<T, S> {
    shared: Arc<Shared<T, S>>,
}

impl<T, S> Clone for LiveCollection<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, S: Debug> Debug for LiveCollection<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("LiveCollection")
            .field("name", &self.shared.name)
            .field("scope", &state.scope)
            .field("phase", &state.phase)
            .field("len", &state.items.len())
            .finish()
    }
}

impl<T: Entity, S: Scope> LiveCollection<T, S> {
    pub fn new(
        name: &str,
        connections: Arc<ConnectionManager>,
        signals: SignalBus,
        source: impl SnapshotSource<T, S> + 'static,
        spec: SyncSpec<T, S>,
    ) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                connections,
                signals,
                source: Arc::new(source),
                spec,
                state: Mutex::new(State {
                    scope: None,
                    generation: 0,
                    ticket: 0,
                    fetching: false,
                    phase: Phase::Unmounted,
                    items: Vec::new(),
                    journal: Vec::new(),
                    guards: None,
                }),
                version,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Mount on `scope` and wait for its snapshot (or its failure).
    ///
    /// Replaces any previous mount. A snapshot that resolves after a newer
    /// mount or an unmount is discarded.
    pub async fn mount(&self, scope: S) {
        let (generation, ticket, previous) = {
            let mut state = lock(&self.shared.state);
            state.generation += 1;
            state.ticket += 1;
            state.fetching = true;
            state.scope = Some(scope.clone());
            state.phase = Phase::Loading;
            state.items.clear();
            state.journal.clear();
            (state.generation, state.ticket, state.guards.take())
        };
        drop(previous);
        self.bump();

        let guards = self.subscribe(&scope, generation);
        let superseded = {
            let mut state = lock(&self.shared.state);
            if state.generation == generation {
                state.guards = Some(guards);
                None
            } else {
                Some(guards)
            }
        };
        if superseded.is_some() {
            debug!(collection = %self.shared.name, "mount superseded before subscribing");
            return;
        }

        debug!(collection = %self.shared.name, scope = ?scope, generation, "mounted");
        self.load(generation, ticket, scope).await;
    }

    /// Mount on `scope` unless already mounted on it.
    pub async fn set_scope(&self, scope: S) {
        let unchanged = {
            let state = lock(&self.shared.state);
            state.phase != Phase::Unmounted && state.scope.as_ref() == Some(&scope)
        };
        if !unchanged {
            self.mount(scope).await;
        }
    }

    /// Drop every handler, room and signal listener, then clear the cache.
    pub fn unmount(&self) {
        let guards = {
            let mut state = lock(&self.shared.state);
            state.generation += 1;
            state.fetching = false;
            state.scope = None;
            state.phase = Phase::Unmounted;
            state.items.clear();
            state.journal.clear();
            state.guards.take()
        };
        drop(guards);
        self.bump();
        debug!(collection = %self.shared.name, "unmounted");
    }

    /// Re-fetch the snapshot for the current scope and wait for it.
    pub async fn refresh(&self) {
        if let Some((generation, ticket, scope)) = self.begin_fetch(None) {
            self.load(generation, ticket, scope).await;
        }
    }

    /// Resolve once the current fetch has finished (or immediately if none).
    pub async fn loaded(&self) {
        let mut rx = self.shared.version.subscribe();
        loop {
            if !lock(&self.shared.state).fetching {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn items(&self) -> Vec<T> {
        lock(&self.shared.state).items.clone()
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.shared.state)
            .items
            .iter()
            .map(|item| item.id().to_string())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        lock(&self.shared.state)
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared.state).phase.clone()
    }

    pub fn scope(&self) -> Option<S> {
        lock(&self.shared.state).scope.clone()
    }

    /// Whether the current mount has handlers on the manager's current
    /// connection. A mount made before a sign-out stays bound to the old
    /// connection and needs a remount to go live again.
    pub fn is_live(&self) -> bool {
        let Some(conn) = self.shared.connections.connection() else {
            return false;
        };
        lock(&self.shared.state)
            .guards
            .as_ref()
            .is_some_and(|g| g.is_live_on(&conn))
    }

    /// Ticks on every observable change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    // ── Local writes ─────────────────────────────────────────────────

    /// Apply a locally known creation (e.g. a REST result). Same rules as a
    /// pushed insert, so a later echo of the same entity is a no-op.
    pub fn insert(&self, entity: T) -> bool {
        self.apply_local(Op::Insert(entity))
    }

    pub fn replace(&self, entity: T) -> bool {
        self.apply_local(Op::Replace(entity))
    }

    pub fn remove(&self, id: &str) -> bool {
        self.apply_local(Op::Remove(id.to_string()))
    }

    // ── Internals ────────────────────────────────────────────────────

    fn bump(&self) {
        self.shared.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn subscribe(&self, scope: &S, generation: u64) -> MountGuards {
        let spec = &self.shared.spec;
        let mut guards = MountGuards::new();

        match self.shared.connections.connection() {
            Some(conn) => {
                for (event, mutation) in &spec.events {
                    let weak = Arc::downgrade(&self.shared);
                    let name = event.clone();
                    let mutation = *mutation;
                    guards.push_subscription(conn.subscribe(event, move |payload: &Value| {
                        if let Some(shared) = weak.upgrade() {
                            LiveCollection { shared }.on_event(generation, &name, mutation, payload);
                        }
                    }));
                }
                for room in spec.rooms_for(scope) {
                    guards.push_room(conn.lease_room(room));
                }
            }
            None => {
                debug!(collection = %self.shared.name, "no live connection; snapshot only");
            }
        }

        for signal in &spec.signals {
            let weak = Arc::downgrade(&self.shared);
            guards.push_signal(self.shared.signals.subscribe(*signal, move || {
                if let Some(shared) = weak.upgrade() {
                    LiveCollection { shared }.spawn_refresh(generation);
                }
            }));
        }

        guards
    }

    fn on_event(&self, generation: u64, event: &str, mutation: Mutation, payload: &Value) {
        let op = match mutation {
            Mutation::Insert | Mutation::Replace => match decode::<T>(event, payload) {
                Ok(entity) if mutation == Mutation::Insert => Op::Insert(entity),
                Ok(entity) => Op::Replace(entity),
                Err(e) => {
                    warn!(collection = %self.shared.name, error = %e, "dropping event");
                    return;
                }
            },
            Mutation::Remove => match extract_id(payload) {
                Some(id) => Op::Remove(id),
                None => {
                    warn!(
                        collection = %self.shared.name,
                        event,
                        "dropping event: payload carries no id"
                    );
                    return;
                }
            },
            Mutation::Refresh => {
                self.spawn_refresh(generation);
                return;
            }
        };

        let changed = {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            if state.generation != generation || state.phase == Phase::Unmounted {
                return;
            }
            self.apply_op(state, op)
        };
        if changed {
            debug!(collection = %self.shared.name, event, mutation = mutation.as_str(), "applied event");
            self.bump();
        }
    }

    fn apply_local(&self, op: Op<T>) -> bool {
        let changed = {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            if state.phase == Phase::Unmounted {
                return false;
            }
            self.apply_op(state, op)
        };
        if changed {
            self.bump();
        }
        changed
    }

    fn apply_op(&self, state: &mut State<T, S>, op: Op<T>) -> bool {
        let spec = &self.shared.spec;
        if state.fetching {
            state.journal.push(op.clone());
        }
        let changed = spec.apply(state.scope.as_ref(), &mut state.items, op);
        if changed {
            spec.sort(&mut state.items);
        }
        changed
    }

    fn begin_fetch(&self, generation: Option<u64>) -> Option<(u64, u64, S)> {
        let mut state = lock(&self.shared.state);
        if generation.is_some_and(|g| g != state.generation) {
            return None;
        }
        let scope = state.scope.clone()?;
        state.ticket += 1;
        state.fetching = true;
        Some((state.generation, state.ticket, scope))
    }

    fn spawn_refresh(&self, generation: u64) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(collection = %self.shared.name, "cannot refresh outside a tokio runtime");
            return;
        }
        let Some((generation, ticket, scope)) = self.begin_fetch(Some(generation)) else {
            return;
        };
        let this = self.clone();
        spawn_on_current(async move {
            this.load(generation, ticket, scope).await;
        });
    }

    async fn load(&self, generation: u64, ticket: u64, scope: S) {
        let result = self.shared.source.fetch(&scope).await;

        {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            if state.generation != generation || state.ticket != ticket {
                debug!(collection = %self.shared.name, scope = ?scope, "discarding stale snapshot");
                return;
            }
            state.fetching = false;
            let journal = std::mem::take(&mut state.journal);

            match result {
                Ok(snapshot) => {
                    let spec = &self.shared.spec;
                    let mut items = Vec::with_capacity(snapshot.len());
                    for entity in snapshot {
                        insert_if_absent(&mut items, entity);
                    }
                    for op in journal {
                        spec.apply(state.scope.as_ref(), &mut items, op);
                    }
                    spec.sort(&mut items);
                    debug!(collection = %self.shared.name, count = items.len(), "snapshot applied");
                    state.items = items;
                    state.phase = Phase::Ready;
                }
                Err(e) => {
                    warn!(
                        collection = %self.shared.name,
                        scope = ?scope,
                        error = %e,
                        "snapshot fetch failed; keeping current data"
                    );
                    if state.phase == Phase::Loading {
                        state.phase = Phase::Failed(e.to_string());
                    }
                }
            }
        }
        self.bump();
    }
}
