//! Derived counters (badges, dashboard totals) kept live without holding the
//! underlying collection.
//!
//! Events either nudge the value (`Increment` / `Decrement`) or force a full
//! recount (`Recompute`). A nudge that arrives while the count is being
//! fetched is not applied, since the fetched value may or may not include it.
//! Instead the counter is marked dirty and fetched again once the in-flight
//! count lands.

use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::collection::{Phase, RoomsFn, Scope};
use super::mount::MountGuards;
use super::signals::{Signal, SignalBus};
use crate::live::{ConnectionManager, Room};
use crate::util::{lock, spawn_on_current};

#[async_trait]
pub trait CountSource<S>: Send + Sync {
    async fn count(&self, scope: &S) -> anyhow::Result<u64>;
}

#[async_trait]
impl<S, F, Fut> CountSource<S> for F
where
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<u64>> + Send,
    S: Clone + Send + Sync + 'static,
{
    async fn count(&self, scope: &S) -> anyhow::Result<u64> {
        (self)(scope.clone()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    Increment,
    Decrement,
    Recompute,
}

type FilterFn<S> = Arc<dyn Fn(&S, &Value) -> bool + Send + Sync>;

/// Event, room and signal wiring for a [`LiveCounter`].
pub struct CounterSpec<S> {
    events: Vec<(String, CounterOp)>,
    rooms: RoomsFn<S>,
    signals: Vec<Signal>,
    filter: Option<FilterFn<S>>,
}

impl<S: 'static> Default for CounterSpec<S> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            rooms: Arc::new(|_: &S| Vec::new()),
            signals: Vec::new(),
            filter: None,
        }
    }
}

impl<S: 'static> CounterSpec<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, event: &str, op: CounterOp) -> Self {
        self.events.push((event.to_string(), op));
        self
    }

    pub fn rooms<F>(mut self, rooms: F) -> Self
    where
        F: Fn(&S) -> Vec<Room> + Send + Sync + 'static,
    {
        self.rooms = Arc::new(rooms);
        self
    }

    pub fn refresh_on(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }

    /// Only nudge for payloads that pass `filter`. Recomputes are never
    /// filtered.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&S, &Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn events(&self) -> &[(String, CounterOp)] {
        &self.events
    }

    pub fn rooms_for(&self, scope: &S) -> Vec<Room> {
        (self.rooms)(scope)
    }
}

struct CounterState<S> {
    scope: Option<S>,
    generation: u64,
    ticket: u64,
    fetching: bool,
    /// A nudge was skipped during the current fetch.
    dirty: bool,
    phase: Phase,
    value: u64,
    guards: Option<MountGuards>,
}

struct CounterShared<S> {
    name: String,
    connections: Arc<ConnectionManager>,
    signals: SignalBus,
    source: Arc<dyn CountSource<S>>,
    spec: CounterSpec<S>,
    state: Mutex<CounterState<S>>,
    version: watch::Sender<u64>,
}

/// Live counter scoped by `S`. Cheap to clone.
pub struct LiveCounter<S> {
    shared: Arc<CounterShared<S>>,
}

impl<S> Clone for LiveCounter<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: Scope> LiveCounter<S> {
    pub fn new(
        name: &str,
        connections: Arc<ConnectionManager>,
        signals: SignalBus,
        source: impl CountSource<S> + 'static,
        spec: CounterSpec<S>,
    ) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(CounterShared {
                name: name.to_string(),
                connections,
                signals,
                source: Arc::new(source),
                spec,
                state: Mutex::new(CounterState {
                    scope: None,
                    generation: 0,
                    ticket: 0,
                    fetching: false,
                    dirty: false,
                    phase: Phase::Unmounted,
                    value: 0,
                    guards: None,
                }),
                version,
            }),
        }
    }

    pub fn value(&self) -> u64 {
        lock(&self.shared.state).value
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared.state).phase.clone()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    pub async fn mount(&self, scope: S) {
        let (generation, ticket, previous) = {
            let mut state = lock(&self.shared.state);
            state.generation += 1;
            state.ticket += 1;
            state.fetching = true;
            state.dirty = false;
            state.scope = Some(scope.clone());
            state.phase = Phase::Loading;
            state.value = 0;
            (state.generation, state.ticket, state.guards.take())
        };
        drop(previous);
        self.bump();

        let guards = self.subscribe(&scope, generation);
        {
            let mut state = lock(&self.shared.state);
            if state.generation != generation {
                return;
            }
            state.guards = Some(guards);
        }
        self.load(generation, ticket, scope).await;
    }

    pub fn unmount(&self) {
        let guards = {
            let mut state = lock(&self.shared.state);
            state.generation += 1;
            state.fetching = false;
            state.dirty = false;
            state.scope = None;
            state.phase = Phase::Unmounted;
            state.value = 0;
            state.guards.take()
        };
        drop(guards);
        self.bump();
    }

    pub async fn refresh(&self) {
        if let Some((generation, ticket, scope)) = self.begin_fetch(None) {
            self.load(generation, ticket, scope).await;
        }
    }

    fn bump(&self) {
        self.shared.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn subscribe(&self, scope: &S, generation: u64) -> MountGuards {
        let spec = &self.shared.spec;
        let mut guards = MountGuards::new();

        if let Some(conn) = self.shared.connections.connection() {
            for (event, op) in &spec.events {
                let weak = Arc::downgrade(&self.shared);
                let op = *op;
                guards.push_subscription(conn.subscribe(event, move |payload: &Value| {
                    if let Some(shared) = weak.upgrade() {
                        LiveCounter { shared }.on_event(generation, op, payload);
                    }
                }));
            }
            for room in (spec.rooms)(scope) {
                guards.push_room(conn.lease_room(room));
            }
        }

        for signal in &spec.signals {
            let weak = Arc::downgrade(&self.shared);
            guards.push_signal(self.shared.signals.subscribe(*signal, move || {
                if let Some(shared) = weak.upgrade() {
                    LiveCounter { shared }.spawn_refresh(generation);
                }
            }));
        }
        guards
    }

    fn on_event(&self, generation: u64, op: CounterOp, payload: &Value) {
        if op == CounterOp::Recompute {
            self.spawn_refresh(generation);
            return;
        }

        let changed = {
            let mut state = lock(&self.shared.state);
            if state.generation != generation || state.phase == Phase::Unmounted {
                return;
            }
            if let (Some(filter), Some(scope)) = (&self.shared.spec.filter, state.scope.as_ref()) {
                if !filter(scope, payload) {
                    return;
                }
            }
            if state.fetching {
                debug!(counter = %self.shared.name, "nudge during fetch; recounting afterwards");
                state.dirty = true;
                return;
            }
            let before = state.value;
            state.value = match op {
                CounterOp::Increment => state.value.saturating_add(1),
                _ => state.value.saturating_sub(1),
            };
            state.value != before
        };
        if changed {
            self.bump();
        }
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
            warn!(counter = %self.shared.name, "cannot recount outside a tokio runtime");
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
        let result = self.shared.source.count(&scope).await;
        let recount = {
            let mut state = lock(&self.shared.state);
            if state.generation != generation || state.ticket != ticket {
                debug!(counter = %self.shared.name, "discarding stale count");
                return;
            }
            state.fetching = false;
            let dirty = std::mem::take(&mut state.dirty);
            match result {
                Ok(value) => {
                    state.value = value;
                    state.phase = Phase::Ready;
                }
                Err(e) => {
                    warn!(counter = %self.shared.name, error = %e, "count fetch failed");
                    if state.phase == Phase::Loading {
                        state.phase = Phase::Failed(e.to_string());
                    }
                }
            }
            dirty
        };
        self.bump();
        if recount {
            self.spawn_refresh(generation);
        }
    }
}

impl<S: Debug> Debug for LiveCounter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("LiveCounter")
            .field("name", &self.shared.name)
            .field("scope", &state.scope)
            .field("value", &state.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{ConnectionOptions, MemoryServer, MemoryTransport};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct Fixture {
        manager: Arc<ConnectionManager>,
        bus: SignalBus,
        total: Arc<AtomicU64>,
        _server: MemoryServer,
    }

    fn fixture(total: u64) -> Fixture {
        let (transport, server) = MemoryTransport::pair();
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(transport),
            ConnectionOptions::default(),
        ));
        manager.connect("u1");
        Fixture {
            manager,
            bus: SignalBus::new(),
            total: Arc::new(AtomicU64::new(total)),
            _server: server,
        }
    }

    fn badge(fx: &Fixture) -> LiveCounter<String> {
        let total = fx.total.clone();
        LiveCounter::new(
            "unread",
            fx.manager.clone(),
            fx.bus.clone(),
            move |_org: String| {
                let total = total.clone();
                async move { Ok::<_, anyhow::Error>(total.load(Ordering::SeqCst)) }
            },
            CounterSpec::new()
                .on("admin-action:created", CounterOp::Increment)
                .on("admin-action:resolved", CounterOp::Decrement)
                .on("notifications:refresh", CounterOp::Recompute)
                .rooms(|org: &String| vec![Room::Org(org.clone())])
                .refresh_on(Signal::NotificationUpdate)
                .filter(|org: &String, payload: &Value| {
                    payload.get("orgId").and_then(Value::as_str) == Some(org.as_str())
                }),
        )
    }

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out");
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let fx = fixture(2);
        let counter = badge(&fx);
        counter.mount("o1".to_string()).await;
        assert_eq!(counter.value(), 2);
        assert_eq!(counter.phase(), Phase::Ready);

        let conn = fx.manager.connection().unwrap();
        conn.dispatch("admin-action:created", &json!({"orgId": "o1"}));
        assert_eq!(counter.value(), 3);
        conn.dispatch("admin-action:resolved", &json!({"orgId": "o1"}));
        conn.dispatch("admin-action:resolved", &json!({"orgId": "o1"}));
        assert_eq!(counter.value(), 1);
    }

    #[tokio::test]
    async fn test_decrement_saturates_at_zero() {
        let fx = fixture(0);
        let counter = badge(&fx);
        counter.mount("o1".to_string()).await;
        fx.manager
            .connection()
            .unwrap()
            .dispatch("admin-action:resolved", &json!({"orgId": "o1"}));
        assert_eq!(counter.value(), 0);
    }

    #[tokio::test]
    async fn test_filter_skips_other_scopes() {
        let fx = fixture(1);
        let counter = badge(&fx);
        counter.mount("o1".to_string()).await;
        fx.manager
            .connection()
            .unwrap()
            .dispatch("admin-action:created", &json!({"orgId": "o2"}));
        assert_eq!(counter.value(), 1);
    }

    #[tokio::test]
    async fn test_recompute_and_signal_refetch() {
        let fx = fixture(1);
        let counter = badge(&fx);
        counter.mount("o1".to_string()).await;

        fx.total.store(5, Ordering::SeqCst);
        fx.manager
            .connection()
            .unwrap()
            .dispatch("notifications:refresh", &Value::Null);
        eventually(|| counter.value() == 5).await;

        fx.total.store(0, Ordering::SeqCst);
        fx.bus.publish(Signal::NotificationUpdate);
        eventually(|| counter.value() == 0).await;
    }

    #[tokio::test]
    async fn test_unmount_stops_counting() {
        let fx = fixture(1);
        let counter = badge(&fx);
        counter.mount("o1".to_string()).await;
        counter.unmount();

        let conn = fx.manager.connection().unwrap();
        assert_eq!(conn.handler_count("admin-action:created"), 0);
        assert!(conn.joined_rooms().is_empty());
        conn.dispatch("admin-action:created", &json!({"orgId": "o1"}));
        assert_eq!(counter.value(), 0);
        assert_eq!(counter.phase(), Phase::Unmounted);
    }

    #[tokio::test]
    async fn test_nudge_during_fetch_triggers_recount() {
        let fx = fixture(2);
        let hold = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let gate = Arc::new(tokio::sync::Notify::new());
        let waiting = Arc::new(AtomicU64::new(0));
        let counter = LiveCounter::new(
            "unread",
            fx.manager.clone(),
            fx.bus.clone(),
            {
                let (total, hold, gate, waiting) =
                    (fx.total.clone(), hold.clone(), gate.clone(), waiting.clone());
                move |_org: String| {
                    let (total, hold, gate, waiting) =
                        (total.clone(), hold.clone(), gate.clone(), waiting.clone());
                    async move {
                        let seen = total.load(Ordering::SeqCst);
                        if hold.load(Ordering::SeqCst) {
                            waiting.fetch_add(1, Ordering::SeqCst);
                            gate.notified().await;
                        }
                        Ok::<_, anyhow::Error>(seen)
                    }
                }
            },
            CounterSpec::new().on("admin-action:created", CounterOp::Increment),
        );
        counter.mount("o1".to_string()).await;
        assert_eq!(counter.value(), 2);

        // The server counts 2, then a new action lands before the reply.
        hold.store(true, Ordering::SeqCst);
        let refresh = tokio::spawn({
            let counter = counter.clone();
            async move { counter.refresh().await }
        });
        eventually(|| waiting.load(Ordering::SeqCst) == 1).await;
        fx.total.store(3, Ordering::SeqCst);
        fx.manager
            .connection()
            .unwrap()
            .dispatch("admin-action:created", &json!({"orgId": "o1"}));
        assert_eq!(counter.value(), 2);

        hold.store(false, Ordering::SeqCst);
        gate.notify_one();
        refresh.await.unwrap();
        eventually(|| counter.value() == 3).await;
        assert_eq!(counter.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn test_failed_count_reports_failure() {
        let fx = fixture(0);
        let counter: LiveCounter<()> = LiveCounter::new(
            "broken",
            fx.manager.clone(),
            fx.bus.clone(),
            |_: ()| async { Err::<u64, _>(anyhow::anyhow!("503")) },
            CounterSpec::new(),
        );
        counter.mount(()).await;
        assert_eq!(counter.phase(), Phase::Failed("503".to_string()));
        assert_eq!(counter.value(), 0);
    }
}
