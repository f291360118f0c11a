use std::sync::Arc;

use crate::live::{Connection, RoomLease, Subscription};
use crate::sync::signals::SignalSubscription;

/// Everything a mounted view holds on the shared connection and signal bus.
///
/// Dropping it tears down in a fixed order: event handlers first, so no
/// stray event is acted on, then room leases, then signal listeners.
#[derive(Debug, Default)]
pub struct MountGuards {
    subscriptions: Vec<Subscription>,
    rooms: Vec<RoomLease>,
    signals: Vec<SignalSubscription>,
}

impl MountGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_subscription(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn push_room(&mut self, lease: RoomLease) {
        self.rooms.push(lease);
    }

    pub fn push_signal(&mut self, subscription: SignalSubscription) {
        self.signals.push(subscription);
    }

    /// Whether every handler is registered on `conn`. False when there are
    /// no handlers at all.
    pub fn is_live_on(&self, conn: &Arc<Connection>) -> bool {
        !self.subscriptions.is_empty() && self.subscriptions.iter().all(|s| s.is_on(conn))
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }
}

impl Drop for MountGuards {
    fn drop(&mut self) {
        self.subscriptions.clear();
        self.rooms.clear();
        self.signals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{ConnectionManager, ConnectionOptions, MemoryTransport, Room};
    use crate::sync::signals::{Signal, SignalBus};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_dropping_guards_releases_everything() {
        let (transport, _server) = MemoryTransport::pair();
        let manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());
        let conn = manager.connect("u1");
        let bus = SignalBus::new();

        let mut guards = MountGuards::new();
        guards.push_subscription(conn.subscribe("task:created", |_| {}));
        guards.push_room(conn.lease_room(Room::Project("p1".to_string())));
        guards.push_signal(bus.subscribe(Signal::TaskUpdate, || {}));
        assert_eq!(guards.subscription_count(), 1);
        assert_eq!(guards.room_count(), 1);
        assert_eq!(guards.signal_count(), 1);

        drop(guards);
        assert_eq!(conn.handler_count("task:created"), 0);
        assert!(conn.joined_rooms().is_empty());
        assert_eq!(bus.listener_count(Signal::TaskUpdate), 0);
    }

    #[test]
    fn test_empty_guards_drop_cleanly() {
        let guards = MountGuards::new();
        assert_eq!(guards.subscription_count(), 0);
        drop(guards);
    }
}
