//! Process-wide, payload-less refresh signals.
//!
//! Used for changes that originate in this process and must reach sibling
//! views that share no data dependency, e.g. "a project was just created
//! here". A signal always means "re-fetch", never an incremental mutation.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error};

use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    ProjectUpdate,
    TaskUpdate,
    MemberUpdate,
    NotificationUpdate,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::ProjectUpdate => "projectUpdate",
            Signal::TaskUpdate => "taskUpdate",
            Signal::MemberUpdate => "memberUpdate",
            Signal::NotificationUpdate => "notificationUpdate",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_signal: HashMap<Signal, Vec<(u64, Listener)>>,
}

/// Typed same-process publish/subscribe bus. Cheap to clone; clones share
/// listeners.
#[derive(Clone, Default)]
pub struct SignalBus {
    inner: Arc<Mutex<Listeners>>,
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = lock(&self.inner);
        let counts: HashMap<&str, usize> = listeners
            .by_signal
            .iter()
            .map(|(signal, ls)| (signal.as_str(), ls.len()))
            .collect();
        f.debug_struct("SignalBus").field("listeners", &counts).finish()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every listener of `signal` synchronously. Returns how many ran.
    pub fn publish(&self, signal: Signal) -> usize {
        let listeners: Vec<Listener> = lock(&self.inner)
            .by_signal
            .get(&signal)
            .map(|ls| ls.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        debug!(signal = %signal, listeners = listeners.len(), "publishing signal");
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                error!(signal = %signal, "signal listener panicked");
            }
        }
        listeners.len()
    }

    /// Listen for `signal` until the returned subscription is dropped.
    pub fn subscribe<F>(&self, signal: Signal, listener: F) -> SignalSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.inner);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners
            .by_signal
            .entry(signal)
            .or_default()
            .push((id, Arc::new(listener)));
        SignalSubscription {
            bus: Arc::downgrade(&self.inner),
            signal,
            id,
        }
    }

    pub fn listener_count(&self, signal: Signal) -> usize {
        lock(&self.inner)
            .by_signal
            .get(&signal)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[derive(Debug)]
#[must_use = "dropping a SignalSubscription stops listening"]
pub struct SignalSubscription {
    bus: Weak<Mutex<Listeners>>,
    signal: Signal,
    id: u64,
}

impl SignalSubscription {
    pub fn signal(&self) -> Signal {
        self.signal
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut listeners = lock(&bus);
        if let Some(ls) = listeners.by_signal.get_mut(&self.signal) {
            ls.retain(|(id, _)| *id != self.id);
            if ls.is_empty() {
                listeners.by_signal.remove(&self.signal);
            }
        }
    }
}
