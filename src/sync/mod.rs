//! State reconciliation: keeping per-view caches consistent with the live
//! event stream and the local signal bus.
//!
//! | Module       | Purpose                                                  |
//! |--------------|----------------------------------------------------------|
//! | `reconcile`  | Idempotent insert / replace / remove primitives          |
//! | `collection` | `LiveCollection`: snapshot + events + rooms for one view |
//! | `counter`    | `LiveCounter`: derived counts kept live                  |
//! | `signals`    | Typed same-process refresh signals                       |
//! | `mount`      | RAII bundle of a mounted view's subscriptions            |

pub mod collection;
pub mod counter;
pub mod mount;
pub mod reconcile;
pub mod signals;

pub use collection::{LiveCollection, Phase, Scope, SnapshotSource, SyncSpec};
pub use counter::{CountSource, CounterOp, CounterSpec, LiveCounter};
pub use mount::MountGuards;
pub use reconcile::{Entity, Mutation};
pub use signals::{Signal, SignalBus, SignalSubscription};
