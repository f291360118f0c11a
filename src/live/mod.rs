//! Real-time connection to the event-stream server.
//!
//! | Module       | Purpose                                                |
//! |--------------|--------------------------------------------------------|
//! | `wire`       | Engine.IO / Socket.IO text packet codec                |
//! | `transport`  | WebSocket and in-process duplex links                  |
//! | `connection` | Connection manager, handler registry, reconnect driver |
//! | `rooms`      | Room naming and reference-counted membership           |
//! | `events`     | Event names shared with the backend                    |

pub mod connection;
pub mod events;
pub mod rooms;
pub mod transport;
pub mod wire;

pub use connection::{
    Connection, ConnectionManager, ConnectionOptions, ConnectionState, HandlerId, RoomLease,
    Subscription,
};
pub use rooms::{Room, RoomTable};
pub use transport::{Link, MemoryPeer, MemoryServer, MemoryTransport, Transport, WebSocketTransport};
