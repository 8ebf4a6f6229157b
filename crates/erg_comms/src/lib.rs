//! The live side of ergs: where freshly-stored blocks go.
//!
//! * [`EventBridge`] — an optional Unix-domain listener publishing one JSON
//!   object per line to every connected subscriber, best-effort.
//! * [`BridgeConsumer`] — the client side: dials the socket with backoff,
//!   filters block frames, and forwards them to the hub.
//! * [`FirehoseHub`] — in-process fan-out to local listeners (e.g. WebSocket
//!   handlers).
//!
//! Delivery is best-effort throughout: a slow subscriber loses events, the
//! publisher never blocks. Upgrading to guaranteed delivery would need a
//! persistent sequence table and is intentionally out of scope.

mod bridge;
mod consumer;
mod hub;

pub use self::bridge::{BridgeError, EventBridge};
pub use self::consumer::BridgeConsumer;
pub use self::hub::{FirehoseHub, SubscriberId};
