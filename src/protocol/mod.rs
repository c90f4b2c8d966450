//! Wire protocol - JSON envelope types and stream framing.
//!
//! The admin protocol exchanges bare JSON objects. Outbound requests carry a
//! client-chosen `transaction` string plus an optional credential; inbound
//! objects are discriminated by the presence of `transaction` into replies
//! (routed to the correlator) and events (routed to the event bus).

mod framer;
mod message;

pub use framer::MessageFramer;
pub use message::{inject_envelope, Event, Message, Reply, RemoteFault};
pub use message::{SECRET_FIELD, TRANSACTION_FIELD};
