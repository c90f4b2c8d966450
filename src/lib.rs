//! # admwire
//!
//! Async Rust client for the JSON admin protocol of real-time media
//! gateways.
//!
//! The gateway exposes one logical request/reply/event protocol over three
//! structurally different channels; this crate hides the difference behind
//! a single contract:
//!
//! - **ZMQ**: a record-preserving DEALER socket, replies in any order
//! - **HTTP**: one POST per request, plus a long-poll loop for events
//! - **Unix**: a domain socket whose type (`SOCK_SEQPACKET`, `SOCK_DGRAM`,
//!   `SOCK_STREAM`) is negotiated at connect time, with JSON framing when
//!   only a byte stream is available
//!
//! Every request gets a transaction id; the matching reply, a timeout, or
//! the channel closing settles the returned handle exactly once. Inbound
//! objects without a transaction id fan out to registered event handlers.
//!
//! ## Example
//!
//! ```ignore
//! use admwire::{AdminChannel, UnixChannel, UnixConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> admwire::Result<()> {
//!     let channel = UnixChannel::new(UnixConfig::new("/var/run/gateway-admin.sock"));
//!     channel.on_event(Box::new(|event| {
//!         println!("gateway event: {}", event.body);
//!     }));
//!
//!     channel.connect().await?;
//!     let reply = channel.send(json!({"command": "info"})).await.await?;
//!     println!("info: {:?}", reply.result());
//!
//!     channel.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod correlate;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

pub use channel::{AdminChannel, ChannelState, HttpChannel, ZmqChannel};
pub use config::{ChannelConfig, HttpConfig, ZmqConfig};
pub use correlate::{RequestCorrelator, ResponseHandle};
pub use error::{AdminError, Result};
pub use events::{EventBus, EventHandler};
pub use protocol::{Event, Message, MessageFramer, Reply};

#[cfg(unix)]
pub use channel::UnixChannel;
#[cfg(unix)]
pub use config::UnixConfig;
#[cfg(unix)]
pub use transport::{CapabilityChannel, CapabilityPreference, CapabilityTier};
