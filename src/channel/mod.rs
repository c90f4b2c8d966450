//! Channel contract shared by every transport flavor.
//!
//! A channel is obtained for one endpoint, connected once, used for any
//! number of concurrent requests, and closed once. The three siblings -
//! [`ZmqChannel`](crate::channel::ZmqChannel),
//! [`HttpChannel`](crate::channel::HttpChannel) and
//! [`UnixChannel`](crate::channel::UnixChannel) - compose the same
//! correlator and event bus and differ only in how bytes move.
//!
//! # Example
//!
//! ```ignore
//! use admwire::{AdminChannel, HttpChannel, HttpConfig};
//! use serde_json::json;
//!
//! let channel = HttpChannel::new(HttpConfig::new("http://localhost:7088/admin"));
//! channel.connect().await?;
//!
//! // `send` returns immediately; awaiting the handle yields the reply.
//! let reply = channel.send(json!({"command": "info"})).await.await?;
//! println!("gateway info: {:?}", reply.result());
//!
//! channel.disconnect().await;
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ChannelConfig;
use crate::correlate::{RequestCorrelator, ResponseHandle};
use crate::error::{AdminError, Result};
use crate::events::{EventBus, EventHandler};
use crate::protocol::{inject_envelope, Message};

mod http;
mod zmq;

#[cfg(unix)]
mod unix;

pub use http::HttpChannel;
pub use zmq::ZmqChannel;

#[cfg(unix)]
pub use unix::UnixChannel;

/// Lifecycle state of one channel instance.
///
/// Closed is terminal: a channel is never reconnected after `disconnect`
/// or a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Initial state; also restored after a failed connect.
    Disconnected,
    /// `connect` is in flight.
    Connecting,
    /// Ready for `send`.
    Connected,
    /// Terminal.
    Closed,
}

/// Atomic cell holding a [`ChannelState`].
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ChannelState::Disconnected as u8))
    }

    pub(crate) fn load(&self) -> ChannelState {
        match self.0.load(Ordering::Acquire) {
            0 => ChannelState::Disconnected,
            1 => ChannelState::Connecting,
            2 => ChannelState::Connected,
            _ => ChannelState::Closed,
        }
    }

    pub(crate) fn store(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if some other transition won.
    pub(crate) fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The contract every transport implements.
///
/// `send` never blocks on the gateway: it returns a [`ResponseHandle`]
/// that settles exactly once - with the reply, or with one of the typed
/// errors - on the channel's own turns.
#[async_trait]
pub trait AdminChannel: Send + Sync {
    /// Establish the underlying channel.
    ///
    /// On failure the state returns to Disconnected and the error is a
    /// [`AdminError::ConnectionFailed`].
    async fn connect(&self) -> Result<()>;

    /// Close the channel, rejecting every outstanding request with
    /// [`AdminError::Closed`]. Idempotent; the channel cannot be reused.
    async fn disconnect(&self);

    /// Issue a request.
    ///
    /// A fresh transaction id and the configured credential are injected
    /// into the payload before transmission. Requires the channel to be
    /// connected; otherwise the returned handle rejects immediately.
    async fn send(&self, payload: Value) -> ResponseHandle;

    /// Register a handler for unsolicited messages. May be called before
    /// or after `connect`; handlers fire in registration order.
    fn on_event(&self, handler: EventHandler);

    /// Whether the channel is currently connected.
    fn is_connected(&self) -> bool;
}

/// Route one decoded inbound object: replies to the correlator, anything
/// without a transaction id to the event bus.
pub(crate) fn route_inbound(value: Value, correlator: &RequestCorrelator, events: &EventBus) {
    match Message::from_value(value) {
        Message::Reply(reply) => correlator.resolve(reply),
        Message::Event(event) => events.dispatch(&event),
    }
}

/// Shared `send` preamble: validate the payload, register the pending
/// request, inject the envelope, encode.
///
/// Returns the transaction id, the caller's handle and the bytes to put on
/// the wire. The payload's `command` field, when present, labels the
/// pending entry for diagnostics.
pub(crate) fn prepare_request(
    mut payload: Value,
    correlator: &RequestCorrelator,
    config: &ChannelConfig,
) -> std::result::Result<(String, ResponseHandle, Vec<u8>), ResponseHandle> {
    let command = payload
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or("request")
        .to_string();

    let (id, handle) = correlator.register(&command, config.request_timeout);
    if let Err(e) = inject_envelope(&mut payload, &id, config.secret.as_deref()) {
        correlator.fail(&id, e);
        return Err(handle);
    }

    match serde_json::to_vec(&payload) {
        Ok(bytes) => Ok((id, handle, bytes)),
        Err(e) => {
            correlator.fail(&id, e.into());
            Err(handle)
        }
    }
}

/// Handle returned when `send` is called on a channel that is not
/// connected.
pub(crate) fn not_connected() -> ResponseHandle {
    ResponseHandle::rejected(AdminError::ConnectionFailed(
        "channel is not connected".to_string(),
    ))
}
