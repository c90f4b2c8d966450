//! Unix-domain channel.
//!
//! Composes the capability-negotiating socket for raw I/O with the JSON
//! framer for message boundaries - but only when negotiation landed on the
//! byte-stream tier; the record-preserving tiers already deliver one
//! message per receive. Correlation and event fan-out work exactly as on
//! the other channels.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{not_connected, prepare_request, route_inbound, AdminChannel, ChannelState, StateCell};
use crate::config::UnixConfig;
use crate::correlate::{RequestCorrelator, ResponseHandle};
use crate::error::{AdminError, Result};
use crate::events::{EventBus, EventHandler};
use crate::protocol::MessageFramer;
use crate::transport::{CapabilityChannel, CapabilityTier};

/// Outbound queue depth; admin traffic is low-volume.
const OUTBOUND_CAPACITY: usize = 64;

/// Read buffer size for each socket receive.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Channel over the gateway's Unix admin socket.
pub struct UnixChannel {
    config: UnixConfig,
    correlator: RequestCorrelator,
    events: Arc<EventBus>,
    state: Arc<StateCell>,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    io_task: Mutex<Option<JoinHandle<()>>>,
    tier: Mutex<Option<CapabilityTier>>,
}

impl UnixChannel {
    /// Create a channel for the configured socket path. No I/O happens
    /// until [`connect`](AdminChannel::connect).
    pub fn new(config: UnixConfig) -> Self {
        Self {
            config,
            correlator: RequestCorrelator::new(),
            events: Arc::new(EventBus::new()),
            state: Arc::new(StateCell::new()),
            outbound: Mutex::new(None),
            io_task: Mutex::new(None),
            tier: Mutex::new(None),
        }
    }

    /// The capability tier negotiation landed on; `None` before connect.
    pub fn tier(&self) -> Option<CapabilityTier> {
        *self.tier.lock().unwrap()
    }

    /// Socket owner: writes queued requests and turns inbound bytes into
    /// routed messages until the queue closes or the socket dies.
    async fn io_loop(
        socket: CapabilityChannel,
        mut outbound: mpsc::Receiver<Vec<u8>>,
        correlator: RequestCorrelator,
        events: Arc<EventBus>,
        state: Arc<StateCell>,
    ) {
        let tier = socket.tier();
        let mut framer = MessageFramer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                queued = outbound.recv() => match queued {
                    Some(bytes) => {
                        if let Err(e) = socket.send(&bytes).await {
                            tracing::error!("unix socket write failed: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
                read = socket.recv(&mut buf) => match read {
                    Ok(0) if tier == CapabilityTier::Datagram => {
                        // Empty datagram; nothing to frame.
                    }
                    Ok(0) => {
                        tracing::debug!("gateway closed the admin socket");
                        break;
                    }
                    Ok(n) => Self::route_bytes(&buf[..n], tier, &mut framer, &correlator, &events),
                    Err(e) => {
                        tracing::error!("unix socket read failed: {}", e);
                        break;
                    }
                },
            }
        }

        state.store(ChannelState::Closed);
        correlator.close_all();
        socket.close().await;
    }

    /// Turn one receive's worth of bytes into routed messages.
    ///
    /// Record-preserving tiers carry exactly one object per receive; the
    /// byte-stream tier goes through the framer. A garbled message is
    /// dropped with a diagnostic and affects nothing else.
    fn route_bytes(
        bytes: &[u8],
        tier: CapabilityTier,
        framer: &mut MessageFramer,
        correlator: &RequestCorrelator,
        events: &EventBus,
    ) {
        if tier.preserves_records() {
            match serde_json::from_slice::<Value>(bytes) {
                Ok(value) => route_inbound(value, correlator, events),
                Err(e) => tracing::warn!("discarding undecodable message: {}", e),
            }
        } else {
            for value in framer.push(bytes) {
                route_inbound(value, correlator, events);
            }
        }
    }
}

#[async_trait]
impl AdminChannel for UnixChannel {
    async fn connect(&self) -> Result<()> {
        if !self
            .state
            .transition(ChannelState::Disconnected, ChannelState::Connecting)
        {
            return Err(AdminError::ConnectionFailed(format!(
                "channel is {:?}",
                self.state.load()
            )));
        }

        let socket =
            match CapabilityChannel::connect(&self.config.path, self.config.capability).await {
                Ok(socket) => socket,
                Err(e) => {
                    self.state.store(ChannelState::Disconnected);
                    return Err(e);
                }
            };

        tracing::debug!("connected via {}", socket.describe());
        *self.tier.lock().unwrap() = Some(socket.tier());

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let task = tokio::spawn(Self::io_loop(
            socket,
            rx,
            self.correlator.clone(),
            self.events.clone(),
            self.state.clone(),
        ));

        *self.outbound.lock().unwrap() = Some(tx);
        *self.io_task.lock().unwrap() = Some(task);
        self.state.store(ChannelState::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        let was_connected = self
            .state
            .transition(ChannelState::Connected, ChannelState::Closed);
        let was_idle = self
            .state
            .transition(ChannelState::Disconnected, ChannelState::Closed);
        if !was_connected && !was_idle {
            return;
        }

        // Dropping the sender ends the loop, which shuts the socket down.
        let sender = self.outbound.lock().unwrap().take();
        drop(sender);

        let task = self.io_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.correlator.close_all();
    }

    async fn send(&self, payload: Value) -> ResponseHandle {
        if self.state.load() != ChannelState::Connected {
            return not_connected();
        }

        let (id, handle, bytes) =
            match prepare_request(payload, &self.correlator, &self.config.common) {
                Ok(prepared) => prepared,
                Err(handle) => return handle,
            };

        let sender = self.outbound.lock().unwrap().clone();
        match sender {
            Some(sender) => {
                if sender.send(bytes).await.is_err() {
                    self.correlator.fail(&id, AdminError::Closed);
                }
            }
            None => self.correlator.fail(&id, AdminError::Closed),
        }
        handle
    }

    fn on_event(&self, handler: EventHandler) {
        self.events.register(handler);
    }

    fn is_connected(&self) -> bool {
        self.state.load() == ChannelState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CapabilityPreference;
    use serde_json::json;
    use std::path::PathBuf;

    fn missing_socket_config() -> UnixConfig {
        UnixConfig::new(PathBuf::from(crate::transport::generate_socket_path(
            "admwire-unix-missing",
        )))
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_channel_disconnected() {
        let channel = UnixChannel::new(missing_socket_config());

        let result = channel.connect().await;
        assert!(matches!(result, Err(AdminError::ConnectionFailed(_))));
        assert!(!channel.is_connected());
        assert!(channel.tier().is_none());

        // A failed connect does not close the channel; a retry is allowed.
        let result = channel.connect().await;
        assert!(matches!(result, Err(AdminError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails_fast() {
        let channel = UnixChannel::new(missing_socket_config());
        let handle = channel.send(json!({"command": "info"})).await;

        assert!(matches!(handle.await, Err(AdminError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_forced_tier_skips_negotiation() {
        let path = PathBuf::from(crate::transport::generate_socket_path("admwire-unix-forced"));
        let _listener = tokio::net::UnixListener::bind(&path).unwrap();

        let config = UnixConfig::new(&path)
            .with_capability(CapabilityPreference::Force(CapabilityTier::ByteStream));
        let channel = UnixChannel::new(config);

        channel.connect().await.unwrap();
        assert_eq!(channel.tier(), Some(CapabilityTier::ByteStream));

        channel.disconnect().await;
        let _ = std::fs::remove_file(&path);
    }
}
