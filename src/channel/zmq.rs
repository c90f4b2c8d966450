//! Record-preserving messaging channel.
//!
//! Wraps a ZMQ DEALER socket: an asynchronous request/reply pattern that
//! preserves one-message-per-send framing natively, so no byte-stream
//! framer is needed. Arbitrarily many requests are multiplexed over the
//! single connection and replies may arrive in any order; correlation
//! relies solely on transaction ids.
//!
//! One I/O task owns the socket and alternates between the outbound queue
//! and the wire, so all socket access happens on a single execution
//! context.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use super::{not_connected, prepare_request, route_inbound, AdminChannel, ChannelState, StateCell};
use crate::config::ZmqConfig;
use crate::correlate::{RequestCorrelator, ResponseHandle};
use crate::error::{AdminError, Result};
use crate::events::{EventBus, EventHandler};

/// Outbound queue depth; admin traffic is low-volume.
const OUTBOUND_CAPACITY: usize = 64;

/// Channel over a ZMQ DEALER socket.
pub struct ZmqChannel {
    config: ZmqConfig,
    correlator: RequestCorrelator,
    events: Arc<EventBus>,
    state: Arc<StateCell>,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    io_task: Mutex<Option<JoinHandle<()>>>,
}

impl ZmqChannel {
    /// Create a channel for the configured endpoint. No I/O happens until
    /// [`connect`](AdminChannel::connect).
    pub fn new(config: ZmqConfig) -> Self {
        Self {
            config,
            correlator: RequestCorrelator::new(),
            events: Arc::new(EventBus::new()),
            state: Arc::new(StateCell::new()),
            outbound: Mutex::new(None),
            io_task: Mutex::new(None),
        }
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn open_socket(endpoint: &str) -> Result<DealerSocket> {
        let mut socket = DealerSocket::new();
        socket
            .connect(endpoint)
            .await
            .map_err(|e| AdminError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;
        Ok(socket)
    }

    /// Socket owner: drains the outbound queue and routes inbound messages
    /// until the queue closes or the socket dies.
    async fn io_loop(
        mut socket: DealerSocket,
        mut outbound: mpsc::Receiver<Vec<u8>>,
        correlator: RequestCorrelator,
        events: Arc<EventBus>,
        config: ZmqConfig,
        state: Arc<StateCell>,
    ) {
        // What woke the loop up; the socket borrow from the recv arm ends
        // before the step is acted on.
        enum Step {
            Outbound(Option<Vec<u8>>),
            Inbound(std::result::Result<ZmqMessage, zeromq::ZmqError>),
        }

        loop {
            let step = tokio::select! {
                queued = outbound.recv() => Step::Outbound(queued),
                inbound = socket.recv() => Step::Inbound(inbound),
            };

            match step {
                Step::Outbound(Some(bytes)) => {
                    if let Err(e) = socket.send(ZmqMessage::from(Bytes::from(bytes))).await {
                        tracing::warn!("ZMQ send failed: {}", e);
                        match Self::recover(&config).await {
                            Some(fresh) => socket = fresh,
                            None => break,
                        }
                    }
                }
                // Disconnect dropped the sender; everything already queued
                // was drained by the recv calls above.
                Step::Outbound(None) => break,
                Step::Inbound(Ok(message)) => Self::route_frames(message, &correlator, &events),
                Step::Inbound(Err(e)) => {
                    tracing::warn!("ZMQ receive failed: {}", e);
                    match Self::recover(&config).await {
                        Some(fresh) => socket = fresh,
                        None => break,
                    }
                }
            }
        }

        // Fatal socket error or disconnect: either way this channel is done.
        state.store(ChannelState::Closed);
        correlator.close_all();
        socket.close().await;
    }

    /// One transparent reconnect attempt when the channel is persistent;
    /// `None` means the error is fatal for this channel.
    async fn recover(config: &ZmqConfig) -> Option<DealerSocket> {
        if !config.persistent {
            tracing::error!("ZMQ socket error on non-persistent channel, closing");
            return None;
        }
        match Self::open_socket(&config.endpoint).await {
            Ok(socket) => {
                tracing::debug!(endpoint = %config.endpoint, "ZMQ socket reconnected");
                Some(socket)
            }
            Err(e) => {
                tracing::error!("ZMQ reconnect failed, channel closing: {}", e);
                None
            }
        }
    }

    /// Decode every frame of a multipart message and route it.
    fn route_frames(message: ZmqMessage, correlator: &RequestCorrelator, events: &EventBus) {
        for frame in message.into_vec() {
            if frame.is_empty() {
                // Delimiter frame from REP-style peers.
                continue;
            }
            match serde_json::from_slice::<Value>(&frame) {
                Ok(value) => route_inbound(value, correlator, events),
                Err(e) => tracing::warn!("discarding undecodable ZMQ frame: {}", e),
            }
        }
    }
}

#[async_trait]
impl AdminChannel for ZmqChannel {
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

        let socket = match Self::open_socket(&self.config.endpoint).await {
            Ok(socket) => socket,
            Err(e) => {
                self.state.store(ChannelState::Disconnected);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let task = tokio::spawn(Self::io_loop(
            socket,
            rx,
            self.correlator.clone(),
            self.events.clone(),
            self.config.clone(),
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

        // Dropping the sender lets the loop drain what is already queued.
        let sender = self.outbound.lock().unwrap().take();
        drop(sender);

        let task = self.io_task.lock().unwrap().take();
        if let Some(mut task) = task {
            match self.config.linger {
                Some(linger) => {
                    if tokio::time::timeout(linger, &mut task).await.is_err() {
                        tracing::debug!("linger elapsed with messages still queued");
                        task.abort();
                    }
                }
                None => task.abort(),
            }
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
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_send_before_connect_fails_fast() {
        let channel = ZmqChannel::new(ZmqConfig::new("tcp://127.0.0.1:7088"));
        let handle = channel.send(json!({"command": "info"})).await;

        assert!(matches!(handle.await, Err(AdminError::ConnectionFailed(_))));
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let channel = ZmqChannel::new(ZmqConfig::new("tcp://127.0.0.1:7088"));

        channel.disconnect().await;
        channel.disconnect().await;

        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_connect_after_close_is_rejected() {
        let channel = ZmqChannel::new(ZmqConfig::new("tcp://127.0.0.1:7088"));
        channel.disconnect().await;

        let result = channel.connect().await;
        assert!(matches!(result, Err(AdminError::ConnectionFailed(_))));
    }

    #[test]
    fn test_route_frames_skips_delimiters_and_garbage() {
        let correlator = RequestCorrelator::new();
        let events = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        events.register(Box::new(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let mut message = ZmqMessage::from(Bytes::from_static(b"not json"));
        message.push_back(Bytes::from(json!({"type": "session"}).to_string()));

        ZmqChannel::route_frames(message, &correlator, &events);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
