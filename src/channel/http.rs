//! HTTP channel.
//!
//! Each request is an independent POST whose response body is one JSON
//! object; HTTP's own pairing substitutes for wire-level correlation, but
//! the transaction id is still injected and honored so the channel behaves
//! identically to its siblings.
//!
//! Events cannot ride the response path. When enabled, a dedicated
//! long-poll loop GETs the event URL continuously: delivered payloads go
//! to the event bus and the loop reissues immediately; on failure or
//! timeout it backs off briefly first. The loop is the only non-reactive
//! piece of the crate - a background task the channel owns for its whole
//! Connected lifetime and cancels on disconnect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::{not_connected, prepare_request, route_inbound, AdminChannel, ChannelState, StateCell};
use crate::config::HttpConfig;
use crate::correlate::{RequestCorrelator, ResponseHandle};
use crate::error::{AdminError, Result};
use crate::events::{EventBus, EventHandler};

/// Margin on top of the server-side poll timeout before the client gives
/// up on a round.
const POLL_GRACE: Duration = Duration::from_secs(5);

/// Channel over stateless HTTP requests plus a long-poll event loop.
pub struct HttpChannel {
    config: HttpConfig,
    correlator: RequestCorrelator,
    events: Arc<EventBus>,
    state: Arc<StateCell>,
    client: Mutex<Option<reqwest::Client>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpChannel {
    /// Create a channel for the configured URLs. No I/O happens until
    /// [`connect`](AdminChannel::connect).
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            correlator: RequestCorrelator::new(),
            events: Arc::new(EventBus::new()),
            state: Arc::new(StateCell::new()),
            client: Mutex::new(None),
            poll_task: Mutex::new(None),
        }
    }

    /// The URL commands are POSTed to.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Repeats GET rounds against the event URL for the whole Connected
    /// lifetime; cancelled by `disconnect`.
    async fn poll_loop(
        client: reqwest::Client,
        url: String,
        config: HttpConfig,
        correlator: RequestCorrelator,
        events: Arc<EventBus>,
    ) {
        loop {
            let round = client
                .get(&url)
                .timeout(config.poll_timeout + POLL_GRACE)
                .send()
                .await;

            match round {
                Ok(response) if response.status().is_success() => {
                    match response.json::<Value>().await {
                        Ok(Value::Array(items)) => {
                            for item in items {
                                route_inbound(item, &correlator, &events);
                            }
                        }
                        Ok(value) => route_inbound(value, &correlator, &events),
                        Err(e) => {
                            tracing::warn!("undecodable long-poll body: {}", e);
                            tokio::time::sleep(config.poll_backoff).await;
                        }
                    }
                    // Reissue immediately; the server holds the next round
                    // open until it has something to deliver.
                }
                Ok(response) => {
                    tracing::debug!(status = %response.status(), "long-poll round failed");
                    tokio::time::sleep(config.poll_backoff).await;
                }
                Err(e) => {
                    tracing::debug!("long-poll round failed: {}", e);
                    tokio::time::sleep(config.poll_backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl AdminChannel for HttpChannel {
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

        let client = match reqwest::Client::builder().build() {
            Ok(client) => client,
            Err(e) => {
                self.state.store(ChannelState::Disconnected);
                return Err(AdminError::ConnectionFailed(e.to_string()));
            }
        };

        if self.config.long_poll {
            let poll_url = self
                .config
                .events_url
                .clone()
                .unwrap_or_else(|| self.config.base_url.clone());
            let task = tokio::spawn(Self::poll_loop(
                client.clone(),
                poll_url,
                self.config.clone(),
                self.correlator.clone(),
                self.events.clone(),
            ));
            *self.poll_task.lock().unwrap() = Some(task);
        }

        *self.client.lock().unwrap() = Some(client);
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

        if let Some(task) = self.poll_task.lock().unwrap().take() {
            task.abort();
        }
        *self.client.lock().unwrap() = None;
        self.correlator.close_all();
    }

    async fn send(&self, payload: Value) -> ResponseHandle {
        if self.state.load() != ChannelState::Connected {
            return not_connected();
        }
        let client = self.client.lock().unwrap().clone();
        let Some(client) = client else {
            return not_connected();
        };

        let (id, handle, bytes) =
            match prepare_request(payload, &self.correlator, &self.config.common) {
                Ok(prepared) => prepared,
                Err(handle) => return handle,
            };

        let url = self.config.base_url.clone();
        let timeout = self.config.common.request_timeout;
        let correlator = self.correlator.clone();
        let events = self.events.clone();

        // Each POST is independent; the response body goes through the
        // correlator like any other inbound object.
        tokio::spawn(async move {
            let outcome = client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes)
                .timeout(timeout + POLL_GRACE)
                .send()
                .await;

            match outcome {
                Ok(response) => match response.json::<Value>().await {
                    Ok(value) => route_inbound(value, &correlator, &events),
                    Err(e) => correlator.fail(&id, AdminError::Decode(e.to_string())),
                },
                Err(e) => {
                    correlator.fail(&id, AdminError::ConnectionFailed(e.to_string()));
                }
            }
        });

        handle
    }

    fn on_event(&self, handler: EventHandler) {
        self.events.register(handler);
    }

    fn is_connected(&self) -> bool {
        self.state.load() == ChannelState::Connected
    }
}
