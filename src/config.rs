//! Per-transport endpoint configuration.
//!
//! The core consumes these values; producing them (config files, CLI flags)
//! is the embedding application's business.

use std::time::Duration;

#[cfg(unix)]
use std::path::PathBuf;

#[cfg(unix)]
use crate::transport::CapabilityPreference;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default long-poll timeout for the HTTP event loop.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default backoff after a failed long-poll round.
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration shared by every channel flavor.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Per-request timeout; each `send` arms its own timer.
    pub request_timeout: Duration,
    /// Credential injected into every request, when set.
    pub secret: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            secret: None,
        }
    }
}

impl ChannelConfig {
    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the injected credential.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// Configuration for the record-preserving messaging channel.
#[derive(Debug, Clone)]
pub struct ZmqConfig {
    /// ZMQ endpoint, e.g. `tcp://127.0.0.1:7088`.
    pub endpoint: String,
    /// Attempt one transparent reconnect on a transient socket error
    /// instead of failing the channel outright.
    pub persistent: bool,
    /// Bound on draining queued outbound messages at disconnect.
    pub linger: Option<Duration>,
    /// Common settings.
    pub common: ChannelConfig,
}

impl ZmqConfig {
    /// Configuration for the given endpoint with defaults everywhere else.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            persistent: true,
            linger: None,
            common: ChannelConfig::default(),
        }
    }

    /// Set the connection persistence flag.
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Set the disconnect linger bound.
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
        self
    }

    /// Replace the common settings.
    pub fn with_common(mut self, common: ChannelConfig) -> Self {
        self.common = common;
        self
    }
}

/// Configuration for the HTTP channel.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL commands are POSTed to.
    pub base_url: String,
    /// Separate URL for the long-poll event loop; the base URL is used
    /// when unset.
    pub events_url: Option<String>,
    /// Run the long-poll event loop while connected.
    pub long_poll: bool,
    /// How long one poll round may stay open server-side.
    pub poll_timeout: Duration,
    /// Pause between rounds after a poll failure or timeout.
    pub poll_backoff: Duration,
    /// Common settings.
    pub common: ChannelConfig,
}

impl HttpConfig {
    /// Configuration for the given command URL with defaults everywhere else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            events_url: None,
            long_poll: true,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            poll_backoff: DEFAULT_POLL_BACKOFF,
            common: ChannelConfig::default(),
        }
    }

    /// Set a dedicated long-poll URL.
    pub fn with_events_url(mut self, url: impl Into<String>) -> Self {
        self.events_url = Some(url.into());
        self
    }

    /// Enable or disable the long-poll event loop.
    pub fn with_long_poll(mut self, enabled: bool) -> Self {
        self.long_poll = enabled;
        self
    }

    /// Set the long-poll round timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the backoff after a failed poll round.
    pub fn with_poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff = backoff;
        self
    }

    /// Replace the common settings.
    pub fn with_common(mut self, common: ChannelConfig) -> Self {
        self.common = common;
        self
    }
}

/// Configuration for the Unix-domain channel.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConfig {
    /// Filesystem path of the gateway's admin socket.
    pub path: PathBuf,
    /// Automatic tier negotiation, or a forced socket type.
    pub capability: CapabilityPreference,
    /// Common settings.
    pub common: ChannelConfig,
}

#[cfg(unix)]
impl UnixConfig {
    /// Configuration for the given socket path with defaults everywhere else.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capability: CapabilityPreference::Auto,
            common: ChannelConfig::default(),
        }
    }

    /// Force a specific capability tier instead of negotiating.
    pub fn with_capability(mut self, capability: CapabilityPreference) -> Self {
        self.capability = capability;
        self
    }

    /// Replace the common settings.
    pub fn with_common(mut self, common: ChannelConfig) -> Self {
        self.common = common;
        self
    }
}
