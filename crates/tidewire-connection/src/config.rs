//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default realtime endpoint.
pub const DEFAULT_REALTIME_HOST: &str = "realtime.tidewire.io";

/// Settings that govern one realtime connection.
///
/// Timeouts follow the service's published defaults. The connection state
/// TTL is replaced by whatever the service announces on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Host of the realtime endpoint.
    pub realtime_host: String,

    /// Connect with `wss` rather than `ws`.
    pub tls: bool,

    /// Explicit port; the scheme default when `None`.
    pub port: Option<u16>,

    /// Speak MessagePack (binary frames) instead of JSON (text frames).
    pub use_binary_protocol: bool,

    /// How long Connecting waits for the service to confirm.
    pub connect_timeout: Duration,

    /// Delay before a Disconnected connection tries again.
    pub disconnected_retry_timeout: Duration,

    /// Delay before a Suspended connection tries again.
    pub suspended_retry_timeout: Duration,

    /// How long after losing the connection retries stay in Disconnected
    /// before giving way to Suspended.
    pub connection_state_ttl: Duration,

    /// How long Closing waits for the service to acknowledge.
    pub close_timeout: Duration,

    /// Hold sends made before the connection is up and flush them once
    /// it is. When off, such sends fail immediately.
    pub queue_messages: bool,

    /// Capacity of the command channel into the connection actor.
    pub command_buffer: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            realtime_host: DEFAULT_REALTIME_HOST.to_owned(),
            tls: true,
            port: None,
            use_binary_protocol: true,
            connect_timeout: Duration::from_secs(15),
            disconnected_retry_timeout: Duration::from_secs(15),
            suspended_retry_timeout: Duration::from_secs(30),
            connection_state_ttl: Duration::from_secs(120),
            close_timeout: Duration::from_millis(1000),
            queue_messages: true,
            command_buffer: 64,
        }
    }
}

impl ConnectionOptions {
    /// Returns a copy with unusable values replaced.
    ///
    /// A zero timeout would make its state flap, so each one falls back
    /// to its default. A zero command buffer becomes 1.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        for (name, value, default) in [
            ("connect_timeout", &mut self.connect_timeout, defaults.connect_timeout),
            (
                "disconnected_retry_timeout",
                &mut self.disconnected_retry_timeout,
                defaults.disconnected_retry_timeout,
            ),
            (
                "suspended_retry_timeout",
                &mut self.suspended_retry_timeout,
                defaults.suspended_retry_timeout,
            ),
            (
                "connection_state_ttl",
                &mut self.connection_state_ttl,
                defaults.connection_state_ttl,
            ),
            ("close_timeout", &mut self.close_timeout, defaults.close_timeout),
        ] {
            if value.is_zero() {
                warn!(option = name, default_ms = default.as_millis() as u64, "zero timeout, using default");
                *value = default;
            }
        }
        if self.command_buffer == 0 {
            warn!("command_buffer is zero, using 1");
            self.command_buffer = 1;
        }
        if self.realtime_host.trim().is_empty() {
            warn!(default = DEFAULT_REALTIME_HOST, "empty realtime_host, using default");
            self.realtime_host = defaults.realtime_host;
        }
        self
    }
}
