//! `RealtimeClient` builder and handle.
//!
//! The client is a thin owner of one connection actor. It adds the
//! options a user actually sets (API key, endpoint, wire format,
//! auto-connect) and the publish shorthand; everything stateful lives in
//! `tidewire-connection`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tidewire_connection::{
    ConnectionContext, ConnectionHandle, ConnectionOptions, ConnectionState,
    ConnectionStateChange, StateData,
};
use tidewire_encoding::ChannelOptions;
use tidewire_protocol::{Message, PresenceMessage, ProtocolMessage};
use tidewire_transport::TransportFactory;
use tokio::sync::broadcast;

use crate::TidewireError;

/// Everything needed to start a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// API key handed to every transport.
    pub key: Option<String>,
    pub connection: ConnectionOptions,
    /// Connect as soon as the client is built.
    pub auto_connect: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            key: None,
            connection: ConnectionOptions::default(),
            auto_connect: true,
        }
    }
}

/// Builder for configuring and starting a [`RealtimeClient`].
///
/// # Example
///
/// ```rust,ignore
/// use tidewire::prelude::*;
///
/// let client = RealtimeClient::builder()
///     .key("app.key:secret")
///     .use_binary_protocol(false)
///     .build()
///     .await?;
/// client.publish("news", vec![Message::new("headline", "hello")]).await?;
/// ```
pub struct RealtimeClientBuilder {
    options: ClientOptions,
    factory: Option<Arc<dyn TransportFactory>>,
}

impl RealtimeClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            options: ClientOptions::default(),
            factory: None,
        }
    }

    /// Replaces every option at once.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.options.key = Some(key.into());
        self
    }

    /// Sets the realtime endpoint host.
    pub fn realtime_host(mut self, host: impl Into<String>) -> Self {
        self.options.connection.realtime_host = host.into();
        self
    }

    /// MessagePack when `true` (the default), JSON otherwise.
    pub fn use_binary_protocol(mut self, binary: bool) -> Self {
        self.options.connection.use_binary_protocol = binary;
        self
    }

    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.options.auto_connect = auto_connect;
        self
    }

    /// Sets the connection timeouts, queueing and endpoint in one go.
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.options.connection = options;
        self
    }

    /// Uses `factory` to open transports instead of the WebSocket default.
    pub fn transport_factory(mut self, factory: impl TransportFactory) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Starts the connection actor and, with `auto_connect`, connects.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> Result<RealtimeClient, TidewireError> {
        let factory = match self.factory {
            Some(factory) => factory,
            None => default_factory()?,
        };

        let connection = ConnectionContext::spawn(
            self.options.connection.clone(),
            self.options.key.clone(),
            factory,
        );
        tracing::debug!(
            host = %self.options.connection.realtime_host,
            binary = self.options.connection.use_binary_protocol,
            auto_connect = self.options.auto_connect,
            "realtime client built"
        );
        if self.options.auto_connect {
            connection.connect().await?;
        }

        Ok(RealtimeClient {
            options: self.options,
            connection,
        })
    }
}

impl Default for RealtimeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "websocket")]
fn default_factory() -> Result<Arc<dyn TransportFactory>, TidewireError> {
    Ok(Arc::new(tidewire_transport::WebSocketTransportFactory))
}

#[cfg(not(feature = "websocket"))]
fn default_factory() -> Result<Arc<dyn TransportFactory>, TidewireError> {
    Err(TidewireError::MissingTransport)
}

/// A client for the realtime service.
///
/// Cloning is cheap; clones drive the same connection.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    options: ClientOptions,
    connection: ConnectionHandle,
}

impl RealtimeClient {
    /// Creates a new builder.
    pub fn builder() -> RealtimeClientBuilder {
        RealtimeClientBuilder::new()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The underlying connection, for anything the client doesn't wrap.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub async fn connect(&self) -> Result<(), TidewireError> {
        Ok(self.connection.connect().await?)
    }

    pub async fn close(&self) -> Result<(), TidewireError> {
        Ok(self.connection.close().await?)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn state_data(&self) -> StateData {
        self.connection.state_data()
    }

    /// Waits until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<StateData, TidewireError> {
        Ok(self.connection.wait_for_state(state).await?)
    }

    /// Publishes `messages` on `channel`.
    ///
    /// Resolves once the envelope is written to the transport. Before the
    /// connection is up it waits in the queue, unless queueing is off.
    pub async fn publish(
        &self,
        channel: impl Into<String>,
        messages: Vec<Message>,
    ) -> Result<(), TidewireError> {
        let envelope = ProtocolMessage::messages(channel, messages);
        Ok(self.connection.send(envelope).await?)
    }

    /// Sends presence updates for `channel`.
    pub async fn send_presence(
        &self,
        channel: impl Into<String>,
        presence: Vec<PresenceMessage>,
    ) -> Result<(), TidewireError> {
        let envelope = ProtocolMessage::presence(channel, presence);
        Ok(self.connection.send(envelope).await?)
    }

    /// Sets how `channel`'s payloads are encrypted and decrypted.
    pub async fn set_channel_options(
        &self,
        channel: impl Into<String>,
        options: ChannelOptions,
    ) -> Result<(), TidewireError> {
        Ok(self.connection.set_channel_options(channel, options).await?)
    }

    /// Inbound envelopes not consumed by the connection, decoded.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolMessage> {
        self.connection.subscribe_messages()
    }

    /// Connection state changes, in order.
    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionStateChange> {
        self.connection.subscribe_state_changes()
    }
}
