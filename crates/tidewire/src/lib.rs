//! # tidewire
//!
//! Client engine for a realtime pub/sub messaging service.
//!
//! A [`RealtimeClient`] keeps one logical connection to the service alive
//! across network drops: it connects, resumes with the connection key
//! after a drop, backs off to Suspended when the service has been
//! unreachable for too long, and queues publishes until it can deliver
//! them. Payloads go through an encoding pipeline (JSON, UTF-8, AES-CBC,
//! base64) and ride in JSON or MessagePack envelopes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tidewire::prelude::*;
//!
//! # async fn run() -> Result<(), TidewireError> {
//! let client = RealtimeClient::builder()
//!     .key("app.key:secret")
//!     .build()
//!     .await?;
//! client.wait_for_state(ConnectionState::Connected).await?;
//! client.publish("news", vec![Message::new("headline", "hello")]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The layers are separate crates, re-exported here:
//! - [`transport`]: the transport contract and WebSocket adapter
//! - [`protocol`]: wire types and envelope codecs
//! - [`encoding`]: payload pipeline, cipher, REST pagination
//! - [`connection`]: the connection state machine and its actor
//! - [`timer`]: the cancelable countdown the connection runs on

mod client;
mod error;
pub mod logging;

pub use client::{ClientOptions, RealtimeClient, RealtimeClientBuilder};
pub use error::TidewireError;

pub use tidewire_connection as connection;
pub use tidewire_encoding as encoding;
pub use tidewire_protocol as protocol;
pub use tidewire_timer as timer;
pub use tidewire_transport as transport;

/// The types most applications need.
pub mod prelude {
    pub use crate::logging::{init_logging, LogSink, LoggerHandle};
    pub use crate::{ClientOptions, RealtimeClient, RealtimeClientBuilder, TidewireError};

    pub use tidewire_connection::{
        ConnectionOptions, ConnectionState, ConnectionStateChange, StateData,
    };
    pub use tidewire_encoding::{ChannelOptions, CipherParams, MessageHandler, PaginatedResult};
    pub use tidewire_protocol::{
        Action, Data, ErrorInfo, Message, PresenceAction, PresenceMessage, Protocol,
        ProtocolMessage,
    };
    pub use tidewire_transport::{
        RealtimeTransport, TransportEvent, TransportEventKind, TransportEventSender,
        TransportFactory, TransportId, TransportParams, TransportState, WireFrame,
    };
}
