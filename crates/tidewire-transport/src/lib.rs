//! Transport contract for tidewire.
//!
//! The connection engine never touches sockets directly. It drives a
//! [`RealtimeTransport`] (connect, send, close, state query) and learns
//! about everything that happens on the wire through [`TransportEvent`]s
//! pushed onto a channel it owns. Transports are created on demand by a
//! [`TransportFactory`], one per connection attempt.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
mod params;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use params::TransportParams;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketTransport, WebSocketTransportFactory};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

/// Counter for generating unique transport IDs.
static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one transport instance.
///
/// Every event a transport emits is tagged with its id, so the engine can
/// ignore late events from a transport it has already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    /// Creates a new `TransportId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// Lifecycle of a single transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created, `connect` not called yet.
    Initialized,
    Connecting,
    Connected,
    Closing,
    Closed,
    /// The transport broke. Terminal, like `Closed`.
    Error,
}

impl TransportState {
    /// `Closed` or `Error`: the transport will never carry data again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One unit on the wire: a text frame or a binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl WireFrame {
    /// Whether this is a binary frame.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// The frame contents as bytes (UTF-8 for text frames).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Length of the frame in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// The transport moved to a new state.
    StateChanged(TransportState),
    /// The transport failed; it is now in [`TransportState::Error`].
    Failed(String),
    /// A frame arrived from the remote end.
    Data(WireFrame),
}

/// An event emitted by a transport, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub transport: TransportId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    /// Shorthand for constructing an event.
    pub fn new(transport: TransportId, kind: TransportEventKind) -> Self {
        Self { transport, kind }
    }
}

/// Where transports deliver their events.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// A duplex channel to the realtime service.
///
/// Every operation is non-blocking: `connect` and `close` start the work
/// and report progress through events, and `send` only hands the frame
/// to the transport's writer.
pub trait RealtimeTransport: Send + 'static {
    /// Returns the unique identifier for this transport.
    fn id(&self) -> TransportId;

    /// Current state.
    fn state(&self) -> TransportState;

    /// Starts connecting. Ignored unless the transport is `Initialized`.
    fn connect(&mut self);

    /// Queues a frame for the remote end.
    ///
    /// # Errors
    /// Returns [`TransportError::NotConnected`] unless the transport is
    /// `Connected`.
    fn send(&mut self, frame: WireFrame) -> Result<(), TransportError>;

    /// Starts an orderly shutdown. Idempotent.
    fn close(&mut self);
}

/// Creates transports for connection attempts.
pub trait TransportFactory: Send + Sync + 'static {
    /// Builds a new, unconnected transport that reports to `events`.
    fn create(
        &self,
        params: TransportParams,
        events: TransportEventSender,
    ) -> Box<dyn RealtimeTransport>;
}
