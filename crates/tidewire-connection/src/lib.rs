//! Connection lifecycle for tidewire.
//!
//! A realtime connection moves through a fixed set of states
//! (Initialized, Connecting, Connected, Disconnected, Suspended, Closing,
//! Closed, Failed). The rules for moving between them are pure functions
//! in [`state`]; [`ConnectionContext`] is the actor that feeds them events
//! and carries out what they ask for.
//!
//! # Key types
//!
//! - [`ConnectionHandle`]: talk to a running connection
//! - [`ConnectionContext`]: the actor itself, reachable through
//!   [`ConnectionHandle::execute`]
//! - [`ConnectionState`] / [`StateData`]: where the connection is
//! - [`ConnectionOptions`]: timeouts, queueing, endpoint

mod config;
mod context;
mod error;
pub mod state;

pub use config::{ConnectionOptions, DEFAULT_REALTIME_HOST};
pub use context::{ConnectionContext, ConnectionHandle};
pub use error::ConnectionError;
pub use state::{ConnectionInfo, ConnectionState, ConnectionStateChange, Effect, Env, StateData, Step};
