//! Payload encoding for tidewire.
//!
//! Messages don't travel as the application hands them over. Structured
//! values become JSON text, encrypted channels turn payloads into
//! ciphertext, and binary data on a JSON connection is base64-wrapped.
//! Each transform leaves a label in the message's `encoding` field so the
//! receiver can undo them in reverse.
//!
//! - [`Pipeline`] runs the fixed sequence of [`Stage`]s over one payload.
//! - [`MessageHandler`] applies the pipeline to whole envelopes and
//!   serializes them into frames.
//! - [`PaginatedResult`] wraps one page of a history or presence query.

mod error;
mod handler;
mod options;
pub mod pagination;
mod pipeline;
pub mod stage;

pub use error::EncodingError;
pub use handler::MessageHandler;
pub use options::{ChannelOptions, CipherParams, IV_LEN};
pub use pagination::{HttpRequest, HttpResponse, PageLink, PaginatedResult, DEFAULT_QUERY_LIMIT};
pub use pipeline::Pipeline;
pub use stage::{Payload, Stage};
