//! Pluggable log sink.
//!
//! All crates in the workspace log through `tracing` macros and never
//! know where the output goes. This module bridges those events to a
//! process-wide [`LogSink`] that can be swapped at runtime: a
//! [`SinkLayer`] registered with `tracing-subscriber` hands every event
//! that passes the filter to whichever sink the [`LoggerHandle`] holds.
//!
//! ```rust,no_run
//! use tidewire::logging::{init_logging, LoggerHandle};
//!
//! let logger = LoggerHandle::default();
//! init_logging(&logger, "tidewire=debug,info").expect("logging");
//! ```

use std::fmt::{self, Write as _};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::TidewireError;

/// Receives formatted log lines.
pub trait LogSink: Send + Sync + 'static {
    fn log(&self, level: Level, message: &str);
}

/// Writes each line to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn log(&self, level: Level, message: &str) {
        eprintln!("{level:>5} {message}");
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Shared, replaceable reference to the active sink.
///
/// Clones share the same slot, so a sink set through one clone is seen
/// by every [`SinkLayer`] built from any of them.
#[derive(Clone)]
pub struct LoggerHandle {
    sink: Arc<RwLock<Arc<dyn LogSink>>>,
}

impl LoggerHandle {
    pub fn new(sink: impl LogSink) -> Self {
        Self {
            sink: Arc::new(RwLock::new(Arc::new(sink))),
        }
    }

    /// Replaces the active sink and returns the one it displaced.
    pub fn set_sink(&self, sink: Arc<dyn LogSink>) -> Arc<dyn LogSink> {
        let mut slot = self.sink.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, sink)
    }

    /// Installs `sink` until the returned guard is dropped, then puts the
    /// previous sink back.
    pub fn temp_sink(&self, sink: Arc<dyn LogSink>) -> SinkGuard {
        let previous = self.set_sink(sink);
        SinkGuard {
            handle: self.clone(),
            previous: Some(previous),
        }
    }

    /// Sends one line to the active sink.
    pub fn log(&self, level: Level, message: &str) {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        sink.log(level, message);
    }

    /// A `tracing-subscriber` layer that forwards to this handle.
    pub fn layer(&self) -> SinkLayer {
        SinkLayer {
            handle: self.clone(),
        }
    }
}

impl Default for LoggerHandle {
    fn default() -> Self {
        Self::new(ConsoleSink)
    }
}

impl fmt::Debug for LoggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerHandle").finish_non_exhaustive()
    }
}

/// Restores the previous sink on drop. See [`LoggerHandle::temp_sink`].
#[must_use = "the sink is restored as soon as the guard is dropped"]
pub struct SinkGuard {
    handle: LoggerHandle,
    previous: Option<Arc<dyn LogSink>>,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.handle.set_sink(previous);
        }
    }
}

/// Forwards each event as `(level, "message key=value ...")`.
pub struct SinkLayer {
    handle: LoggerHandle,
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.handle.log(*event.metadata().level(), &line.finish());
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(mut self) -> String {
        if self.message.is_empty() {
            return self.fields.trim_start().to_owned();
        }
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Installs `registry + EnvFilter(filter) + SinkLayer` as the global
/// subscriber.
///
/// # Errors
/// Fails if `filter` is not a valid directive string, or if a global
/// subscriber is already set.
pub fn init_logging(handle: &LoggerHandle, filter: &str) -> Result<(), TidewireError> {
    let filter = EnvFilter::try_new(filter)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(handle.layer())
        .try_init()?;
    Ok(())
}
