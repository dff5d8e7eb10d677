//! WebSocket transport implementation using `tokio-tungstenite`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::{
    RealtimeTransport, TransportError, TransportEvent, TransportEventKind,
    TransportEventSender, TransportFactory, TransportId, TransportParams,
    TransportState, WireFrame,
};

/// Creates a [`WebSocketTransport`] per connection attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
    fn create(
        &self,
        params: TransportParams,
        events: TransportEventSender,
    ) -> Box<dyn RealtimeTransport> {
        Box::new(WebSocketTransport::new(params, events))
    }
}

/// A client WebSocket to the realtime service.
///
/// The socket lives on a background task. Outbound frames reach it through
/// an unbounded channel; inbound frames and state changes leave it as
/// [`TransportEvent`]s.
pub struct WebSocketTransport {
    id: TransportId,
    params: TransportParams,
    events: TransportEventSender,
    state: Arc<watch::Sender<TransportState>>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Creates an unconnected transport.
    pub fn new(params: TransportParams, events: TransportEventSender) -> Self {
        let (state, _) = watch::channel(TransportState::Initialized);
        Self {
            id: TransportId::next(),
            params,
            events,
            state: Arc::new(state),
            outbound: None,
            task: None,
        }
    }
}

impl RealtimeTransport for WebSocketTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    fn connect(&mut self) {
        if self.state() != TransportState::Initialized {
            tracing::debug!(id = %self.id, state = %self.state(), "connect ignored");
            return;
        }

        let reporter = Reporter {
            id: self.id,
            events: self.events.clone(),
            state: Arc::clone(&self.state),
        };

        let url = match self.params.url() {
            Ok(url) => url,
            Err(e) => {
                reporter.fail(e.to_string());
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        reporter.set(TransportState::Connecting);
        self.task = Some(tokio::spawn(run(url, rx, reporter)));
    }

    fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        if self.state() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        let msg = match frame {
            WireFrame::Text(text) => Message::Text(text.into()),
            WireFrame::Binary(data) => Message::Binary(data.into()),
        };
        outbound
            .send(msg)
            .map_err(|_| TransportError::ConnectionClosed("writer task gone".into()))
    }

    fn close(&mut self) {
        match self.state() {
            TransportState::Closing | TransportState::Closed | TransportState::Error => {}
            TransportState::Initialized => {
                self.state.send_replace(TransportState::Closed);
                let _ = self.events.send(TransportEvent::new(
                    self.id,
                    TransportEventKind::StateChanged(TransportState::Closed),
                ));
            }
            TransportState::Connecting | TransportState::Connected => {
                self.state.send_replace(TransportState::Closing);
                let _ = self.events.send(TransportEvent::new(
                    self.id,
                    TransportEventKind::StateChanged(TransportState::Closing),
                ));
                // Dropping the sender tells the socket task to send a close frame.
                self.outbound = None;
            }
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        // Mid-handshake there is no session to close, so just stop.
        // Otherwise the task sees `outbound` hang up, sends its close frame
        // and exits on its own.
        if self.state() == TransportState::Connecting {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}

/// Publishes state changes and frames from the socket task.
struct Reporter {
    id: TransportId,
    events: TransportEventSender,
    state: Arc<watch::Sender<TransportState>>,
}

impl Reporter {
    fn set(&self, state: TransportState) {
        self.state.send_replace(state);
        let _ = self
            .events
            .send(TransportEvent::new(self.id, TransportEventKind::StateChanged(state)));
    }

    fn fail(&self, reason: String) {
        tracing::debug!(id = %self.id, %reason, "transport failed");
        self.state.send_replace(TransportState::Error);
        let _ = self
            .events
            .send(TransportEvent::new(self.id, TransportEventKind::Failed(reason)));
    }

    fn data(&self, frame: WireFrame) {
        let _ = self
            .events
            .send(TransportEvent::new(self.id, TransportEventKind::Data(frame)));
    }
}

/// Socket task: connect, then pump frames both ways until either side closes.
async fn run(url: Url, mut outbound: mpsc::UnboundedReceiver<Message>, reporter: Reporter) {
    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            reporter.fail(format!("connect failed: {e}"));
            return;
        }
    };

    if *reporter.state.borrow() == TransportState::Closing {
        // close() raced the handshake.
        let mut ws = ws;
        let _ = ws.close(None).await;
        reporter.set(TransportState::Closed);
        return;
    }

    tracing::debug!(id = %reporter.id, %url, "websocket connected");
    reporter.set(TransportState::Connected);

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        reporter.fail(format!("send failed: {e}"));
                        return;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    reporter.set(TransportState::Closed);
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    reporter.data(WireFrame::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    reporter.data(WireFrame::Binary(data.to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(id = %reporter.id, "websocket closed by remote");
                    reporter.set(TransportState::Closed);
                    return;
                }
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    reporter.fail(format!("receive failed: {e}"));
                    return;
                }
            },
        }
    }
}
