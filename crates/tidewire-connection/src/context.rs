//! Connection actor: a Tokio task that owns the connection state.
//!
//! Commands from [`ConnectionHandle`]s, transport events and timer fires
//! all arrive on queues drained by one task, so exactly one handler runs
//! at a time and whichever event is processed first wins. The pure
//! handlers in [`crate::state`] decide what happens; this module carries
//! out their effects.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tidewire_encoding::{ChannelOptions, MessageHandler, Pipeline};
use tidewire_protocol::{Action, ErrorInfo, Protocol, ProtocolMessage};
use tidewire_timer::{CountdownTimer, TimerToken};
use tidewire_transport::{
    RealtimeTransport, TransportEvent, TransportEventKind, TransportEventSender,
    TransportFactory, TransportId, TransportParams, TransportState, WireFrame,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::state::{
    self, ConnectionInfo, ConnectionState, ConnectionStateChange, Effect, Env, StateData, Step,
};
use crate::{ConnectionError, ConnectionOptions};

const STATE_CHANGE_CAPACITY: usize = 64;
const MESSAGE_CAPACITY: usize = 256;

type Reply = oneshot::Sender<Result<(), ConnectionError>>;
type Job = Box<dyn FnOnce(&mut ConnectionContext) + Send>;

/// Commands sent to the connection actor through its channel.
enum Command {
    Connect,
    Close,
    Send {
        message: ProtocolMessage,
        reply: Reply,
    },
    SetChannelOptions {
        channel: String,
        options: ChannelOptions,
    },
    /// Run a closure against the context on the actor's task.
    Execute(Job),
}

struct Queued {
    message: ProtocolMessage,
    reply: Reply,
}

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

/// Handle to a running connection actor.
///
/// Cheap to clone. The actor stops once every handle is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<Command>,
    state: watch::Receiver<StateData>,
    changes: broadcast::Sender<ConnectionStateChange>,
    messages: broadcast::Sender<ProtocolMessage>,
}

impl ConnectionHandle {
    /// Asks the connection to connect. Returns once the request is queued.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.command(Command::Connect).await
    }

    /// Asks the connection to close. Returns once the request is queued.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        self.command(Command::Close).await
    }

    /// Sends an envelope, or queues it if the connection isn't up yet.
    ///
    /// Resolves once the envelope has been written to the transport, or
    /// with an error if it is refused now or dropped from the queue later.
    pub async fn send(&self, message: ProtocolMessage) -> Result<(), ConnectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Send {
            message,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| ConnectionError::Unavailable)?
    }

    /// Sets the encoding options used for `channel`'s payloads.
    pub async fn set_channel_options(
        &self,
        channel: impl Into<String>,
        options: ChannelOptions,
    ) -> Result<(), ConnectionError> {
        self.command(Command::SetChannelOptions {
            channel: channel.into(),
            options,
        })
        .await
    }

    /// Runs `f` on the actor's task with exclusive access to the context.
    pub async fn execute<F, R>(&self, f: F) -> Result<R, ConnectionError>
    where
        F: FnOnce(&mut ConnectionContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |ctx: &mut ConnectionContext| {
            let _ = reply_tx.send(f(ctx));
        });
        self.command(Command::Execute(job)).await?;
        reply_rx.await.map_err(|_| ConnectionError::Unavailable)
    }

    /// The state the connection is in right now.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state
    }

    /// The current state with its reason and retry delay.
    pub fn state_data(&self) -> StateData {
        self.state.borrow().clone()
    }

    /// Waits until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<StateData, ConnectionError> {
        let mut state = self.state.clone();
        let data = state
            .wait_for(|data| data.state == target)
            .await
            .map_err(|_| ConnectionError::Unavailable)?;
        Ok(data.clone())
    }

    /// Every transition from now on, in order.
    pub fn subscribe_state_changes(&self) -> broadcast::Receiver<ConnectionStateChange> {
        self.changes.subscribe()
    }

    /// Envelopes the state machine didn't consume, payloads decoded.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<ProtocolMessage> {
        self.messages.subscribe()
    }

    /// Identity of the live connection, if there is one.
    pub async fn connection_info(&self) -> Result<Option<ConnectionInfo>, ConnectionError> {
        self.execute(|ctx| ctx.connection().cloned()).await
    }

    async fn command(&self, command: Command) -> Result<(), ConnectionError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| ConnectionError::Unavailable)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ConnectionContext
// ---------------------------------------------------------------------------

/// Everything one connection owns. Lives on the actor's task.
pub struct ConnectionContext {
    options: ConnectionOptions,
    key: Option<String>,
    state: StateData,
    handler: MessageHandler,
    factory: Arc<dyn TransportFactory>,
    transport: Option<Box<dyn RealtimeTransport>>,
    timer: CountdownTimer,
    connection: Option<ConnectionInfo>,
    /// When the connection was last lost; cleared once connected again.
    lost_at: Option<Instant>,
    msg_serial: i64,
    queue: VecDeque<Queued>,
    channel_options: HashMap<String, Arc<ChannelOptions>>,
    default_channel_options: Arc<ChannelOptions>,
    transport_tx: TransportEventSender,
    timer_tx: mpsc::UnboundedSender<TimerToken>,
    state_tx: watch::Sender<StateData>,
    changes_tx: broadcast::Sender<ConnectionStateChange>,
    messages_tx: broadcast::Sender<ProtocolMessage>,
}

impl ConnectionContext {
    /// Starts a connection actor in the Initialized state.
    ///
    /// `key` is passed to every transport the connection opens. Must be
    /// called from within a tokio runtime.
    pub fn spawn(
        options: ConnectionOptions,
        key: Option<String>,
        factory: Arc<dyn TransportFactory>,
    ) -> ConnectionHandle {
        let options = options.validated();
        let (command_tx, command_rx) = mpsc::channel(options.command_buffer);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(StateData::initialized());
        let (changes_tx, _) = broadcast::channel(STATE_CHANGE_CAPACITY);
        let (messages_tx, _) = broadcast::channel(MESSAGE_CAPACITY);

        let handle = ConnectionHandle {
            sender: command_tx,
            state: state_rx,
            changes: changes_tx.clone(),
            messages: messages_tx.clone(),
        };

        let context = Self {
            handler: MessageHandler::new(Protocol::from_binary_flag(options.use_binary_protocol)),
            options,
            key,
            state: StateData::initialized(),
            factory,
            transport: None,
            timer: CountdownTimer::new("connection"),
            connection: None,
            lost_at: None,
            msg_serial: 0,
            queue: VecDeque::new(),
            channel_options: HashMap::new(),
            default_channel_options: Arc::new(ChannelOptions::default()),
            transport_tx,
            timer_tx,
            state_tx,
            changes_tx,
            messages_tx,
        };
        tokio::spawn(context.run(command_rx, transport_rx, timer_rx));

        handle
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut timer_events: mpsc::UnboundedReceiver<TimerToken>,
    ) {
        info!(
            host = %self.options.realtime_host,
            protocol = %self.handler.protocol(),
            "connection actor started"
        );

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
                Some(event) = transport_events.recv() => self.on_transport_event(event),
                Some(token) = timer_events.recv() => self.on_timer_fired(token),
            }
        }

        self.timer.abort();
        self.close_transport();
        self.fail_queue(ErrorInfo::reason_closed());
        info!("connection actor stopped");
    }

    // -- accessors, for `ConnectionHandle::execute` closures --------------

    pub fn state(&self) -> &StateData {
        &self.state
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn connection(&self) -> Option<&ConnectionInfo> {
        self.connection.as_ref()
    }

    pub fn transport_id(&self) -> Option<TransportId> {
        self.transport.as_ref().map(|t| t.id())
    }

    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    pub fn channel_options(&self, channel: &str) -> Option<&ChannelOptions> {
        self.channel_options.get(channel).map(Arc::as_ref)
    }

    /// Makes `next` the active state.
    ///
    /// The outgoing state's timer is aborted before anything else, so it
    /// can never fire into its successor. Observers are told about the
    /// change, then the new state's attach effects run.
    pub fn set_state(&mut self, next: StateData) {
        self.timer.abort();
        let previous = std::mem::replace(&mut self.state, next);
        let current = self.state.state;

        match current {
            ConnectionState::Connected | ConnectionState::Closed | ConnectionState::Failed => {
                self.lost_at = None;
            }
            ConnectionState::Disconnected if self.lost_at.is_none() => {
                self.lost_at = Some(Instant::now());
            }
            _ => {}
        }

        info!(
            from = %previous.state,
            to = %current,
            reason = ?self.state.error.as_ref().map(|e| e.code),
            retry_in_ms = ?self.state.retry_in.map(|d| d.as_millis() as u64),
            "connection state changed"
        );

        self.state_tx.send_replace(self.state.clone());
        let _ = self.changes_tx.send(ConnectionStateChange {
            previous: previous.state,
            current,
            reason: self.state.error.clone(),
            retry_in: self.state.retry_in,
        });

        let step = state::on_attach(&self.state, self.env());
        self.apply(step);
    }

    // -- event handling ----------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                let step = state::on_connect_requested(&self.state, self.env());
                self.apply(step);
            }
            Command::Close => {
                let step = state::on_close_requested(&self.state, self.env());
                self.apply(step);
            }
            Command::Send { message, reply } => self.handle_send(message, reply),
            Command::SetChannelOptions { channel, options } => {
                debug!(%channel, encrypted = options.is_encrypted(), "channel options set");
                self.channel_options.insert(channel, Arc::new(options));
            }
            Command::Execute(job) => job(self),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        if self.transport_id() != Some(event.transport) {
            trace!(transport = %event.transport, "ignoring event from stale transport");
            return;
        }

        match event.kind {
            TransportEventKind::Data(frame) => self.on_frame(frame),
            TransportEventKind::StateChanged(transport_state) => {
                debug!(transport = %event.transport, state = %transport_state, "transport state changed");
                if transport_state.is_terminal() {
                    self.on_transport_lost(None);
                }
            }
            TransportEventKind::Failed(reason) => {
                warn!(transport = %event.transport, %reason, "transport failed");
                let error = ErrorInfo {
                    message: reason,
                    ..ErrorInfo::reason_disconnected()
                };
                self.on_transport_lost(Some(error));
            }
        }
    }

    fn on_transport_lost(&mut self, error: Option<ErrorInfo>) {
        let step = state::on_transport_unavailable(&self.state, error, self.env());
        if !step.handled {
            trace!(state = %self.state.state, "transport loss ignored in this state");
        }
        self.apply(step);
    }

    fn on_frame(&mut self, frame: WireFrame) {
        let mut message = match self.handler.parse_realtime_data(&frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, bytes = frame.len(), "dropping unparseable frame");
                return;
            }
        };
        trace!(action = %message.action, channel = ?message.channel, "envelope received");

        let step = state::on_message_received(&self.state, &message, self.env());
        if step.handled {
            self.apply(step);
            return;
        }
        if message.action == Action::Error && !message.is_channel_scoped() {
            warn!(state = %self.state.state, error = ?message.error, "error envelope ignored");
        }

        let options = self.options_for(message.channel.as_deref());
        if let Err(e) = self.handler.decode_protocol_message(&mut message, &options) {
            warn!(channel = ?message.channel, error = %e, "payload decode failed, delivering still encoded");
        }
        let _ = self.messages_tx.send(message);
    }

    fn on_timer_fired(&mut self, token: TimerToken) {
        if self.timer.token() != Some(token) {
            trace!(%token, "ignoring fire from replaced timer");
            return;
        }
        let step = state::on_timer_elapsed(&self.state, self.env());
        self.apply(step);
    }

    fn handle_send(&mut self, message: ProtocolMessage, reply: Reply) {
        // Refuse bad payloads now rather than after sitting in the queue.
        let valid = Pipeline::validate_all(&message.messages)
            .and_then(|()| Pipeline::validate_all(&message.presence));
        if let Err(e) = valid {
            let _ = reply.send(Err(e.into()));
            return;
        }

        let current = self.state.state;
        if current.sends_messages() {
            let _ = reply.send(self.send_now(message));
        } else if current.queues_messages() && self.options.queue_messages {
            self.queue.push_back(Queued { message, reply });
            debug!(state = %current, queued = self.queue.len(), "message queued until connected");
        } else {
            let _ = reply.send(Err(ConnectionError::InvalidState(current)));
        }
    }

    // -- effects -----------------------------------------------------------

    fn env(&self) -> Env<'_> {
        let service_ttl = self
            .connection
            .as_ref()
            .and_then(|c| c.details.as_ref())
            .and_then(|d| d.connection_state_ttl)
            .map(Duration::from_millis);
        Env {
            options: &self.options,
            transport_connected: self
                .transport
                .as_ref()
                .is_some_and(|t| t.state() == TransportState::Connected),
            connection_lost_for: self.lost_at.map(|at| at.elapsed()),
            connection_state_ttl: service_ttl.unwrap_or(self.options.connection_state_ttl),
        }
    }

    fn apply(&mut self, step: Step) {
        for effect in step.effects {
            self.run_effect(effect);
        }
        if let Some(next) = step.next {
            self.set_state(next);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Send(message) => {
                let action = message.action;
                if let Err(e) = self.send_now(message) {
                    debug!(%action, error = %e, "could not send protocol message");
                }
            }
            Effect::StartTimer(delay) => {
                let timer_tx = self.timer_tx.clone();
                self.timer.start(delay, move |token| {
                    let _ = timer_tx.send(token);
                });
            }
            Effect::OpenTransport => self.open_transport(),
            Effect::CloseTransport => self.close_transport(),
            Effect::SetConnection(info) => {
                info!(connection_id = ?info.id, "connection established");
                self.connection = Some(info);
            }
            Effect::ClearConnection => {
                self.connection = None;
                self.msg_serial = 0;
            }
            Effect::FlushQueue => self.flush_queue(),
            Effect::FailQueue(reason) => self.fail_queue(reason),
        }
    }

    fn open_transport(&mut self) {
        self.close_transport();
        let params = TransportParams {
            host: self.options.realtime_host.clone(),
            tls: self.options.tls,
            port: self.options.port,
            use_binary_protocol: self.options.use_binary_protocol,
            key: self.key.clone(),
            connection_key: self.connection.as_ref().and_then(|c| c.key.clone()),
        };
        let mut transport = self.factory.create(params, self.transport_tx.clone());
        info!(transport = %transport.id(), "opening transport");
        transport.connect();
        self.transport = Some(transport);
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            debug!(transport = %transport.id(), "closing transport");
            transport.close();
        }
    }

    fn send_now(&mut self, mut message: ProtocolMessage) -> Result<(), ConnectionError> {
        let needs_serial = matches!(message.action, Action::Message | Action::Presence);
        if needs_serial {
            message.msg_serial = Some(self.msg_serial);
        }

        let options = self.options_for(message.channel.as_deref());
        let data = self.handler.to_transport_data(message, &options)?;
        let transport = self
            .transport
            .as_mut()
            .ok_or(ConnectionError::InvalidState(self.state.state))?;
        transport.send(data.frame)?;

        if needs_serial {
            self.msg_serial += 1;
        }
        Ok(())
    }

    fn flush_queue(&mut self) {
        let queued = std::mem::take(&mut self.queue);
        if !queued.is_empty() {
            debug!(count = queued.len(), "flushing queued messages");
        }
        for Queued { message, reply } in queued {
            let _ = reply.send(self.send_now(message));
        }
    }

    fn fail_queue(&mut self, reason: ErrorInfo) {
        let queued = std::mem::take(&mut self.queue);
        if !queued.is_empty() {
            debug!(count = queued.len(), code = reason.code, "failing queued messages");
        }
        for Queued { reply, .. } in queued {
            let _ = reply.send(Err(ConnectionError::Rejected(reason.clone())));
        }
    }

    fn options_for(&self, channel: Option<&str>) -> Arc<ChannelOptions> {
        channel
            .and_then(|name| self.channel_options.get(name))
            .unwrap_or(&self.default_channel_options)
            .clone()
    }
}
