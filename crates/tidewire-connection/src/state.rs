//! The connection lifecycle as pure transition functions.
//!
//! ```text
//!                 ┌──────────── connect ─────────────┐
//!                 ▼                                  │
//! Initialized → Connecting → Connected        Closed / Failed
//!                 │   ▲          │                   ▲
//!       loss/timeout  │ retry    │ loss              │
//!                 ▼   │          ▼                   │
//!              Disconnected ←────┘      Closing ─────┘
//!                 │   ▲
//!       TTL spent │   │ retry
//!                 ▼   │
//!              Suspended
//! ```
//!
//! Every handler takes the current [`StateData`] plus an [`Env`] snapshot
//! and returns a [`Step`]: whether the input was consumed, the next state
//! (if any), and the side effects the context must carry out. Nothing in
//! this module touches a socket, a timer or a channel.

use std::fmt;
use std::time::Duration;

use tidewire_protocol::{Action, ConnectionDetails, ErrorInfo, ProtocolMessage};

use crate::ConnectionOptions;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// Whether sends made now are held until the connection is up.
    pub fn queues_messages(self) -> bool {
        matches!(self, Self::Initialized | Self::Connecting | Self::Disconnected)
    }

    /// Whether sends made now go straight to the transport.
    pub fn sends_messages(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Closed or Failed: nothing happens until the next explicit connect.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Suspended => "suspended",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// StateData
// ---------------------------------------------------------------------------

/// The active state plus what it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct StateData {
    pub state: ConnectionState,
    /// Why the connection ended up here, for states entered on failure.
    pub error: Option<ErrorInfo>,
    /// When the state's retry timer will fire, for retrying states.
    pub retry_in: Option<Duration>,
}

impl StateData {
    fn plain(state: ConnectionState) -> Self {
        Self {
            state,
            error: None,
            retry_in: None,
        }
    }

    pub fn initialized() -> Self {
        Self::plain(ConnectionState::Initialized)
    }

    pub fn connecting() -> Self {
        Self::plain(ConnectionState::Connecting)
    }

    pub fn connected(error: Option<ErrorInfo>) -> Self {
        Self {
            error,
            ..Self::plain(ConnectionState::Connected)
        }
    }

    pub fn disconnected(error: ErrorInfo, options: &ConnectionOptions) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            error: Some(error),
            retry_in: Some(options.disconnected_retry_timeout),
        }
    }

    pub fn suspended(error: ErrorInfo, options: &ConnectionOptions) -> Self {
        Self {
            state: ConnectionState::Suspended,
            error: Some(error),
            retry_in: Some(options.suspended_retry_timeout),
        }
    }

    pub fn closing() -> Self {
        Self::plain(ConnectionState::Closing)
    }

    pub fn closed() -> Self {
        Self::plain(ConnectionState::Closed)
    }

    pub fn failed(error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            ..Self::plain(ConnectionState::Failed)
        }
    }
}

impl Default for StateData {
    fn default() -> Self {
        Self::initialized()
    }
}

// ---------------------------------------------------------------------------
// Connection info and state change
// ---------------------------------------------------------------------------

/// Identity of the live connection, as the service announced it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    pub id: Option<String>,
    /// Key used to resume this connection after a drop.
    pub key: Option<String>,
    pub serial: Option<i64>,
    pub details: Option<ConnectionDetails>,
}

impl ConnectionInfo {
    /// Reads connection identity out of a Connected envelope.
    pub fn from_message(message: &ProtocolMessage) -> Self {
        let details = message.connection_details.clone();
        let key = message
            .connection_key
            .clone()
            .or_else(|| details.as_ref().and_then(|d| d.connection_key.clone()));
        Self {
            id: message.connection_id.clone(),
            key,
            serial: message.connection_serial,
            details,
        }
    }
}

/// Broadcast to observers on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
    pub reason: Option<ErrorInfo>,
    pub retry_in: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Env, Effect, Step
// ---------------------------------------------------------------------------

/// What the handlers may read about the world outside the state.
#[derive(Debug, Clone, Copy)]
pub struct Env<'a> {
    pub options: &'a ConnectionOptions,
    /// Whether the current transport is open and can carry a Close.
    pub transport_connected: bool,
    /// Time since the connection was last lost, if it is lost.
    pub connection_lost_for: Option<Duration>,
    /// TTL in force: the service's if it sent one, else the configured one.
    pub connection_state_ttl: Duration,
}

/// A side effect requested by a handler, carried out by the context in
/// the order given.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Serialize and write an envelope to the current transport.
    Send(ProtocolMessage),
    /// Arm the state's timer.
    StartTimer(Duration),
    /// Drop any current transport and open a fresh one.
    OpenTransport,
    CloseTransport,
    SetConnection(ConnectionInfo),
    ClearConnection,
    /// Send every queued message now.
    FlushQueue,
    /// Reject every queued message with this reason.
    FailQueue(ErrorInfo),
}

/// The outcome of one handler call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Step {
    /// Whether the input was consumed by the state machine.
    pub handled: bool,
    pub next: Option<StateData>,
    pub effects: Vec<Effect>,
}

impl Step {
    /// The input means nothing to this state.
    pub fn unhandled() -> Self {
        Self::default()
    }

    /// Consumed, with no transition.
    pub fn handled() -> Self {
        Self {
            handled: true,
            ..Self::default()
        }
    }

    /// Consumed, moving to `next`.
    pub fn to(next: StateData) -> Self {
        Self {
            handled: true,
            next: Some(next),
            effects: Vec::new(),
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Effects a state needs as soon as it becomes active.
///
/// Closing with no open transport has nobody to say goodbye to and moves
/// on to Closed straight away.
pub fn on_attach(state: &StateData, env: Env<'_>) -> Step {
    use ConnectionState::*;

    match state.state {
        Initialized => Step::handled(),
        Connecting => Step::handled()
            .with_effect(Effect::OpenTransport)
            .with_effect(Effect::StartTimer(env.options.connect_timeout)),
        Connected => Step::handled().with_effect(Effect::FlushQueue),
        Disconnected => Step::handled()
            .with_effect(Effect::CloseTransport)
            .with_effect(Effect::StartTimer(
                state.retry_in.unwrap_or(env.options.disconnected_retry_timeout),
            )),
        Suspended => Step::handled()
            .with_effect(Effect::CloseTransport)
            .with_effect(Effect::FailQueue(
                state.error.clone().unwrap_or_else(ErrorInfo::reason_suspended),
            ))
            .with_effect(Effect::StartTimer(
                state.retry_in.unwrap_or(env.options.suspended_retry_timeout),
            )),
        Closing if env.transport_connected => Step::handled()
            .with_effect(Effect::Send(ProtocolMessage::new(Action::Close)))
            .with_effect(Effect::StartTimer(env.options.close_timeout)),
        Closing => Step::to(StateData::closed()),
        Closed => Step::handled()
            .with_effect(Effect::CloseTransport)
            .with_effect(Effect::ClearConnection)
            .with_effect(Effect::FailQueue(ErrorInfo::reason_closed())),
        Failed => Step::handled()
            .with_effect(Effect::CloseTransport)
            .with_effect(Effect::ClearConnection)
            .with_effect(Effect::FailQueue(
                state.error.clone().unwrap_or_else(ErrorInfo::reason_failed),
            )),
    }
}

/// Reacts to an envelope from the service.
///
/// Unhandled envelopes are for the layers above (channel traffic, acks,
/// channel-scoped errors).
pub fn on_message_received(state: &StateData, message: &ProtocolMessage, env: Env<'_>) -> Step {
    use ConnectionState::*;

    if message.action == Action::Error && message.is_channel_scoped() {
        return Step::unhandled();
    }

    let failed = || {
        StateData::failed(message.error.clone().unwrap_or_else(ErrorInfo::reason_failed))
    };
    let disconnected = || {
        StateData::disconnected(
            message.error.clone().unwrap_or_else(ErrorInfo::reason_disconnected),
            env.options,
        )
    };

    match (state.state, message.action) {
        (Initialized | Disconnected | Suspended, Action::Error) => Step::to(failed()),

        (Connecting, Action::Connected) => Step::to(StateData::connected(message.error.clone()))
            .with_effect(Effect::SetConnection(ConnectionInfo::from_message(message))),
        (Connecting | Connected | Closing, Action::Error) => Step::to(failed()),
        (Connecting | Connected | Closing, Action::Disconnected) => Step::to(disconnected()),

        (Connected, Action::Connected) => {
            Step::handled().with_effect(Effect::SetConnection(ConnectionInfo::from_message(message)))
        }
        (Connected, Action::Heartbeat) => Step::handled(),

        (Closing, Action::Closed) => Step::to(StateData::closed()),

        _ => Step::unhandled(),
    }
}

/// Reacts to the transport closing or failing underneath the connection.
pub fn on_transport_unavailable(state: &StateData, error: Option<ErrorInfo>, env: Env<'_>) -> Step {
    use ConnectionState::*;

    match state.state {
        Connecting | Connected => Step::to(StateData::disconnected(
            error.unwrap_or_else(ErrorInfo::reason_disconnected),
            env.options,
        )),
        Closing => Step::to(StateData::closed()),
        _ => Step::unhandled(),
    }
}

/// An explicit request to connect.
pub fn on_connect_requested(state: &StateData, _env: Env<'_>) -> Step {
    use ConnectionState::*;

    match state.state {
        Initialized | Disconnected | Suspended | Closed | Failed => Step::to(StateData::connecting()),
        Connecting | Connected | Closing => Step::handled(),
    }
}

/// An explicit request to close.
pub fn on_close_requested(state: &StateData, _env: Env<'_>) -> Step {
    use ConnectionState::*;

    match state.state {
        Initialized | Disconnected | Suspended => Step::to(StateData::closed()),
        Connecting | Connected => Step::to(StateData::closing()),
        Closing | Closed | Failed => Step::handled(),
    }
}

/// The active state's timer ran out.
pub fn on_timer_elapsed(state: &StateData, env: Env<'_>) -> Step {
    use ConnectionState::*;

    match state.state {
        Connecting => Step::to(StateData::disconnected(
            ErrorInfo::reason_timeout(),
            env.options,
        )),
        Disconnected => {
            let ttl_spent = env
                .connection_lost_for
                .is_some_and(|lost_for| lost_for >= env.connection_state_ttl);
            if ttl_spent {
                Step::to(StateData::suspended(ErrorInfo::reason_suspended(), env.options))
            } else {
                Step::to(StateData::connecting())
            }
        }
        Suspended => Step::to(StateData::connecting()),
        Closing => Step::to(StateData::closed()),
        Initialized | Connected | Closed | Failed => Step::unhandled(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(options: &ConnectionOptions) -> Env<'_> {
        Env {
            options,
            transport_connected: true,
            connection_lost_for: None,
            connection_state_ttl: options.connection_state_ttl,
        }
    }

    fn state(state: ConnectionState) -> StateData {
        StateData {
            state,
            error: None,
            retry_in: None,
        }
    }

    fn next_state(step: &Step) -> Option<ConnectionState> {
        step.next.as_ref().map(|s| s.state)
    }

    const ALL: [ConnectionState; 8] = [
        ConnectionState::Initialized,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
        ConnectionState::Suspended,
        ConnectionState::Closing,
        ConnectionState::Closed,
        ConnectionState::Failed,
    ];

    // =====================================================================
    // Attach
    // =====================================================================

    #[test]
    fn test_connecting_attach_opens_transport_and_arms_connect_timeout() {
        let options = ConnectionOptions::default();
        let step = on_attach(&StateData::connecting(), env(&options));
        assert_eq!(
            step.effects,
            vec![
                Effect::OpenTransport,
                Effect::StartTimer(options.connect_timeout)
            ]
        );
        assert!(step.next.is_none());
    }

    #[test]
    fn test_connected_attach_flushes_queue() {
        let options = ConnectionOptions::default();
        let step = on_attach(&StateData::connected(None), env(&options));
        assert_eq!(step.effects, vec![Effect::FlushQueue]);
    }

    #[test]
    fn test_disconnected_attach_uses_recorded_retry() {
        let options = ConnectionOptions::default();
        let data = StateData::disconnected(ErrorInfo::reason_disconnected(), &options);
        assert_eq!(data.retry_in, Some(Duration::from_secs(15)));
        let step = on_attach(&data, env(&options));
        assert_eq!(
            step.effects,
            vec![
                Effect::CloseTransport,
                Effect::StartTimer(Duration::from_secs(15))
            ]
        );
    }

    #[test]
    fn test_closing_attach_sends_close_when_transport_open() {
        let options = ConnectionOptions::default();
        let step = on_attach(&StateData::closing(), env(&options));
        assert_eq!(
            step.effects,
            vec![
                Effect::Send(ProtocolMessage::new(Action::Close)),
                Effect::StartTimer(Duration::from_millis(1000))
            ]
        );
        assert!(step.next.is_none());
    }

    #[test]
    fn test_closing_attach_without_transport_goes_straight_to_closed() {
        let options = ConnectionOptions::default();
        let env = Env {
            transport_connected: false,
            ..env(&options)
        };
        let step = on_attach(&StateData::closing(), env);
        assert_eq!(next_state(&step), Some(ConnectionState::Closed));
        assert!(step.effects.is_empty(), "no Close envelope, no timer");
    }

    #[test]
    fn test_terminal_attach_clears_connection_and_fails_queue() {
        let options = ConnectionOptions::default();
        let step = on_attach(&StateData::closed(), env(&options));
        assert!(step.effects.contains(&Effect::ClearConnection));
        assert!(step.effects.contains(&Effect::CloseTransport));
        assert!(step.effects.contains(&Effect::FailQueue(ErrorInfo::reason_closed())));

        let err = ErrorInfo::new(40000, 400, "bad request");
        let step = on_attach(&StateData::failed(err.clone()), env(&options));
        assert!(step.effects.contains(&Effect::FailQueue(err)));
    }

    // =====================================================================
    // Connect / close requests
    // =====================================================================

    #[test]
    fn test_connect_request_table() {
        let options = ConnectionOptions::default();
        for s in ALL {
            let step = on_connect_requested(&state(s), env(&options));
            let expected = match s {
                ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Closing => None,
                _ => Some(ConnectionState::Connecting),
            };
            assert_eq!(next_state(&step), expected, "connect in {s}");
            assert!(step.handled);
        }
    }

    #[test]
    fn test_close_request_table() {
        let options = ConnectionOptions::default();
        for s in ALL {
            let step = on_close_requested(&state(s), env(&options));
            let expected = match s {
                ConnectionState::Initialized
                | ConnectionState::Disconnected
                | ConnectionState::Suspended => Some(ConnectionState::Closed),
                ConnectionState::Connecting | ConnectionState::Connected => {
                    Some(ConnectionState::Closing)
                }
                _ => None,
            };
            assert_eq!(next_state(&step), expected, "close in {s}");
        }
    }

    // =====================================================================
    // Envelopes
    // =====================================================================

    #[test]
    fn test_connected_envelope_while_connecting_sets_connection() {
        let options = ConnectionOptions::default();
        let mut msg = ProtocolMessage::new(Action::Connected);
        msg.connection_id = Some("c1".into());
        msg.connection_key = Some("k1".into());

        let step = on_message_received(&StateData::connecting(), &msg, env(&options));
        assert_eq!(next_state(&step), Some(ConnectionState::Connected));
        assert_eq!(
            step.effects,
            vec![Effect::SetConnection(ConnectionInfo {
                id: Some("c1".into()),
                key: Some("k1".into()),
                serial: None,
                details: None,
            })]
        );
    }

    #[test]
    fn test_connected_envelope_while_connected_updates_in_place() {
        let options = ConnectionOptions::default();
        let step = on_message_received(
            &StateData::connected(None),
            &ProtocolMessage::new(Action::Connected),
            env(&options),
        );
        assert!(step.handled);
        assert!(step.next.is_none());
        assert!(matches!(step.effects[..], [Effect::SetConnection(_)]));
    }

    #[test]
    fn test_error_envelope_fails_with_its_error() {
        let options = ConnectionOptions::default();
        let err = ErrorInfo::new(40101, 401, "invalid credentials");
        let msg = ProtocolMessage::new(Action::Error).with_error(err.clone());
        for s in [
            ConnectionState::Initialized,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Suspended,
            ConnectionState::Closing,
        ] {
            let step = on_message_received(&state(s), &msg, env(&options));
            let next = step.next.expect("error should transition");
            assert_eq!(next.state, ConnectionState::Failed, "error in {s}");
            assert_eq!(next.error, Some(err.clone()));
        }
    }

    #[test]
    fn test_error_envelope_in_terminal_states_is_unhandled() {
        let options = ConnectionOptions::default();
        let msg = ProtocolMessage::new(Action::Error);
        for s in [ConnectionState::Closed, ConnectionState::Failed] {
            assert_eq!(on_message_received(&state(s), &msg, env(&options)), Step::unhandled());
        }
    }

    #[test]
    fn test_channel_scoped_error_is_never_consumed() {
        let options = ConnectionOptions::default();
        let mut msg = ProtocolMessage::new(Action::Error).with_error(ErrorInfo::new(
            40160,
            401,
            "channel denied",
        ));
        msg.channel = Some("private".into());
        for s in ALL {
            let step = on_message_received(&state(s), &msg, env(&options));
            assert!(!step.handled, "channel error in {s}");
            assert!(step.next.is_none());
        }
    }

    #[test]
    fn test_disconnected_envelope_defaults_reason() {
        let options = ConnectionOptions::default();
        let step = on_message_received(
            &StateData::connected(None),
            &ProtocolMessage::new(Action::Disconnected),
            env(&options),
        );
        let next = step.next.unwrap();
        assert_eq!(next.state, ConnectionState::Disconnected);
        assert_eq!(next.error, Some(ErrorInfo::reason_disconnected()));
        assert_eq!(next.retry_in, Some(options.disconnected_retry_timeout));
    }

    #[test]
    fn test_heartbeat_consumed_only_when_connected() {
        let options = ConnectionOptions::default();
        let msg = ProtocolMessage::new(Action::Heartbeat);
        assert!(on_message_received(&StateData::connected(None), &msg, env(&options)).handled);
        assert!(!on_message_received(&StateData::connecting(), &msg, env(&options)).handled);
    }

    #[test]
    fn test_closed_envelope_completes_closing() {
        let options = ConnectionOptions::default();
        let step = on_message_received(
            &StateData::closing(),
            &ProtocolMessage::new(Action::Closed),
            env(&options),
        );
        assert_eq!(next_state(&step), Some(ConnectionState::Closed));
    }

    #[test]
    fn test_channel_traffic_is_unhandled() {
        let options = ConnectionOptions::default();
        let msg = ProtocolMessage::messages("news", Vec::new());
        let step = on_message_received(&StateData::connected(None), &msg, env(&options));
        assert_eq!(step, Step::unhandled());
    }

    // =====================================================================
    // Transport loss
    // =====================================================================

    #[test]
    fn test_transport_loss_table() {
        let options = ConnectionOptions::default();
        for s in ALL {
            let step = on_transport_unavailable(&state(s), None, env(&options));
            let expected = match s {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    Some(ConnectionState::Disconnected)
                }
                ConnectionState::Closing => Some(ConnectionState::Closed),
                _ => None,
            };
            assert_eq!(next_state(&step), expected, "transport loss in {s}");
        }
    }

    // =====================================================================
    // Timers
    // =====================================================================

    #[test]
    fn test_connect_timeout_disconnects_with_timeout_reason() {
        let options = ConnectionOptions::default();
        let next = on_timer_elapsed(&StateData::connecting(), env(&options))
            .next
            .unwrap();
        assert_eq!(next.state, ConnectionState::Disconnected);
        assert_eq!(next.error, Some(ErrorInfo::reason_timeout()));
    }

    #[test]
    fn test_disconnected_retry_reconnects_within_ttl() {
        let options = ConnectionOptions::default();
        let env = Env {
            connection_lost_for: Some(Duration::from_secs(60)),
            ..env(&options)
        };
        let data = StateData::disconnected(ErrorInfo::reason_disconnected(), &options);
        let step = on_timer_elapsed(&data, env);
        assert_eq!(next_state(&step), Some(ConnectionState::Connecting));
    }

    #[test]
    fn test_disconnected_retry_suspends_once_ttl_spent() {
        let options = ConnectionOptions::default();
        let env = Env {
            connection_lost_for: Some(Duration::from_secs(120)),
            ..env(&options)
        };
        let data = StateData::disconnected(ErrorInfo::reason_disconnected(), &options);
        let next = on_timer_elapsed(&data, env).next.unwrap();
        assert_eq!(next.state, ConnectionState::Suspended);
        assert_eq!(next.error, Some(ErrorInfo::reason_suspended()));
        assert_eq!(next.retry_in, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_suspended_retry_and_close_timeout() {
        let options = ConnectionOptions::default();
        let suspended = StateData::suspended(ErrorInfo::reason_suspended(), &options);
        assert_eq!(
            next_state(&on_timer_elapsed(&suspended, env(&options))),
            Some(ConnectionState::Connecting)
        );
        assert_eq!(
            next_state(&on_timer_elapsed(&StateData::closing(), env(&options))),
            Some(ConnectionState::Closed)
        );
    }

    #[test]
    fn test_timer_in_untimed_states_is_unhandled() {
        let options = ConnectionOptions::default();
        for s in [
            ConnectionState::Initialized,
            ConnectionState::Connected,
            ConnectionState::Closed,
            ConnectionState::Failed,
        ] {
            assert_eq!(on_timer_elapsed(&state(s), env(&options)), Step::unhandled());
        }
    }

    #[test]
    fn test_state_queueing_rules() {
        for s in ALL {
            let queues = matches!(
                s,
                ConnectionState::Initialized
                    | ConnectionState::Connecting
                    | ConnectionState::Disconnected
            );
            assert_eq!(s.queues_messages(), queues, "{s}");
            assert_eq!(s.sends_messages(), s == ConnectionState::Connected, "{s}");
        }
    }
}
