//! Link state machine for the broker session.
//!
//! `Connecting` sits between `Disconnected` and `Connected` so the session
//! can refuse calls until the reply subscription is active. Transitions are
//! enumerated; anything else is rejected and left to the caller to log.
//! Observers watch transitions through a `watch` channel and the machine
//! never blocks on them.

use tokio::sync::watch;
use tracing::debug;

use crate::errors::StateError;

/// Connection state of the transport session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Initial state; no broker connection.
    Disconnected,
    /// Connect initiated; reply subscription not yet active.
    Connecting,
    /// Connected and subscribed; calls may be issued.
    Connected,
}

/// Inputs to the state machine, derived from transport notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connect attempt was initiated.
    ConnectStarted,
    /// Connect succeeded and the reply subscription is active.
    ConnectSucceeded,
    /// Connect attempt refused; carries the broker reason code.
    ConnectFailed { code: i32 },
    /// Connection lost, deliberate or transport-initiated.
    ConnectionLost,
}

/// Explicit state machine with enumerated legal transitions.
pub struct LinkStateMachine {
    state: LinkState,
    tx: watch::Sender<LinkState>,
}

impl LinkStateMachine {
    /// Create the machine in `Disconnected` plus a receiver for observers.
    pub fn new() -> (Self, watch::Receiver<LinkState>) {
        let (tx, rx) = watch::channel(LinkState::Disconnected);
        (
            Self {
                state: LinkState::Disconnected,
                tx,
            },
            rx,
        )
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Subscribe to state transitions.
    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.tx.subscribe()
    }

    /// Apply `event`, returning the new state or rejecting an illegal
    /// transition (e.g. a connect-success notification while already
    /// connected) without changing state.
    pub fn apply(&mut self, event: LinkEvent) -> Result<LinkState, StateError> {
        use LinkEvent::*;
        use LinkState::*;

        let next = match (self.state, event) {
            (Disconnected, ConnectStarted) => Connecting,
            (Connecting, ConnectSucceeded) => Connected,
            (Connecting, ConnectFailed { .. }) => Disconnected,
            // Any disconnect notification downs the link unconditionally.
            (Connecting | Connected, ConnectionLost) => Disconnected,
            (state, event) => return Err(StateError { state, event }),
        };

        if next != self.state {
            debug!(from = ?self.state, to = ?next, ?event, "link state transition");
            self.state = next;
            let _ = self.tx.send(next);
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_lifecycle() {
        let (mut sm, _rx) = LinkStateMachine::new();
        assert_eq!(sm.state(), LinkState::Disconnected);

        sm.apply(LinkEvent::ConnectStarted).unwrap();
        assert_eq!(sm.state(), LinkState::Connecting);

        sm.apply(LinkEvent::ConnectSucceeded).unwrap();
        assert_eq!(sm.state(), LinkState::Connected);

        sm.apply(LinkEvent::ConnectionLost).unwrap();
        assert_eq!(sm.state(), LinkState::Disconnected);
    }

    #[test]
    fn connect_failure_returns_to_disconnected() {
        let (mut sm, _rx) = LinkStateMachine::new();
        sm.apply(LinkEvent::ConnectStarted).unwrap();
        sm.apply(LinkEvent::ConnectFailed { code: 5 }).unwrap();
        assert_eq!(sm.state(), LinkState::Disconnected);
    }

    #[test]
    fn illegal_transitions_are_rejected_without_state_change() {
        let (mut sm, _rx) = LinkStateMachine::new();

        // Success without a preceding connect attempt.
        assert!(sm.apply(LinkEvent::ConnectSucceeded).is_err());
        assert_eq!(sm.state(), LinkState::Disconnected);

        // Duplicate connected notification.
        sm.apply(LinkEvent::ConnectStarted).unwrap();
        sm.apply(LinkEvent::ConnectSucceeded).unwrap();
        assert!(sm.apply(LinkEvent::ConnectSucceeded).is_err());
        assert_eq!(sm.state(), LinkState::Connected);

        // Disconnect while already disconnected.
        sm.apply(LinkEvent::ConnectionLost).unwrap();
        assert!(sm.apply(LinkEvent::ConnectionLost).is_err());
        assert_eq!(sm.state(), LinkState::Disconnected);
    }

    #[test]
    fn observers_see_transitions() {
        let (mut sm, rx) = LinkStateMachine::new();
        assert_eq!(*rx.borrow(), LinkState::Disconnected);
        sm.apply(LinkEvent::ConnectStarted).unwrap();
        sm.apply(LinkEvent::ConnectSucceeded).unwrap();
        assert_eq!(*rx.borrow(), LinkState::Connected);
    }
}
