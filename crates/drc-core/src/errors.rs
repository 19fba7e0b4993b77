//! Error types for the DRC core.
//!
//! The taxonomy follows the failure modes of the correlation layer: transport
//! conditions surface as state transitions, decode failures and orphans are
//! counted and dropped inside the router, and peer-reported errors reach the
//! caller as [`RemoteError`] values. Only `CallError` is returned to callers.

use thiserror::Error;

use drc_transport::TransportError;
use drc_wire::WireError;

/// Failure of the peer, reported in an `error` reply. Not a local fault.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

impl RemoteError {
    /// Synthetic error delivered when a pending call is evicted by the
    /// timeout sweep without ever receiving a reply.
    pub const TIMEOUT_CODE: i64 = -32001;

    pub fn timeout() -> Self {
        Self {
            code: Self::TIMEOUT_CODE,
            message: "call timed out".into(),
        }
    }
}

/// Errors returned by the call façade.
#[derive(Debug, Error)]
pub enum CallError {
    /// The session is not connected; the publish would be silently dropped.
    #[error("not connected to the gateway")]
    NotConnected,

    /// The envelope could not be serialized.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The transport refused the publish.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A connect was attempted from a state that does not allow it.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Illegal link state transition.
#[derive(Debug, Error)]
#[error("illegal transition {event:?} in state {state:?}")]
pub struct StateError {
    pub state: crate::state::LinkState,
    pub event: crate::state::LinkEvent,
}
