//! DRC Core - call correlation over a connectionless pub/sub transport.
//!
//! This crate implements:
//! - The outgoing-call registry (identifier allocation, pending bookkeeping,
//!   round-trip timing, timeout sweep)
//! - The inbound reply router (decode, classify, correlate, dispatch)
//! - The link state machine for the broker session
//! - The `Session` call façade tying the three together

#![forbid(unsafe_code)]

pub mod registry;
pub mod router;
pub mod state;
pub mod session;
pub mod errors;

pub use errors::*;
pub use registry::{CallId, CallRegistry, PendingCall};
pub use router::{
    CallFailure, CallOutcome, ReplyHandler, ReplyRouter, RequestHook, RouterStats,
    RouterStatsSnapshot,
};
pub use session::{DeviceIdentity, Session};
pub use state::{LinkEvent, LinkState, LinkStateMachine};
