//! Wire format for the DRC device/gateway call protocol.
//!
//! Everything that crosses the broker is a small JSON object. This crate owns
//! the envelope types, the strict classification of inbound payloads, and the
//! topic naming scheme. It has no opinion about transports or sessions.

#![forbid(unsafe_code)]

pub mod envelope;
pub mod topics;

pub use envelope::*;
pub use topics::*;

/// Protocol version carried in the `v` field of every call envelope.
pub const PROTOCOL_VERSION: u32 = 1;
