//! Publish/subscribe transport abstraction for the DRC system.
//!
//! The core never talks to a broker directly; it consumes the
//! [`PubSubTransport`] capability and reacts to [`TransportEvent`]s. This
//! crate provides the trait plus two in-process implementations: a topic
//! broker for wiring several endpoints together (tests, loopback gateway)
//! and a scripted mock with fault injection.

#![forbid(unsafe_code)]

pub mod traits;
pub mod memory;
pub mod testing;

pub use traits::*;
pub use memory::*;
pub use testing::*;
