//! Inbound reply router: decode, classify, correlate, dispatch.
//!
//! Malformed payloads and orphaned replies are dropped without reaching any
//! handler, but both are counted and logged; orphans are counted separately
//! from decode failures because they indicate a timeout-then-late-arrival or
//! a protocol desync rather than garbage on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use drc_wire::{classify, InboundFrame};

use crate::errors::RemoteError;
use crate::registry::{CallId, CallRegistry};

/// Successful resolution of a call.
#[derive(Clone, Debug)]
pub struct CallOutcome {
    pub id: CallId,
    pub method: String,
    pub result: Map<String, Value>,
    /// Elapsed time between call issuance and reply receipt.
    pub rtt: Duration,
}

/// Failed resolution of a call: peer-reported, or synthesized by the
/// timeout sweep.
#[derive(Clone, Debug)]
pub struct CallFailure {
    pub id: CallId,
    pub method: String,
    pub error: RemoteError,
    /// Elapsed time between issuance and failure.
    pub rtt: Duration,
}

/// Receives resolved calls. Implementations must not block the event loop.
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    async fn on_result(&self, outcome: CallOutcome);
    async fn on_error(&self, failure: CallFailure);
}

/// Hook for inbound call requests addressed to this device.
///
/// This system issues calls, it does not serve them; without a hook the
/// router just counts and logs the request.
#[async_trait]
pub trait RequestHook: Send + Sync {
    async fn on_request(&self, method: &str, params: &Map<String, Value>, id: Option<CallId>);
}

/// Routing statistics.
#[derive(Debug, Default)]
pub struct RouterStats {
    /// Total payloads received.
    pub received: AtomicU64,
    /// Result replies dispatched.
    pub results: AtomicU64,
    /// Error replies dispatched.
    pub errors: AtomicU64,
    /// Inbound requests seen.
    pub requests: AtomicU64,
    /// Payloads dropped as undecodable or schema-violating.
    pub malformed: AtomicU64,
    /// Replies dropped because no pending call matched their id.
    pub orphaned: AtomicU64,
}

impl RouterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            results: self.results.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub received: u64,
    pub results: u64,
    pub errors: u64,
    pub requests: u64,
    pub malformed: u64,
    pub orphaned: u64,
}

/// Demultiplexes inbound payloads back to their originating calls.
pub struct ReplyRouter {
    registry: Arc<Mutex<CallRegistry>>,
    handler: Arc<dyn ReplyHandler>,
    request_hook: Option<Arc<dyn RequestHook>>,
    stats: Arc<RouterStats>,
}

impl ReplyRouter {
    pub fn new(registry: Arc<Mutex<CallRegistry>>, handler: Arc<dyn ReplyHandler>) -> Self {
        Self {
            registry,
            handler,
            request_hook: None,
            stats: Arc::new(RouterStats::new()),
        }
    }

    pub fn with_request_hook(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.request_hook = Some(hook);
        self
    }

    pub fn stats(&self) -> &Arc<RouterStats> {
        &self.stats
    }

    /// Route one inbound payload received at `now`.
    ///
    /// Never fails: malformed input and correlation misses are counted and
    /// dropped, and must not disturb any pending call's state.
    pub async fn route(&self, payload: &[u8], now: Instant) {
        RouterStats::inc(&self.stats.received);

        let frame = match classify(payload) {
            Ok(frame) => frame,
            Err(err) => {
                RouterStats::inc(&self.stats.malformed);
                warn!(%err, len = payload.len(), "dropping malformed payload");
                return;
            }
        };

        match frame {
            InboundFrame::Result { id, result } => {
                let Some(call) = self.registry.lock().take(id) else {
                    self.note_orphan(id, "result");
                    return;
                };
                RouterStats::inc(&self.stats.results);
                let rtt = now.duration_since(call.issued_at);
                self.handler
                    .on_result(CallOutcome {
                        id,
                        method: call.method,
                        result,
                        rtt,
                    })
                    .await;
            }
            InboundFrame::Error { id, error } => {
                let Some(call) = self.registry.lock().take(id) else {
                    self.note_orphan(id, "error");
                    return;
                };
                RouterStats::inc(&self.stats.errors);
                let rtt = now.duration_since(call.issued_at);
                self.handler
                    .on_error(CallFailure {
                        id,
                        method: call.method,
                        error: RemoteError {
                            code: error.code,
                            message: error.message,
                        },
                        rtt,
                    })
                    .await;
            }
            InboundFrame::Request { method, params, id } => {
                RouterStats::inc(&self.stats.requests);
                match &self.request_hook {
                    Some(hook) => hook.on_request(&method, &params, id).await,
                    None => debug!(%method, "ignoring inbound request; no hook installed"),
                }
            }
        }
    }

    fn note_orphan(&self, id: CallId, kind: &str) {
        RouterStats::inc(&self.stats.orphaned);
        warn!(id, kind, "reply for unknown or already-resolved call");
    }
}
