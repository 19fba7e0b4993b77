//! Session façade: the public surface a caller uses to issue calls.
//!
//! A `Session` exclusively owns the call registry and the transport handle
//! for one device identity. The network event loop (`drive`) and the call
//! façade (`call`) run on different tasks and share the registry through a
//! mutex that is never held across an await point.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use drc_transport::{Endpoint, PubSubTransport, QosLevel, TransportError, TransportEvent};
use drc_wire::{device_reply_topic, CallEnvelope, GATEWAY_INGRESS};

use crate::errors::{CallError, RemoteError};
use crate::registry::{CallId, CallRegistry};
use crate::router::{CallFailure, ReplyHandler, ReplyRouter, RequestHook, RouterStatsSnapshot};
use crate::state::{LinkEvent, LinkState, LinkStateMachine};

/// Default bound on how long a call may stay pending before the sweep
/// reports it as timed out.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport identity of this session.
#[derive(Clone, Debug)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
}

/// One broker session for one device identity.
pub struct Session {
    identity: DeviceIdentity,
    endpoint: Endpoint,
    transport: Arc<dyn PubSubTransport>,
    registry: Arc<Mutex<CallRegistry>>,
    router: ReplyRouter,
    machine: Mutex<LinkStateMachine>,
    state_rx: watch::Receiver<LinkState>,
    handler: Arc<dyn ReplyHandler>,
    reply_topic: String,
    call_timeout: Duration,
}

impl Session {
    pub fn new(
        identity: DeviceIdentity,
        endpoint: Endpoint,
        transport: Arc<dyn PubSubTransport>,
        handler: Arc<dyn ReplyHandler>,
    ) -> Self {
        let registry = Arc::new(Mutex::new(CallRegistry::new()));
        let router = ReplyRouter::new(registry.clone(), handler.clone());
        let (machine, state_rx) = LinkStateMachine::new();
        let reply_topic = device_reply_topic(&identity.device_id);
        Self {
            identity,
            endpoint,
            transport,
            registry,
            router,
            machine: Mutex::new(machine),
            state_rx,
            handler,
            reply_topic,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the pending-call eviction deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Install a hook for inbound requests addressed to this device.
    pub fn with_request_hook(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.router = self.router.with_request_hook(hook);
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> LinkState {
        self.machine.lock().state()
    }

    /// Observe state transitions without blocking the machine.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.router.stats().snapshot()
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.registry.lock().pending_len()
    }

    /// Initiate the broker connection. The outcome arrives on the event
    /// stream; `Connected` is only entered once the reply subscription is up.
    pub async fn connect(&self) -> Result<(), CallError> {
        self.machine.lock().apply(LinkEvent::ConnectStarted)?;
        info!(endpoint = %self.endpoint, "connecting");
        if let Err(err) = self.transport.connect(&self.endpoint).await {
            // The attempt never started, so no notification will arrive to
            // move the machine off `Connecting`. Roll it back here.
            self.apply(LinkEvent::ConnectFailed { code: -1 });
            return Err(err.into());
        }
        Ok(())
    }

    /// Tear the session down.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.transport.disconnect().await
    }

    /// Issue a named call with parameters; returns the allocated identifier
    /// immediately. Resolution arrives asynchronously through the
    /// [`ReplyHandler`]. Rejected while not connected: the transport would
    /// silently drop the publish.
    pub async fn call(
        &self,
        method: &str,
        mut params: Map<String, Value>,
    ) -> Result<CallId, CallError> {
        if self.state() != LinkState::Connected {
            return Err(CallError::NotConnected);
        }

        // Callers are identified to the gateway inside params as well.
        params.insert(
            "device_id".into(),
            Value::String(self.identity.device_id.clone()),
        );

        let id = {
            let mut reg = self.registry.lock();
            let id = reg.allocate_id();
            reg.register(id, method, Instant::now());
            id
        };

        let envelope = CallEnvelope::new(self.identity.device_id.clone(), method, params, id);
        let payload = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                self.registry.lock().take(id);
                return Err(err.into());
            }
        };

        debug!(id, %method, "publishing call");
        if let Err(err) = self
            .transport
            .publish(GATEWAY_INGRESS, Bytes::from(payload), QosLevel::AtLeastOnce)
            .await
        {
            // The call never left; don't leave a record to rot.
            self.registry.lock().take(id);
            return Err(err.into());
        }
        Ok(id)
    }

    /// Feed one transport notification through the state machine and router.
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                match self
                    .transport
                    .subscribe(&self.reply_topic, QosLevel::AtLeastOnce)
                    .await
                {
                    Ok(()) => {
                        info!(topic = %self.reply_topic, "connected, reply subscription active");
                        self.apply(LinkEvent::ConnectSucceeded);
                    }
                    Err(err) => {
                        warn!(%err, "reply subscription failed, abandoning connection");
                        self.apply(LinkEvent::ConnectFailed { code: -1 });
                        let _ = self.transport.disconnect().await;
                    }
                }
            }
            TransportEvent::ConnectFailed { code } => {
                warn!(code, "connect failed");
                self.apply(LinkEvent::ConnectFailed { code });
            }
            TransportEvent::Disconnected => {
                info!("disconnected");
                self.apply(LinkEvent::ConnectionLost);
            }
            TransportEvent::Message { topic, payload } => {
                if topic == self.reply_topic {
                    self.router.route(&payload, Instant::now()).await;
                } else {
                    debug!(%topic, "ignoring message on unexpected topic");
                }
            }
        }
    }

    /// Consume transport events until the stream closes.
    pub async fn drive(&self) -> Result<(), TransportError> {
        loop {
            match self.transport.next_event().await {
                Ok(event) => self.handle_event(event).await,
                Err(TransportError::Closed) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Evict pending calls older than the configured timeout and report each
    /// one to the error handler as a synthetic timeout failure.
    pub async fn sweep(&self) {
        let expired = self
            .registry
            .lock()
            .sweep_expired(Instant::now(), self.call_timeout);
        for (id, call) in expired {
            warn!(id, method = %call.method, "evicting timed-out call");
            self.handler
                .on_error(CallFailure {
                    id,
                    method: call.method,
                    error: RemoteError::timeout(),
                    rtt: Instant::now().duration_since(call.issued_at),
                })
                .await;
        }
    }

    fn apply(&self, event: LinkEvent) {
        if let Err(err) = self.machine.lock().apply(event) {
            warn!(%err, "ignoring transport notification");
        }
    }
}
