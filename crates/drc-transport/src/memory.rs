//! In-process topic broker and the transports attached to it.
//!
//! `MemoryBroker` fans published payloads out to every endpoint subscribed to
//! the topic, which is enough pub/sub semantics to wire a device session to a
//! loopback gateway or to an integration test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{Endpoint, PubSubTransport, QosLevel, TransportError, TransportEvent};

/// Broker reason code used when a connection is refused.
const REFUSED_CODE: i32 = 5;

struct BrokerInner {
    /// topic -> subscriber event queues, keyed by the owning endpoint.
    subs: Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<TransportEvent>)>>>,
    /// When set, connect attempts are answered with `ConnectFailed`.
    refuse_connects: AtomicBool,
    /// Endpoint token allocator.
    next_token: AtomicU64,
}

/// Shared in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subs: Mutex::new(HashMap::new()),
                refuse_connects: AtomicBool::new(false),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a new endpoint to this broker.
    pub fn transport(&self) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        MemoryTransport {
            broker: self.inner.clone(),
            token: self.inner.next_token.fetch_add(1, Ordering::Relaxed),
            events_tx: Mutex::new(Some(tx)),
            events_rx: tokio::sync::Mutex::new(rx),
            connected: AtomicBool::new(false),
        }
    }

    /// Refuse (or stop refusing) subsequent connection attempts.
    pub fn refuse_connects(&self, refuse: bool) {
        self.inner.refuse_connects.store(refuse, Ordering::Relaxed);
    }

    /// Publish directly from the broker side, e.g. to simulate a peer
    /// without constructing a transport for it.
    pub fn publish(&self, topic: &str, payload: Bytes) {
        self.inner.fan_out(topic, payload);
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerInner {
    fn fan_out(&self, topic: &str, payload: Bytes) {
        let mut subs = self.subs.lock();
        if let Some(queues) = subs.get_mut(topic) {
            // Drop queues whose endpoint has gone away.
            queues.retain(|(_, q)| {
                q.send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
            });
        }
    }

    /// Remove every subscription owned by `token`. The broker keeps no
    /// session state across connections.
    fn unsubscribe_all(&self, token: u64) {
        let mut subs = self.subs.lock();
        for queues in subs.values_mut() {
            queues.retain(|(owner, _)| *owner != token);
        }
        subs.retain(|_, queues| !queues.is_empty());
    }
}

/// One endpoint attached to a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: Arc<BrokerInner>,
    token: u64,
    /// Taken on deliberate teardown, which closes the event stream.
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    connected: AtomicBool,
}

impl MemoryTransport {
    fn send_event(&self, event: TransportEvent) {
        if let Some(tx) = self.events_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Sever the connection from the broker side, as a network drop would.
    /// Subscriptions are forgotten but the event stream stays open, so the
    /// endpoint can observe the drop and reconnect.
    pub fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.broker.unsubscribe_all(self.token);
            self.send_event(TransportEvent::Disconnected);
        }
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        debug!(%endpoint, "memory transport connect");
        if self.events_tx.lock().is_none() {
            return Err(TransportError::Closed);
        }
        if self.broker.refuse_connects.load(Ordering::Relaxed) {
            self.send_event(TransportEvent::ConnectFailed { code: REFUSED_CODE });
            return Ok(());
        }
        self.connected.store(true, Ordering::Relaxed);
        self.send_event(TransportEvent::Connected);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QosLevel) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let Some(tx) = self.events_tx.lock().clone() else {
            return Err(TransportError::Closed);
        };
        self.broker
            .subs
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push((self.token, tx));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        _qos: QosLevel,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.broker.fan_out(topic, payload);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.drop_connection();
        // Deliberate teardown ends the event stream: `next_event` drains the
        // Disconnected notification and then reports `Closed`.
        self.events_tx.lock().take();
        Ok(())
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut rx = self.events_rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
