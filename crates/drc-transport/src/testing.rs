//! Testing utilities for transport consumers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::sleep;

use crate::traits::{Endpoint, PubSubTransport, QosLevel, TransportError, TransportEvent};

/// Scripted transport for unit tests.
///
/// Events are injected by the test and handed back from `next_event`;
/// published payloads are recorded for inspection. Optional latency and
/// packet loss emulate a lossy broker link.
pub struct MockTransport {
    published: Mutex<Vec<(String, Bytes)>>,
    subscribed: Mutex<Vec<(String, QosLevel)>>,
    events: Mutex<VecDeque<TransportEvent>>,
    connected: AtomicBool,
    refuse_connects: AtomicBool,
    latency: Duration,
    packet_loss: f64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
            refuse_connects: AtomicBool::new(false),
            latency: Duration::ZERO,
            packet_loss: 0.0,
        }
    }

    /// Make subsequent `connect` calls fail before the attempt starts.
    pub fn refuse_connects(&self, refuse: bool) {
        self.refuse_connects.store(refuse, Ordering::Relaxed);
    }

    /// Configure simulated publish latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Configure simulated packet loss (0.0 - 1.0).
    pub fn with_packet_loss(mut self, loss: f64) -> Self {
        self.packet_loss = loss.clamp(0.0, 1.0);
        self
    }

    /// Queue an event for the consumer.
    pub fn inject_event(&self, event: TransportEvent) {
        if matches!(event, TransportEvent::Connected) {
            self.connected.store(true, Ordering::Relaxed);
        }
        if matches!(event, TransportEvent::Disconnected) {
            self.connected.store(false, Ordering::Relaxed);
        }
        self.events.lock().push_back(event);
    }

    /// Queue an inbound message event.
    pub fn inject_message(&self, topic: &str, payload: impl Into<Bytes>) {
        self.inject_event(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }

    /// Payloads published so far.
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().clone()
    }

    /// Topics subscribed so far.
    pub fn subscriptions(&self) -> Vec<(String, QosLevel)> {
        self.subscribed.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for MockTransport {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<(), TransportError> {
        if self.refuse_connects.load(Ordering::Relaxed) {
            return Err(TransportError::Other("connect refused".into()));
        }
        // Outcome is whatever the test injects (Connected / ConnectFailed).
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), TransportError> {
        self.subscribed.lock().push((topic.to_string(), qos));
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
        let dropped = {
            let mut rng = rand::thread_rng();
            rng.gen::<f64>() < self.packet_loss
        };
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        if dropped {
            return Ok(()); // lost on the wire, not an error
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inject_event(TransportEvent::Disconnected);
        Ok(())
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        loop {
            if let Some(event) = self.events.lock().pop_front() {
                return Ok(event);
            }
            sleep(Duration::from_millis(1)).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
