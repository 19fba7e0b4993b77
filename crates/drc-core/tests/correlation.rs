//! End-to-end correlation tests over the in-memory broker: a device session
//! on one endpoint, a hand-driven gateway on the other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use drc_core::{
    CallFailure, CallOutcome, DeviceIdentity, LinkState, ReplyHandler, Session,
};
use drc_transport::{Endpoint, MemoryBroker, PubSubTransport, QosLevel, TransportEvent};
use drc_wire::{device_reply_topic, GATEWAY_INGRESS};

#[derive(Default)]
struct Recording {
    results: Mutex<Vec<CallOutcome>>,
    errors: Mutex<Vec<CallFailure>>,
}

#[async_trait]
impl ReplyHandler for Recording {
    async fn on_result(&self, outcome: CallOutcome) {
        self.results.lock().push(outcome);
    }
    async fn on_error(&self, failure: CallFailure) {
        self.errors.lock().push(failure);
    }
}

struct Harness {
    broker: MemoryBroker,
    session: Session,
    device_side: Arc<drc_transport::MemoryTransport>,
    gateway_side: Arc<drc_transport::MemoryTransport>,
    handler: Arc<Recording>,
}

impl Harness {
    fn new() -> Self {
        let broker = MemoryBroker::new();
        let device_side = Arc::new(broker.transport());
        let gateway_side = Arc::new(broker.transport());
        let handler = Arc::new(Recording::default());
        let session = Session::new(
            DeviceIdentity {
                device_id: "device_01".into(),
                name: "Test ping device 01".into(),
                device_type: "TestDevice".into(),
            },
            Endpoint::new("broker.local", 1883),
            device_side.clone(),
            handler.clone(),
        );
        Self {
            broker,
            session,
            device_side,
            gateway_side,
            handler,
        }
    }

    /// Connect both endpoints and bring the session to `Connected`.
    async fn bring_up(&self) {
        self.gateway_side
            .connect(&Endpoint::new("broker.local", 1883))
            .await
            .unwrap();
        let _ = self.gateway_side.next_event().await.unwrap();
        self.gateway_side
            .subscribe(GATEWAY_INGRESS, QosLevel::AtLeastOnce)
            .await
            .unwrap();

        self.session.connect().await.unwrap();
        let event = self.device_side.next_event().await.unwrap();
        self.session.handle_event(event).await;
        assert_eq!(self.session.state(), LinkState::Connected);
    }

    /// Pump one inbound event through the session.
    async fn step_device(&self) {
        let event = self.device_side.next_event().await.unwrap();
        self.session.handle_event(event).await;
    }

    /// Receive the next call the gateway saw, decoded.
    async fn gateway_recv(&self) -> Value {
        match self.gateway_side.next_event().await.unwrap() {
            TransportEvent::Message { payload, .. } => serde_json::from_slice(&payload).unwrap(),
            other => panic!("gateway expected message, got {other:?}"),
        }
    }

    /// Publish a reply to the device's private topic.
    fn gateway_reply(&self, body: Value) {
        self.broker.publish(
            &device_reply_topic("device_01"),
            Bytes::from(body.to_string()),
        );
    }
}

#[tokio::test(start_paused = true)]
async fn ping_round_trip_dispatches_result_with_rtt() {
    let h = Harness::new();
    h.bring_up().await;

    let id = h.session.call("ping", Map::new()).await.unwrap();

    // The gateway sees a well-formed envelope.
    let call = h.gateway_recv().await;
    assert_eq!(call["v"], 1);
    assert_eq!(call["method"], "ping");
    assert_eq!(call["id"], id);
    assert_eq!(call["device_id"], "device_01");

    // Reply lands 120ms later.
    tokio::time::advance(Duration::from_millis(120)).await;
    h.gateway_reply(json!({"id": id, "result": {"uptime_ms": 5000}}));
    h.step_device().await;

    let results = h.handler.results.lock();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].method, "ping");
    assert_eq!(results[0].result["uptime_ms"].as_u64(), Some(5000));
    assert_eq!(results[0].rtt, Duration::from_millis(120));
    assert_eq!(h.session.pending_calls(), 0);
}

#[tokio::test]
async fn error_reply_carries_code_message_and_method() {
    let h = Harness::new();
    h.bring_up().await;

    let id = h.session.call("foo", Map::new()).await.unwrap();
    let _ = h.gateway_recv().await;

    h.gateway_reply(json!({"id": id, "error": {"code": 404, "message": "unknown"}}));
    h.step_device().await;

    let errors = h.handler.errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].method, "foo");
    assert_eq!(errors[0].error.code, 404);
    assert_eq!(errors[0].error.message, "unknown");
    assert!(h.handler.results.lock().is_empty());
}

#[tokio::test]
async fn out_of_order_replies_correlate_by_id_not_arrival() {
    let h = Harness::new();
    h.bring_up().await;

    let first = h.session.call("ping", Map::new()).await.unwrap();
    let second = h.session.call("status", Map::new()).await.unwrap();
    let _ = h.gateway_recv().await;
    let _ = h.gateway_recv().await;

    // Replies arrive in reverse order.
    h.gateway_reply(json!({"id": second, "result": {"ok": true}}));
    h.gateway_reply(json!({"id": first, "result": {"uptime_ms": 1}}));
    h.step_device().await;
    h.step_device().await;

    let results = h.handler.results.lock();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, second);
    assert_eq!(results[0].method, "status");
    assert_eq!(results[1].id, first);
    assert_eq!(results[1].method, "ping");
}

#[tokio::test]
async fn stale_and_unknown_replies_dispatch_nothing() {
    let h = Harness::new();
    h.bring_up().await;

    // Never-issued id.
    h.gateway_reply(json!({"id": 7777, "result": {}}));
    h.step_device().await;

    // Already-resolved id.
    let id = h.session.call("ping", Map::new()).await.unwrap();
    let _ = h.gateway_recv().await;
    h.gateway_reply(json!({"id": id, "result": {}}));
    h.gateway_reply(json!({"id": id, "result": {}}));
    h.step_device().await;
    h.step_device().await;

    assert_eq!(h.handler.results.lock().len(), 1);
    assert!(h.handler.errors.lock().is_empty());
    let stats = h.session.stats();
    assert_eq!(stats.orphaned, 2);
}

#[tokio::test]
async fn malformed_payloads_do_not_disturb_pending_calls() {
    let h = Harness::new();
    h.bring_up().await;

    let id = h.session.call("ping", Map::new()).await.unwrap();
    let _ = h.gateway_recv().await;

    h.broker.publish(
        &device_reply_topic("device_01"),
        Bytes::from_static(b"\xff\xfe not json"),
    );
    h.gateway_reply(json!({"id": id})); // reply with neither result nor error
    h.step_device().await;
    h.step_device().await;

    assert_eq!(h.session.pending_calls(), 1);
    assert_eq!(h.session.stats().malformed, 2);

    // The pending call is still resolvable afterwards.
    h.gateway_reply(json!({"id": id, "result": {}}));
    h.step_device().await;
    assert_eq!(h.handler.results.lock().len(), 1);
}

#[tokio::test]
async fn drive_returns_once_the_session_disconnects() {
    let broker = MemoryBroker::new();
    let handler = Arc::new(Recording::default());
    let session = Arc::new(Session::new(
        DeviceIdentity {
            device_id: "device_01".into(),
            name: "Test ping device 01".into(),
            device_type: "TestDevice".into(),
        },
        Endpoint::new("broker.local", 1883),
        Arc::new(broker.transport()),
        handler,
    ));

    session.connect().await.unwrap();
    let driver = {
        let session = session.clone();
        tokio::spawn(async move { session.drive().await })
    };

    let mut state = session.watch_state();
    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s == LinkState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    session.disconnect().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), driver)
        .await
        .expect("event loop must terminate after disconnect")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(session.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn refused_connect_stays_disconnected_without_retry() {
    let h = Harness::new();
    h.broker.refuse_connects(true);

    h.session.connect().await.unwrap();
    let event = h.device_side.next_event().await.unwrap();
    h.session.handle_event(event).await;

    assert_eq!(h.session.state(), LinkState::Disconnected);
    assert!(h
        .session
        .call("ping", Map::new())
        .await
        .is_err());
}
