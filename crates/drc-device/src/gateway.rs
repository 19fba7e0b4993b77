//! In-process loopback gateway.
//!
//! Serves `ping` over the in-memory broker so the simulator is usable
//! without network access. Anything else is answered with the JSON-RPC
//! "method not found" code, which is also what the real gateway does.

use bytes::Bytes;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use drc_transport::{Endpoint, MemoryBroker, PubSubTransport, QosLevel, TransportEvent};
use drc_wire::{device_reply_topic, CallEnvelope, GATEWAY_INGRESS};

const METHOD_NOT_FOUND: i64 = -32601;

/// Spawn the gateway task. It subscribes to the shared ingress topic and
/// replies on each caller's private topic.
pub async fn spawn(broker: &MemoryBroker) -> anyhow::Result<JoinHandle<()>> {
    let transport = broker.transport();
    transport.connect(&Endpoint::new("loopback", 0)).await?;
    // Consume our own Connected notification before serving.
    let _ = transport.next_event().await?;
    transport
        .subscribe(GATEWAY_INGRESS, QosLevel::AtLeastOnce)
        .await?;

    let started = Instant::now();
    Ok(tokio::spawn(async move {
        loop {
            let event = match transport.next_event().await {
                Ok(event) => event,
                Err(_) => return,
            };
            let TransportEvent::Message { payload, .. } = event else {
                continue;
            };
            let call: CallEnvelope = match serde_json::from_slice(&payload) {
                Ok(call) => call,
                Err(err) => {
                    warn!(%err, "gateway dropping malformed call");
                    continue;
                }
            };
            debug!(method = %call.method, id = call.id, "gateway serving call");

            let reply = match call.method.as_str() {
                "ping" => json!({
                    "id": call.id,
                    "result": { "uptime_ms": started.elapsed().as_millis() as u64 },
                }),
                other => json!({
                    "id": call.id,
                    "error": { "code": METHOD_NOT_FOUND, "message": format!("unknown method: {other}") },
                }),
            };

            let topic = device_reply_topic(&call.device_id);
            if let Err(err) = transport
                .publish(&topic, Bytes::from(reply.to_string()), QosLevel::AtLeastOnce)
                .await
            {
                warn!(%err, "gateway reply publish failed");
            }
        }
    }))
}
