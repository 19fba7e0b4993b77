//! Topic naming shared with the gateway firmware.

/// Ingress topic the gateway listens on; all device calls publish here.
pub const GATEWAY_INGRESS: &str = "jrpc/gateway/rx";

/// Private reply topic for a device, derived deterministically from its id.
pub fn device_reply_topic(device_id: &str) -> String {
    format!("jrpc/devices/{device_id}/rx")
}
