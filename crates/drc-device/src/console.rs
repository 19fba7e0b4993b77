//! Console output for resolved calls, in the operator-facing format the
//! original field tool used.

use async_trait::async_trait;
use chrono::Local;

use drc_core::{CallFailure, CallOutcome, RemoteError, ReplyHandler};

pub struct ConsoleHandler {
    device_id: String,
}

impl ConsoleHandler {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    fn log(&self, msg: &str) {
        let ts = Local::now().format("%H:%M:%S");
        println!("[{ts}] [{}] {msg}", self.device_id);
    }
}

#[async_trait]
impl ReplyHandler for ConsoleHandler {
    async fn on_result(&self, outcome: CallOutcome) {
        let rtt_ms = outcome.rtt.as_secs_f64() * 1000.0;
        if outcome.method == "ping" {
            let uptime_s = outcome
                .result
                .get("uptime_ms")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
                / 1000.0;
            self.log(&format!(
                "  Pong! Gateway uptime: {uptime_s:.0}s (RTT {rtt_ms:.0}ms)"
            ));
        } else {
            let body = serde_json::Value::Object(outcome.result).to_string();
            self.log(&format!("  [RESULT] {}: {}", outcome.method, body));
        }
    }

    async fn on_error(&self, failure: CallFailure) {
        if failure.error.code == RemoteError::TIMEOUT_CODE {
            self.log(&format!(
                "  TIMEOUT [{}] no reply after {:.0}s",
                failure.method,
                failure.rtt.as_secs_f64()
            ));
        } else {
            self.log(&format!(
                "  ERROR [{}] code={}: {}",
                failure.method, failure.error.code, failure.error.message
            ));
        }
    }
}
