//! Call and reply envelopes plus strict inbound classification.
//!
//! The gateway speaks a JSON-RPC-like dialect: calls carry `method`/`params`/
//! `id`, replies carry `id` plus exactly one of `result` or `error`. A payload
//! carrying both (or neither) is malformed and is rejected here rather than
//! resolved by field-check order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::PROTOCOL_VERSION;

/// Errors produced while decoding or classifying an inbound payload.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reply carries both result and error")]
    AmbiguousReply,

    #[error("reply is missing the id field")]
    MissingId,

    #[error("payload is neither a reply nor a request")]
    Unclassifiable,
}

/// Outgoing call envelope.
///
/// Field names and order match the gateway firmware exactly; do not rename.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Protocol version, currently 1.
    pub v: u32,
    /// Sender identity.
    pub device_id: String,
    /// Per-session nonce, 0 if unused.
    pub nonce: u64,
    /// Method name.
    pub method: String,
    /// Open key-value parameter map.
    pub params: Map<String, Value>,
    /// Call identifier, unique among pending calls for this session.
    pub id: u64,
}

impl CallEnvelope {
    /// Build a v1 envelope for `method` with the given parameters.
    pub fn new(
        device_id: impl Into<String>,
        method: impl Into<String>,
        params: Map<String, Value>,
        id: u64,
    ) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            device_id: device_id.into(),
            nonce: 0,
            method: method.into(),
            params,
            id,
        }
    }

    /// Serialize to the compact JSON bytes the gateway expects.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Error body of an error reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

/// A classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// Successful reply to one of our calls.
    Result {
        id: u64,
        result: Map<String, Value>,
    },
    /// Peer-reported failure of one of our calls.
    Error { id: u64, error: ErrorBody },
    /// A call addressed to us (we issue calls, we do not serve them).
    Request {
        method: String,
        params: Map<String, Value>,
        id: Option<u64>,
    },
}

/// Raw shape used only for classification; extra fields are ignored.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Map<String, Value>>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
}

/// Decode and classify an inbound payload.
///
/// Classification is mutually exclusive: a frame with both `result` and
/// `error` is rejected, and a frame with neither is a request only if it
/// carries `method`.
pub fn classify(payload: &[u8]) -> Result<InboundFrame, WireError> {
    let raw: RawFrame = serde_json::from_slice(payload)?;

    match (raw.result, raw.error) {
        (Some(_), Some(_)) => Err(WireError::AmbiguousReply),
        (Some(result), None) => {
            let id = raw.id.ok_or(WireError::MissingId)?;
            Ok(InboundFrame::Result { id, result })
        }
        (None, Some(error)) => {
            let id = raw.id.ok_or(WireError::MissingId)?;
            Ok(InboundFrame::Error { id, error })
        }
        (None, None) => match raw.method {
            Some(method) => Ok(InboundFrame::Request {
                method,
                params: raw.params.unwrap_or_default(),
                id: raw.id,
            }),
            None => Err(WireError::Unclassifiable),
        },
    }
}
