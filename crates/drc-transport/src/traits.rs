//! Transport capability surface consumed by the session core.

use async_trait::async_trait;
use bytes::Bytes;

/// Broker endpoint (address and port).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Delivery guarantee requested for a subscribe or publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Asynchronous notifications delivered by the transport.
///
/// Connect success/failure arrives here, not as the return value of
/// [`PubSubTransport::connect`]; the network loop is the only producer.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Connection to the broker established.
    Connected,
    /// Connection attempt refused; `code` is the broker reason code.
    ConnectFailed { code: i32 },
    /// Connection lost, deliberately or not.
    Disconnected,
    /// Inbound message on a subscribed topic.
    Message { topic: String, payload: Bytes },
}

/// Common transport error type.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,

    #[error("event stream closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Other(String),
}

/// A connection to a publish/subscribe broker.
///
/// All methods are non-blocking in the protocol sense: `connect` only
/// initiates the attempt, `publish` is fire-and-forget, and the outcome of
/// either surfaces on [`next_event`](Self::next_event).
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Initiate a connection to `endpoint`. The success or failure
    /// notification arrives as a [`TransportEvent`].
    async fn connect(&self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Subscribe to `topic` with the requested delivery guarantee.
    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), TransportError>;

    /// Publish `payload` to `topic` with the requested delivery guarantee.
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
    ) -> Result<(), TransportError>;

    /// Tear the connection down. A [`TransportEvent::Disconnected`] follows.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Wait for the next transport event.
    async fn next_event(&self) -> Result<TransportEvent, TransportError>;

    /// Whether the transport currently holds a broker connection.
    fn is_connected(&self) -> bool;
}
