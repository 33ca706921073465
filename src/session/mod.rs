//! # Broker Session Module
//!
//! Owns the MQTT session layered on top of the transport link: handshake,
//! subscription, outbound publishes and cooperative inbound delivery.
//!
//! ## Module Architecture
//!
//! ```text
//! session/
//! ├── message.rs  - Inbound message representation
//! └── broker.rs   - rumqttc-backed session state machine
//! ```
//!
//! ## Delivery Model
//!
//! There is no listener task. The session only makes progress while one of
//! its operations drives the underlying event loop: `connect` runs it up to
//! the handshake, `publish` runs it until the packet is written, and `poll`
//! runs it for a bounded idle window once per control-loop tick. Inbound
//! publishes observed while another operation is in flight are buffered and
//! handed out by the next `poll`, so message processing stays strictly
//! serialized with the tick sequence.
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Active
//!       ▲                           │
//!       └──── link loss (seen during publish/poll) ────┘
//! ```
//!
//! Loss is detected reactively; there is no timeout state. An Active session
//! implies the transport link was connected when the handshake completed.

pub mod broker;
pub mod message;

pub use broker::MqttSession;
pub use message::InboundMessage;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Active,
}

// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session is not active")]
    NotActive,

    #[error("Broker refused the session: {0}")]
    HandshakeRefused(String),

    #[error("Request could not be queued: {0}")]
    RequestError(#[from] rumqttc::ClientError),

    #[error("Connection lost: {0}")]
    ConnectionLost(#[from] rumqttc::ConnectionError),
}

/// Broker session seam consumed by the control loop.
///
/// A successful `connect` always leaves the session subscribed to the
/// inbound topic, whichever path requested it; announcement publishes are
/// the caller's concern because they differ per path.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// Broker handshake plus inbound-topic subscription. `credentials` is
    /// `Some` only on the initial connect; the recovery paths connect with
    /// the client id alone.
    async fn connect(&mut self, credentials: Option<(&str, &str)>) -> Result<(), SessionError>;

    /// At-most-once publish. Fails without side effects when the session is
    /// not active.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;

    /// Drives keepalive and inbound delivery for one tick; returns the
    /// messages drained during the bounded window.
    async fn poll(&mut self) -> Result<Vec<InboundMessage>, SessionError>;

    fn is_active(&self) -> bool;
}
