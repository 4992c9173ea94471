//! Message-bus abstraction.
//!
//! The sink talks to the broker exclusively through the [`Bus`] trait: connect
//! (doubling as reconnect), publish, disconnect, a connection-state probe, and
//! a queue of asynchronous connection notifications. [`MqttBus`] is the
//! production implementation backed by rumqttc; [`ScriptedBus`] is an
//! in-memory implementation for exercising the sink without a broker.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod mqtt;

pub use mock::ScriptedBus;
pub use mqtt::MqttBus;

/// Reasons the broker rejects a session for good.
///
/// These terminate the daemon instead of being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// The broker speaks an incompatible protocol revision.
    ProtocolMismatch,
    /// The broker rejected the configured credentials.
    BadCredentials,
    /// The credentials were accepted but the client is not authorized.
    NotAuthorized,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FatalReason::ProtocolMismatch => "incorrect protocol version",
            FatalReason::BadCredentials => "bad user name or password",
            FatalReason::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

/// Connection errors, split by how the sink must react.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Network-level failure (timeout, refused, reset). Retried with backoff.
    #[error("Connection failed: {0}")]
    Transient(String),

    /// The broker refused the session. Never retried.
    #[error("Unrecoverable connection error: {0}")]
    Fatal(FatalReason),
}

/// Publish failures, split by how the sink must react.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The payload cannot be sent as-is. Logged and dropped.
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// The transport rejected the message. May trigger a reconnect.
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Why an established connection ended.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// This side asked for the disconnect.
    Requested,
    /// The transport dropped underneath us; reconnect while running.
    Lost(String),
    /// The broker revoked the session; do not reconnect.
    Fatal(FatalReason),
}

/// Asynchronous notification from the bus client's background I/O.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// The broker acknowledged a connection.
    Connected,
    /// An established connection ended.
    Disconnected(DisconnectReason),
}

/// Capability surface of the message-bus client library.
///
/// Implementations own the wire protocol and background I/O; the sink owns
/// the retry policy and never reaches past this trait.
#[async_trait]
pub trait Bus: Send {
    /// Establish the broker connection, waiting until the broker acknowledges
    /// it or the attempt fails.
    ///
    /// Safe to call in any state: an existing connection is torn down and
    /// replaced, so callers never need to distinguish connect from reconnect.
    async fn connect(&mut self) -> Result<(), BusError>;

    /// Publish one payload, waiting until the client has accepted it for
    /// delivery. Messages published in sequence reach the wire in sequence.
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError>;

    /// Ask the broker for a clean disconnect and stop the background I/O.
    async fn disconnect(&mut self);

    /// Whether the background I/O currently holds an acknowledged connection.
    fn is_connected(&self) -> bool;

    /// Drain the next pending connection notification, if any.
    fn poll_event(&mut self) -> Option<BusEvent>;
}
