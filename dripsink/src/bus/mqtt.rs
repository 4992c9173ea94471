//! rumqttc-backed implementation of the [`Bus`] trait.
//!
//! rumqttc splits the client into a command handle ([`AsyncClient`]) and an
//! event loop that must be polled to make progress. [`MqttBus`] runs the event
//! loop in a background task; the task reports the connect handshake through a
//! oneshot and every later connection change through an event channel the sink
//! drains from its own loop. The bus never reconnects on its own — retry
//! policy belongs to the sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use dripsink_common::MqttConfig;

use super::{Bus, BusError, BusEvent, DisconnectReason, FatalReason, PublishError};

/// Capacity of the client's outgoing request queue.
const REQUEST_QUEUE: usize = 16;

/// MQTT bus client.
pub struct MqttBus {
    config: MqttConfig,
    client: Option<AsyncClient>,
    driver: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<BusEvent>,
    events_rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl MqttBus {
    /// Create a bus client for the given broker settings. No network activity
    /// happens until [`Bus::connect`] is called.
    pub fn new(config: MqttConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            client: None,
            driver: None,
            connected: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.name.clone(),
            self.config.hostname.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keepalive_secs));
        if let Some(username) = &self.config.username {
            options.set_credentials(
                username.as_str(),
                self.config.password.as_deref().unwrap_or(""),
            );
        }
        options
    }

    /// Stop the background task and forget the current session.
    fn teardown(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.client = None;
        self.connected.store(false, Ordering::SeqCst);
        // Notifications from the torn-down session are stale.
        while self.events_rx.try_recv().is_ok() {}
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn connect(&mut self) -> Result<(), BusError> {
        self.teardown();

        let (client, event_loop) = AsyncClient::new(self.options(), REQUEST_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            event_loop,
            self.connected.clone(),
            self.events_tx.clone(),
            ready_tx,
        ));

        self.client = Some(client);
        self.driver = Some(driver);

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.teardown();
                Err(err)
            }
            Err(_) => {
                self.teardown();
                Err(BusError::Transient(
                    "connection task ended before the handshake".to_string(),
                ))
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| PublishError::Transport("no active session".to_string()))?;

        client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                tracing::debug!(error = %e, "Disconnect request failed");
            }
        }
        self.teardown();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn poll_event(&mut self) -> Option<BusEvent> {
        self.events_rx.try_recv().ok()
    }
}

/// Poll the event loop until the session ends.
///
/// The handshake outcome goes through `ready`; every later connection change
/// goes through `events`. The task exits on the first terminal condition — the
/// sink decides whether to start a fresh session.
async fn drive(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<BusEvent>,
    ready: oneshot::Sender<Result<(), BusError>>,
) {
    let mut ready = Some(ready);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(()));
                    }
                    None => {
                        let _ = events.send(BusEvent::Connected);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                let _ = events.send(BusEvent::Disconnected(DisconnectReason::Lost(
                    "server closed the session".to_string(),
                )));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                connected.store(false, Ordering::SeqCst);
                let err = classify_error(err);
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(err));
                    }
                    None => {
                        let reason = match err {
                            BusError::Fatal(reason) => DisconnectReason::Fatal(reason),
                            BusError::Transient(message) => DisconnectReason::Lost(message),
                        };
                        let _ = events.send(BusEvent::Disconnected(reason));
                    }
                }
                break;
            }
        }
    }
}

/// Map an event-loop failure onto the retry taxonomy.
fn classify_error(err: ConnectionError) -> BusError {
    match err {
        ConnectionError::ConnectionRefused(code) => classify_return_code(code),
        other => BusError::Transient(other.to_string()),
    }
}

/// Map a broker CONNACK refusal onto the retry taxonomy.
fn classify_return_code(code: ConnectReturnCode) -> BusError {
    match code {
        ConnectReturnCode::RefusedProtocolVersion => {
            BusError::Fatal(FatalReason::ProtocolMismatch)
        }
        ConnectReturnCode::BadUserNamePassword => BusError::Fatal(FatalReason::BadCredentials),
        ConnectReturnCode::NotAuthorized => BusError::Fatal(FatalReason::NotAuthorized),
        other => BusError::Transient(format!("broker refused the connection: {:?}", other)),
    }
}
