//! The publishing sink: connection state machine and orchestration loop.
//!
//! The sink owns the bus connection, the registered sources, and the single
//! thread of control that drives them. Each cycle it publishes a heartbeat
//! when due, then polls every source in registration order and publishes one
//! message per drop under `<sink>/<kind>/<source>/<metric>`.
//!
//! Connection handling follows one rule: transient failures are retried
//! forever with a fixed backoff while the sink is running; a broker that
//! refuses the session (bad credentials, not authorized, protocol mismatch)
//! stops the sink for good. Disconnect notifications arrive asynchronously
//! from the bus client's background I/O and are drained at the top of every
//! cycle, so reconnection always happens from the loop that owns the
//! connection — never from inside a client callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Notify;

use dripsink_common::{MqttConfig, Schedule, TopicBuilder};

use crate::bus::{Bus, BusError, BusEvent, DisconnectReason, FatalReason, PublishError};
use crate::source::{PolledSource, Source};

/// Cadence of the orchestration loop.
pub const LOOP_PERIOD: Duration = Duration::from_secs(1);

/// Liveness payload published under `<sink>/heartbeat`.
pub const HEARTBEAT_PAYLOAD: &str = "0";

/// Errors that terminate the sink's run loop.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The broker refused the session for good.
    #[error("Unrecoverable MQTT connection error: {0}")]
    Connection(FatalReason),
}

/// Cancellation entry point for a running sink.
///
/// Cloneable and callable from any context — a signal task, another thread.
/// Stopping is idempotent: the run loop observes the cleared flag, drains the
/// cycle in flight, disconnects, and runs source cleanup exactly once.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    /// Request the sink to shut down.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopping sink");
        }
        self.notify.notify_waiters();
    }

    /// Whether the sink still considers itself running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// The publishing sink.
pub struct Sink {
    config: MqttConfig,
    topics: TopicBuilder,
    bus: Box<dyn Bus>,
    sources: Vec<PolledSource>,
    heartbeat: Schedule,
    running: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    loop_period: Duration,
    reconnect_interval: Duration,
}

impl Sink {
    /// Create a sink publishing under `config.name`, using the given bus
    /// client. Sources are added with [`Sink::register`] before
    /// [`Sink::start`].
    pub fn new(config: MqttConfig, bus: Box<dyn Bus>) -> Self {
        let keepalive = Duration::from_secs(config.keepalive_secs);
        let reconnect_interval = Duration::from_secs(config.reconnect_interval_secs);
        let topics = TopicBuilder::new(config.name.clone());

        Self {
            config,
            topics,
            bus,
            sources: Vec::new(),
            heartbeat: Schedule::new(heartbeat_interval(keepalive, LOOP_PERIOD)),
            running: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            loop_period: LOOP_PERIOD,
            reconnect_interval,
        }
    }

    /// Register a source to be polled every `interval`. Registration order is
    /// poll order; sources cannot be removed at runtime.
    pub fn register(&mut self, source: Box<dyn Source>, interval: Duration) {
        self.sources.push(PolledSource::new(source, interval));
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Get a handle that can stop this sink from any context.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
            notify: self.stop_notify.clone(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until stopped or a fatal connection error. Initializes every
    /// source, connects, drives the orchestration loop, and tears the sources
    /// down exactly once on the way out.
    pub async fn start(&mut self) -> Result<(), SinkError> {
        tracing::info!(sink = %self.topics.root(), "Starting sink");
        self.running.store(true, Ordering::SeqCst);
        self.initialize_sources().await;

        let result = self.run().await;

        self.cleanup_sources().await;
        tracing::info!(sink = %self.topics.root(), "Sink stopped");
        result
    }

    async fn run(&mut self) -> Result<(), SinkError> {
        self.connect_loop().await?;

        // Keep cycling while draining after a stop, until disconnected.
        while self.is_running() || self.bus.is_connected() {
            self.cycle(Instant::now()).await?;

            if !self.is_running() {
                if self.bus.is_connected() {
                    tracing::info!(host = %self.config.hostname, "Disconnecting from broker");
                    self.bus.disconnect().await;
                }
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.loop_period) => {}
                _ = self.stop_notify.notified() => {}
            }
        }

        Ok(())
    }

    /// One orchestration cycle at `now`: drain bus notifications, publish the
    /// heartbeat when due, then poll every source in registration order.
    ///
    /// Only a fatal connection error comes back as `Err`; per-source and
    /// per-publish failures are contained and logged.
    pub async fn cycle(&mut self, now: Instant) -> Result<(), SinkError> {
        self.drain_bus_events().await?;

        if self.heartbeat.tick(now) {
            self.publish(&self.topics.heartbeat(), HEARTBEAT_PAYLOAD)
                .await?;
        }

        for index in 0..self.sources.len() {
            let drops = self.sources[index].collect(now).await;
            if drops.is_empty() {
                continue;
            }
            let kind = self.sources[index].source().kind();
            for drop in drops {
                let topic = self.topics.measurement(kind, drop.source(), drop.metric());
                match drop.payload() {
                    Ok(payload) => self.publish(&topic, &payload).await?,
                    Err(err) => {
                        tracing::error!(topic = %topic, error = %err, "Could not encode payload");
                    }
                }
            }
        }

        Ok(())
    }

    /// Attempt to connect until it succeeds, the sink is stopped, or the
    /// broker refuses the session for good. Transient failures back off for
    /// the configured interval and try again.
    async fn connect_loop(&mut self) -> Result<(), SinkError> {
        while self.is_running() {
            tracing::info!(
                host = %self.config.hostname,
                port = self.config.port,
                "Connecting to broker"
            );
            match self.bus.connect().await {
                Ok(()) => {
                    tracing::info!(host = %self.config.hostname, "Connected to broker");
                    return Ok(());
                }
                Err(BusError::Fatal(reason)) => return Err(self.fail(reason)),
                Err(BusError::Transient(message)) => {
                    tracing::info!(
                        host = %self.config.hostname,
                        error = %message,
                        retry_secs = self.reconnect_interval.as_secs(),
                        "Could not connect, will retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_interval) => {}
                        _ = self.stop_notify.notified() => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Publish one payload. Transport failures on a stale connection flag
    /// re-enter the connect loop; everything else is logged and dropped.
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), SinkError> {
        tracing::debug!(topic = %topic, "Publishing");
        match self.bus.publish(topic, payload).await {
            Ok(()) => Ok(()),
            Err(PublishError::Payload(message)) => {
                tracing::error!(topic = %topic, error = %message, "Could not publish message");
                Ok(())
            }
            Err(PublishError::Transport(message)) => {
                tracing::error!(topic = %topic, error = %message, "Bus error while publishing");
                if self.is_running() && !self.bus.is_connected() {
                    self.connect_loop().await?;
                }
                Ok(())
            }
        }
    }

    async fn drain_bus_events(&mut self) -> Result<(), SinkError> {
        while let Some(event) = self.bus.poll_event() {
            match event {
                BusEvent::Connected => {
                    tracing::info!(host = %self.config.hostname, "Connected to broker");
                }
                BusEvent::Disconnected(reason) => self.handle_disconnect(reason).await?,
            }
        }
        Ok(())
    }

    async fn handle_disconnect(&mut self, reason: DisconnectReason) -> Result<(), SinkError> {
        match reason {
            DisconnectReason::Fatal(reason) => Err(self.fail(reason)),
            DisconnectReason::Requested => {
                tracing::info!(host = %self.config.hostname, "Disconnected from broker");
                Ok(())
            }
            DisconnectReason::Lost(message) => {
                tracing::info!(
                    host = %self.config.hostname,
                    reason = %message,
                    "Disconnected from broker"
                );
                if self.is_running() {
                    tracing::info!("Sink still running, reconnecting");
                    self.connect_loop().await?;
                }
                Ok(())
            }
        }
    }

    /// Mark the sink as stopped and build the terminal error.
    fn fail(&self, reason: FatalReason) -> SinkError {
        self.running.store(false, Ordering::SeqCst);
        tracing::error!(reason = %reason, "MQTT connection error");
        SinkError::Connection(reason)
    }

    async fn initialize_sources(&mut self) {
        for polled in &mut self.sources {
            let source = polled.source_mut();
            let name = source.qualified_name();
            match source.initialize().await {
                Ok(()) => {
                    tracing::info!(
                        source = %name,
                        drops = ?source.drop_names(),
                        "Source initialized"
                    );
                }
                Err(err) => {
                    tracing::error!(source = %name, error = %err, "Source initialization failed");
                    tracing::debug!(source = %name, "{:?}", err);
                }
            }
        }
    }

    async fn cleanup_sources(&mut self) {
        for polled in &mut self.sources {
            polled.source_mut().cleanup().await;
        }
    }
}

/// Heartbeat period: far enough inside the keepalive window that the broker
/// sees traffic well before the deadline, but never faster than the loop.
fn heartbeat_interval(keepalive: Duration, loop_period: Duration) -> Duration {
    keepalive.saturating_sub(loop_period * 5).max(loop_period)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use dripsink_common::Drop;

    use super::*;
    use crate::bus::ScriptedBus;

    struct StubSource {
        name: String,
        drops: Vec<Drop>,
        fetches: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
        fail_initialize: bool,
    }

    impl StubSource {
        fn new(name: &str, drops: Vec<Drop>) -> Self {
            Self {
                name: name.to_string(),
                drops,
                fetches: Arc::new(AtomicUsize::new(0)),
                cleanups: Arc::new(AtomicUsize::new(0)),
                fail_initialize: false,
            }
        }
    }

    #[async_trait]
    impl Source for StubSource {
        fn kind(&self) -> &'static str {
            "stub"
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn drop_names(&self) -> Vec<String> {
            self.drops.iter().map(|d| d.metric().to_string()).collect()
        }

        async fn initialize(&mut self) -> anyhow::Result<()> {
            if self.fail_initialize {
                anyhow::bail!("no route to sensor");
            }
            Ok(())
        }

        async fn fetch(&mut self) -> anyhow::Result<Vec<Drop>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.drops.clone())
        }

        async fn cleanup(&mut self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_config() -> MqttConfig {
        MqttConfig {
            reconnect_interval_secs: 0,
            ..MqttConfig::default()
        }
    }

    fn running_sink(bus: &ScriptedBus) -> Sink {
        let mut sink = Sink::new(test_config(), Box::new(bus.clone()));
        sink.running.store(true, Ordering::SeqCst);
        sink
    }

    #[test]
    fn test_heartbeat_interval() {
        let second = Duration::from_secs(1);
        assert_eq!(
            heartbeat_interval(Duration::from_secs(60), second),
            Duration::from_secs(55)
        );
        // Tiny keepalives never drive the heartbeat below the loop cadence.
        assert_eq!(heartbeat_interval(Duration::from_secs(3), second), second);
    }

    #[tokio::test]
    async fn test_connect_retries_transient_failures() {
        let bus = ScriptedBus::new();
        bus.script_connect(Err(BusError::Transient("timed out".to_string())));
        bus.script_connect(Err(BusError::Transient("refused".to_string())));

        let mut sink = running_sink(&bus);
        sink.connect_loop().await.unwrap();

        // Two failures, two backoffs, then success on the third attempt.
        assert_eq!(bus.connect_attempts(), 3);
        assert!(bus.is_connected());
    }

    #[tokio::test]
    async fn test_fatal_connect_stops_the_sink() {
        let bus = ScriptedBus::new();
        bus.script_connect(Err(BusError::Fatal(FatalReason::BadCredentials)));

        let mut sink = running_sink(&bus);
        let err = sink.connect_loop().await.unwrap_err();

        assert!(matches!(err, SinkError::Connection(FatalReason::BadCredentials)));
        assert!(!sink.is_running());
        assert_eq!(bus.connect_attempts(), 1);

        // Stopped: no further attempts.
        sink.connect_loop().await.unwrap();
        assert_eq!(bus.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_cycle_publishes_heartbeat_then_source_drops() {
        let bus = ScriptedBus::new();
        let mut sink = running_sink(&bus);
        sink.bus.connect().await.unwrap();
        sink.register(
            Box::new(StubSource::new(
                "kitchen",
                vec![Drop::new("kitchen", "temperature", 21.5)],
            )),
            Duration::from_secs(60),
        );

        sink.cycle(Instant::now()).await.unwrap();

        let published = bus.published();
        assert_eq!(
            published,
            vec![
                ("dripsink/heartbeat".to_string(), "0".to_string()),
                (
                    "dripsink/stub/kitchen/temperature".to_string(),
                    "21.5".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_respects_its_own_due_time() {
        let bus = ScriptedBus::new();
        let mut sink = running_sink(&bus);
        sink.bus.connect().await.unwrap();

        let start = Instant::now();
        sink.cycle(start).await.unwrap();
        sink.cycle(start + Duration::from_secs(1)).await.unwrap();
        assert_eq!(bus.published().len(), 1);

        // Default keepalive 60s, loop 1s: heartbeat every 55s.
        sink.cycle(start + Duration::from_secs(55)).await.unwrap();
        assert_eq!(bus.published().len(), 2);
    }

    #[tokio::test]
    async fn test_fatal_disconnect_notification_stops_the_sink() {
        let bus = ScriptedBus::new();
        let mut sink = running_sink(&bus);
        sink.bus.connect().await.unwrap();

        bus.push_event(BusEvent::Disconnected(DisconnectReason::Fatal(
            FatalReason::NotAuthorized,
        )));

        let err = sink.cycle(Instant::now()).await.unwrap_err();
        assert!(matches!(err, SinkError::Connection(FatalReason::NotAuthorized)));
        assert!(!sink.is_running());
    }

    #[tokio::test]
    async fn test_lost_connection_notification_reconnects() {
        let bus = ScriptedBus::new();
        let mut sink = running_sink(&bus);
        sink.bus.connect().await.unwrap();
        let attempts_before = bus.connect_attempts();

        bus.drop_connection();
        bus.push_event(BusEvent::Disconnected(DisconnectReason::Lost(
            "keepalive timeout".to_string(),
        )));

        sink.cycle(Instant::now()).await.unwrap();

        assert_eq!(bus.connect_attempts(), attempts_before + 1);
        assert!(bus.is_connected());
    }

    #[tokio::test]
    async fn test_publish_transport_failure_with_stale_flag_reconnects() {
        let bus = ScriptedBus::new();
        let mut sink = running_sink(&bus);
        sink.bus.connect().await.unwrap();
        let attempts_before = bus.connect_attempts();

        // The transport is gone but no notification has been drained yet.
        bus.drop_connection();
        bus.script_publish(Err(PublishError::Transport("broken pipe".to_string())));

        sink.cycle(Instant::now()).await.unwrap();

        assert_eq!(bus.connect_attempts(), attempts_before + 1);
        assert!(bus.is_connected());
    }

    #[tokio::test]
    async fn test_source_failure_does_not_abort_the_cycle() {
        struct FailingSource;

        #[async_trait]
        impl Source for FailingSource {
            fn kind(&self) -> &'static str {
                "stub"
            }
            fn name(&self) -> &str {
                "broken"
            }
            fn drop_names(&self) -> Vec<String> {
                Vec::new()
            }
            async fn fetch(&mut self) -> anyhow::Result<Vec<Drop>> {
                anyhow::bail!("sensor unreachable")
            }
        }

        let bus = ScriptedBus::new();
        let mut sink = running_sink(&bus);
        sink.bus.connect().await.unwrap();
        sink.register(Box::new(FailingSource), Duration::from_secs(60));
        sink.register(
            Box::new(StubSource::new(
                "window",
                vec![Drop::new("window", "humidity", 40i64)],
            )),
            Duration::from_secs(60),
        );

        sink.cycle(Instant::now()).await.unwrap();

        // The failing source is skipped; the one after it still publishes.
        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].0, "dripsink/stub/window/humidity");
    }

    #[tokio::test]
    async fn test_failed_initialize_is_contained() {
        let bus = ScriptedBus::new();
        let mut sink = running_sink(&bus);

        let mut broken = StubSource::new("attic", Vec::new());
        broken.fail_initialize = true;
        sink.register(Box::new(broken), Duration::from_secs(60));

        // Does not panic or abort; the source simply starts uninitialized.
        sink.initialize_sources().await;
    }

    #[tokio::test]
    async fn test_start_and_stop_lifecycle() {
        let bus = ScriptedBus::new();
        let mut sink = Sink::new(test_config(), Box::new(bus.clone()));

        let source = StubSource::new("kitchen", vec![Drop::new("kitchen", "temperature", 21.5)]);
        let cleanups = source.cleanups.clone();
        sink.register(Box::new(source), Duration::from_secs(60));

        let stop = sink.stop_handle();
        let task = tokio::spawn(async move { sink.start().await });

        // Let the loop come up, then ask it to stop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
        stop.stop(); // idempotent

        task.await.unwrap().unwrap();

        assert!(!bus.is_connected());
        assert_eq!(bus.disconnects(), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        // Heartbeat and at least one poll went out before shutdown.
        assert!(bus.published().len() >= 2);
    }
}
