//! End-to-end tests driving the sink against a scripted bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use dripsink::bus::{Bus, BusError, FatalReason, ScriptedBus};
use dripsink::sink::{Sink, SinkError};
use dripsink::source::Source;
use dripsink_common::{Drop, MqttConfig};

/// Emits one drop per fetch and counts its invocations.
struct TickerSource {
    name: &'static str,
    fetches: Arc<AtomicUsize>,
}

impl TickerSource {
    fn new(name: &'static str) -> (Self, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name,
                fetches: fetches.clone(),
            },
            fetches,
        )
    }
}

#[async_trait]
impl Source for TickerSource {
    fn kind(&self) -> &'static str {
        "ticker"
    }

    fn name(&self) -> &str {
        self.name
    }

    fn drop_names(&self) -> Vec<String> {
        vec!["count".to_string()]
    }

    async fn fetch(&mut self) -> anyhow::Result<Vec<Drop>> {
        let count = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(vec![Drop::new(self.name, "count", count as i64)])
    }
}

fn test_config() -> MqttConfig {
    MqttConfig {
        reconnect_interval_secs: 0,
        ..MqttConfig::default()
    }
}

/// Connect the scripted bus through a shared-state clone, so `Sink::cycle`
/// can be driven over simulated time without running the wall-clock loop.
async fn connect_direct(bus: &ScriptedBus) {
    let mut direct = bus.clone();
    direct.connect().await.unwrap();
}

#[tokio::test]
async fn test_due_times_drive_poll_counts_over_simulated_time() {
    let bus = ScriptedBus::new();
    let mut sink = Sink::new(test_config(), Box::new(bus.clone()));

    let (fast, fast_fetches) = TickerSource::new("fast");
    let (slow, slow_fetches) = TickerSource::new("slow");
    sink.register(Box::new(fast), Duration::from_secs(60));
    sink.register(Box::new(slow), Duration::from_secs(300));

    connect_direct(&bus).await;

    // Five minutes of simulated loop cadence, one cycle per second.
    let start = Instant::now();
    for second in 0..300 {
        sink.cycle(start + Duration::from_secs(second)).await.unwrap();
    }

    // 60s interval: due at t=0, 60, 120, 180, 240. 300s interval: t=0 only.
    assert_eq!(fast_fetches.load(Ordering::SeqCst), 5);
    assert_eq!(slow_fetches.load(Ordering::SeqCst), 1);

    let published = bus.published();

    // Heartbeats every 55s (keepalive 60, loop 1): t=0, 55, ..., 275.
    let heartbeats: Vec<_> = published
        .iter()
        .filter(|(topic, _)| topic == "dripsink/heartbeat")
        .collect();
    assert_eq!(heartbeats.len(), 6);
    assert!(heartbeats.iter().all(|(_, payload)| payload == "0"));

    // Every topic is either the 2-segment heartbeat or a 4-segment drop.
    for (topic, _) in &published {
        let segments = topic.split('/').count();
        if topic == "dripsink/heartbeat" {
            assert_eq!(segments, 2);
        } else {
            assert_eq!(segments, 4);
            assert!(topic.starts_with("dripsink/ticker/"));
        }
    }

    // The fast source's payloads count its polls in order.
    let fast_payloads: Vec<_> = published
        .iter()
        .filter(|(topic, _)| topic == "dripsink/ticker/fast/count")
        .map(|(_, payload)| payload.as_str())
        .collect();
    assert_eq!(fast_payloads, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_heartbeat_precedes_source_drops_in_a_cycle() {
    let bus = ScriptedBus::new();
    let mut sink = Sink::new(test_config(), Box::new(bus.clone()));
    let (ticker, _) = TickerSource::new("kitchen");
    sink.register(Box::new(ticker), Duration::from_secs(60));

    connect_direct(&bus).await;
    sink.cycle(Instant::now()).await.unwrap();

    let published = bus.published();
    assert_eq!(published[0].0, "dripsink/heartbeat");
    assert_eq!(published[1].0, "dripsink/ticker/kitchen/count");
}

#[tokio::test]
async fn test_transient_failures_retry_until_connected() {
    let bus = ScriptedBus::new();
    bus.script_connect(Err(BusError::Transient("connection refused".to_string())));
    bus.script_connect(Err(BusError::Transient("timed out".to_string())));

    let mut sink = Sink::new(test_config(), Box::new(bus.clone()));
    let stop = sink.stop_handle();
    let task = tokio::spawn(async move { sink.start().await });

    // Wait for the third attempt to succeed.
    for _ in 0..100 {
        if bus.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bus.is_connected());
    assert_eq!(bus.connect_attempts(), 3);

    stop.stop();
    task.await.unwrap().unwrap();
    assert!(!bus.is_connected());
}

#[tokio::test]
async fn test_bad_credentials_stop_the_daemon() {
    let bus = ScriptedBus::new();
    bus.script_connect(Err(BusError::Fatal(FatalReason::BadCredentials)));

    let mut sink = Sink::new(test_config(), Box::new(bus.clone()));
    let err = sink.start().await.unwrap_err();

    assert!(matches!(
        err,
        SinkError::Connection(FatalReason::BadCredentials)
    ));
    // No retry after a fatal refusal.
    assert_eq!(bus.connect_attempts(), 1);
}
