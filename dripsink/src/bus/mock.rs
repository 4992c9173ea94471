//! Scripted in-memory bus for exercising the sink without a broker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Bus, BusError, BusEvent, PublishError};

#[derive(Debug, Default)]
struct State {
    connect_script: VecDeque<Result<(), BusError>>,
    publish_script: VecDeque<Result<(), PublishError>>,
    pending_events: VecDeque<BusEvent>,
    published: Vec<(String, String)>,
    connected: bool,
    connect_attempts: usize,
    disconnects: usize,
}

/// A [`Bus`] whose connect attempts and publish outcomes follow a script.
///
/// Unscripted attempts succeed, so tests only spell out the failures they care
/// about. State lives behind an `Arc`, so a clone kept outside the sink keeps
/// scripting outcomes and inspecting what was published while the sink owns
/// the original.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBus {
    state: Arc<Mutex<State>>,
}

impl ScriptedBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("scripted bus lock poisoned")
    }

    /// Queue the outcome of the next unscripted connect attempt.
    pub fn script_connect(&self, outcome: Result<(), BusError>) {
        self.lock().connect_script.push_back(outcome);
    }

    /// Queue the outcome of the next unscripted publish.
    pub fn script_publish(&self, outcome: Result<(), PublishError>) {
        self.lock().publish_script.push_back(outcome);
    }

    /// Queue an asynchronous connection notification for the sink to drain.
    pub fn push_event(&self, event: BusEvent) {
        self.lock().pending_events.push_back(event);
    }

    /// Drop the connection without queueing a notification, the way a
    /// transport failure discovered mid-publish leaves things.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }

    /// Everything published so far, as `(topic, payload)` pairs in publish
    /// order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.lock().published.clone()
    }

    /// Number of connect attempts made so far.
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Number of disconnect requests made so far.
    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }
}

#[async_trait]
impl Bus for ScriptedBus {
    async fn connect(&mut self) -> Result<(), BusError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        match state.connect_script.pop_front().unwrap_or(Ok(())) {
            Ok(()) => {
                state.connected = true;
                Ok(())
            }
            Err(err) => {
                state.connected = false;
                Err(err)
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let mut state = self.lock();
        if let Some(outcome) = state.publish_script.pop_front() {
            outcome?;
        }
        if !state.connected {
            return Err(PublishError::Transport("not connected".to_string()));
        }
        state
            .published
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.lock();
        state.connected = false;
        state.disconnects += 1;
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn poll_event(&mut self) -> Option<BusEvent> {
        self.lock().pending_events.pop_front()
    }
}
