//! The polling contract every source variant implements.
//!
//! Concrete sources differ only in how they fetch readings (vendor HTTP call,
//! OS metrics read, synthetic generation). Scheduling is not part of the
//! trait: the sink registers each source inside a [`PolledSource`], which owns
//! the due-time bookkeeping and the fault-isolation rule — a failing fetch is
//! logged and contained, never propagated into the orchestration loop.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use dripsink_common::{Drop, Schedule};

/// A polling unit producing [`Drop`]s on demand.
#[async_trait]
pub trait Source: Send {
    /// Adapter family identifier, fixed per implementing type.
    fn kind(&self) -> &'static str;

    /// Instance identifier, unique within its kind.
    fn name(&self) -> &str;

    /// Metric names this instance can produce. Used for startup diagnostics
    /// only, never for runtime filtering.
    fn drop_names(&self) -> Vec<String>;

    /// `<kind>:<name>`, used in log lines.
    fn qualified_name(&self) -> String {
        format!("{}:{}", self.kind(), self.name())
    }

    /// One-time setup before the first poll.
    async fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Collect the current readings. An empty result is a valid, non-error
    /// outcome (e.g. a transiently absent metric).
    async fn fetch(&mut self) -> anyhow::Result<Vec<Drop>>;

    /// One-time teardown at shutdown.
    async fn cleanup(&mut self) {}

    /// Tear the source down and set it up again.
    async fn restart(&mut self) -> anyhow::Result<()> {
        self.cleanup().await;
        self.initialize().await
    }
}

/// A registered source paired with its poll schedule.
pub struct PolledSource {
    source: Box<dyn Source>,
    schedule: Schedule,
}

impl PolledSource {
    pub fn new(source: Box<dyn Source>, interval: Duration) -> Self {
        Self {
            source,
            schedule: Schedule::new(interval),
        }
    }

    pub fn source(&self) -> &dyn Source {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> &mut dyn Source {
        self.source.as_mut()
    }

    /// Whether this source is due for a poll at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.schedule.is_due(now)
    }

    /// Poll the source if it is due at `now`.
    ///
    /// Not due: returns an empty vector with no side effect. Due: the next
    /// due time is committed *before* the fetch, so a slow or failing fetch
    /// cannot re-fire within the same interval. A fetch failure is logged
    /// with the source's qualified name and contained here.
    pub async fn collect(&mut self, now: Instant) -> Vec<Drop> {
        if !self.schedule.tick(now) {
            return Vec::new();
        }

        let name = self.source.qualified_name();
        match self.source.fetch().await {
            Ok(drops) => {
                tracing::info!(source = %name, count = drops.len(), "Collected drops");
                drops
            }
            Err(err) => {
                tracing::error!(source = %name, error = %err, "Could not collect data");
                tracing::debug!(source = %name, "{:?}", err);
                Vec::new()
            }
        }
    }
}
