//! Synthetic source generating bounded random readings.
//!
//! Useful for exercising a broker setup end to end before any real sensor is
//! wired in.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::Rng;

use dripsink_common::Drop;

use crate::source::Source;

/// Generates one random integer per configured metric on every poll.
pub struct RandomSource {
    name: String,
    /// Metric name to inclusive `[low, high]` range.
    metrics: BTreeMap<String, (i64, i64)>,
}

impl RandomSource {
    pub fn new(name: impl Into<String>, metrics: BTreeMap<String, (i64, i64)>) -> Self {
        Self {
            name: name.into(),
            metrics,
        }
    }
}

#[async_trait]
impl Source for RandomSource {
    fn kind(&self) -> &'static str {
        "random"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn drop_names(&self) -> Vec<String> {
        self.metrics.keys().cloned().collect()
    }

    async fn fetch(&mut self) -> anyhow::Result<Vec<Drop>> {
        let mut rng = rand::thread_rng();
        Ok(self
            .metrics
            .iter()
            .map(|(metric, (low, high))| {
                Drop::new(
                    self.name.clone(),
                    metric.clone(),
                    rng.gen_range(*low..=*high),
                )
            })
            .collect())
    }
}
