//! Philips Somneo bedside-lamp adapter.
//!
//! The lamp exposes its environmental sensors over an unauthenticated JSON
//! endpoint. Metrics absent from the response (older firmware revisions) are
//! skipped rather than failing the fetch.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use dripsink_common::{Drop, Value};

use crate::source::Source;

/// Vendor metric ids and the names they publish under.
const METRICS: [(&str, &str); 4] = [
    ("mstmp", "temperature"),
    ("msrhu", "humidity"),
    ("mslux", "illuminance"),
    ("mssnd", "sound_pressure"),
];

/// Polls the environmental sensors of a Somneo lamp.
pub struct SomneoSource {
    name: String,
    verify: bool,
    timeout: Duration,
    url: String,
    client: Option<reqwest::Client>,
}

impl SomneoSource {
    pub fn new(name: impl Into<String>, hostname: &str, verify: bool, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            verify,
            timeout,
            url: format!("https://{}/di/v1/products/1", hostname),
            client: None,
        }
    }

    async fn get(&self, endpoint: &str) -> anyhow::Result<serde_json::Value> {
        let client = self
            .client
            .as_ref()
            .context("source polled before initialization")?;

        let response = client
            .get(format!("{}/{}", self.url, endpoint))
            .send()
            .await
            .context("lamp request failed")?
            .error_for_status()
            .context("lamp returned an error status")?;

        response.json().await.context("lamp response is not valid JSON")
    }
}

#[async_trait]
impl Source for SomneoSource {
    fn kind(&self) -> &'static str {
        "somneo"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn drop_names(&self) -> Vec<String> {
        METRICS.iter().map(|(_, name)| name.to_string()).collect()
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!self.verify)
            .timeout(self.timeout)
            .build()
            .context("could not build HTTP client")?;
        self.client = Some(client);
        Ok(())
    }

    async fn fetch(&mut self) -> anyhow::Result<Vec<Drop>> {
        let readings = self.get("wusrd").await?;

        let mut drops = Vec::new();
        for (metric_id, metric_name) in METRICS {
            if let Some(value) = readings.get(metric_id).and_then(Value::from_json) {
                drops.push(Drop::new(self.name.clone(), metric_name, value));
            }
        }
        Ok(drops)
    }
}
