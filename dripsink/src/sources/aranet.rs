//! Aranet base-station adapter.
//!
//! The station exposes a JSON API behind a salted challenge login: a first
//! request returns a permanent and a one-time salt, a second request carries
//! the challenge hash and receives the current readings of every paired
//! sensor. Sensors are configured as an id-to-name map; readings of sensors
//! or metrics absent from the response are skipped, never treated as a fetch
//! failure.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};

use dripsink_common::{Drop, Value};

use crate::source::Source;

/// Vendor metric ids and the names they publish under.
const METRICS: [(&str, &str); 4] = [
    ("t", "temperature"),
    ("h", "humidity"),
    ("co2", "carbon_dioxide"),
    ("batt", "battery"),
];

/// Polls an Aranet base station for the readings of its paired sensors.
pub struct AranetSource {
    name: String,
    username: String,
    password: String,
    /// Sensor id to logical sensor name.
    sensors: BTreeMap<String, String>,
    verify: bool,
    timeout: Duration,
    url: String,
    client: Option<reqwest::Client>,
}

impl AranetSource {
    pub fn new(
        name: impl Into<String>,
        hostname: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        sensors: BTreeMap<String, String>,
        verify: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            password: password.into(),
            sensors,
            verify,
            timeout,
            url: format!("https://{}/lua/api", hostname),
            client: None,
        }
    }

    async fn post(&self, payload: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let client = self
            .client
            .as_ref()
            .context("source polled before initialization")?;

        let response = client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .context("station request failed")?
            .error_for_status()
            .context("station returned an error status")?;

        response
            .json()
            .await
            .context("station response is not valid JSON")
    }

    /// Run the salted challenge login and fetch the current readings.
    async fn poll(&self) -> anyhow::Result<serde_json::Value> {
        let preauth = self
            .post(&json!({ "auth": { "username": self.username } }))
            .await?;

        let permanent_salt = preauth["auth"]["permasalt"]
            .as_str()
            .context("missing permanent salt in preauth response")?;
        let onetime_salt = preauth["auth"]["salt"]
            .as_str()
            .context("missing one-time salt in preauth response")?;

        let data = self
            .post(&json!({
                "currData": 1,
                "auth": {
                    "username": self.username,
                    "hash": challenge_hash(&self.password, permanent_salt, onetime_salt),
                },
            }))
            .await?;

        data.get("currData")
            .cloned()
            .context("missing current data in station response")
    }
}

#[async_trait]
impl Source for AranetSource {
    fn kind(&self) -> &'static str {
        "aranet"
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
        let data = self.poll().await?;

        let mut drops = Vec::new();
        for (sensor_id, sensor_name) in &self.sensors {
            let Some(readings) = data.get(sensor_id) else {
                tracing::warn!(sensor = %sensor_name, "No data for sensor");
                continue;
            };
            for (metric_id, metric_name) in METRICS {
                // A metric the sensor model does not carry is simply absent.
                if let Some(value) = readings.get(metric_id).and_then(Value::from_json) {
                    drops.push(Drop::new(sensor_name.clone(), metric_name, value));
                }
            }
        }
        Ok(drops)
    }
}

/// Iterated hex-encoded SHA-256.
fn sha256_hex(text: &str, rounds: u32) -> String {
    let mut out = text.to_string();
    for _ in 0..rounds {
        out = hex::encode(Sha256::digest(out.as_bytes()));
    }
    out
}

/// The station's challenge scheme: five rounds over the password, one round
/// binding the permanent salt, one round binding the one-time salt.
fn challenge_hash(password: &str, permanent_salt: &str, onetime_salt: &str) -> String {
    let password_hash = sha256_hex(password, 5);
    let permanent = sha256_hex(&format!("{}{}", password_hash, permanent_salt), 1);
    sha256_hex(&format!("{}{}", onetime_salt, permanent), 1)
}
