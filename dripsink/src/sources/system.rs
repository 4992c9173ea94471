//! Local system metrics via the `sysinfo` crate.
//!
//! Publishes the 5-minute load average, memory and swap usage, and the fill
//! level of each configured mount point, all under the instance name `host`.

use async_trait::async_trait;
use sysinfo::{Disks, System};

use dripsink_common::Drop;

use crate::source::Source;

/// Instance name all host metrics are published under.
const HOST: &str = "host";

/// Reads load, memory, swap, and disk usage of the local machine.
pub struct SystemSource {
    name: String,
    paths: Vec<String>,
    system: System,
    disks: Disks,
}

impl SystemSource {
    pub fn new(name: impl Into<String>, paths: Vec<String>) -> Self {
        Self {
            name: name.into(),
            paths,
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
        }
    }

    fn load5(&self) -> f64 {
        round2(System::load_average().five)
    }

    fn memory_percent(&self) -> f64 {
        percent(self.system.used_memory(), self.system.total_memory())
    }

    fn swap_percent(&self) -> f64 {
        percent(self.system.used_swap(), self.system.total_swap())
    }

    fn disk_percent(&self, path: &str) -> Option<f64> {
        let disk = self
            .disks
            .list()
            .iter()
            .find(|disk| disk.mount_point().to_string_lossy() == path)?;
        let total = disk.total_space();
        if total == 0 {
            return None;
        }
        Some(percent(total - disk.available_space(), total))
    }
}

#[async_trait]
impl Source for SystemSource {
    fn kind(&self) -> &'static str {
        "system"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn drop_names(&self) -> Vec<String> {
        let mut names = vec!["load".to_string(), "swap".to_string(), "memory".to_string()];
        names.extend(self.paths.iter().map(|path| disk_metric_name(path)));
        names
    }

    async fn fetch(&mut self) -> anyhow::Result<Vec<Drop>> {
        self.system.refresh_memory();
        self.disks.refresh(true);

        let mut drops = vec![
            Drop::new(HOST, "load", self.load5()),
            Drop::new(HOST, "swap", self.swap_percent()),
            Drop::new(HOST, "memory", self.memory_percent()),
        ];
        for path in &self.paths {
            match self.disk_percent(path) {
                Some(usage) => drops.push(Drop::new(HOST, disk_metric_name(path), usage)),
                None => tracing::warn!(path = %path, "No disk found for path"),
            }
        }
        Ok(drops)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(used as f64 / total as f64 * 100.0)
}

/// `/` maps to `disk-root`; other mounts strip the outer slashes and join the
/// rest with dashes, e.g. `/var/log` becomes `disk-var-log`.
fn disk_metric_name(path: &str) -> String {
    if path == "/" {
        "disk-root".to_string()
    } else {
        format!("disk-{}", path.trim_matches('/').replace('/', "-"))
    }
}
