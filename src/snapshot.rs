//! JSON snapshot of current resource usage, served at `/api/metrics` for the
//! dashboard.
//!
//! The snapshot samples freshly on every call and never reads the metric
//! registry, so its numbers can momentarily disagree with `/metrics`. That
//! divergence is an accepted property: the two endpoints are independent
//! views of the same sampler.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::sampler::Sampler;

/// Full dashboard snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture time in epoch milliseconds.
    pub timestamp: i64,
    pub cpu: CpuSnapshot,
    pub memory: MemorySnapshot,
    pub disk: Vec<DiskSnapshot>,
    pub network: Vec<NetworkSnapshot>,
    pub system: SystemSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuSnapshot {
    /// CPU usage percent, 1 decimal.
    pub usage: f64,
    pub cores: usize,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    #[serde(rename = "usagePercent")]
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSnapshot {
    pub fs: String,
    pub mount: String,
    pub size: u64,
    pub used: u64,
    #[serde(rename = "usagePercent")]
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub iface: String,
    pub rx_sec: f64,
    pub tx_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub platform: String,
    pub distro: String,
    pub hostname: String,
    /// Uptime in whole minutes.
    pub uptime: u64,
}

/// Build a snapshot from fresh sampler readings.
///
/// Any sampler failure propagates to the caller; there is no cached fallback
/// for this endpoint.
pub fn build_snapshot(sampler: &dyn Sampler) -> Result<Snapshot> {
    let load = sampler.current_load()?;
    let cpu = sampler.cpu_info()?;
    let mem = sampler.memory()?;
    let filesystems = sampler.filesystems()?;
    let interfaces = sampler.network_interfaces()?;
    let host = sampler.host()?;

    let memory_percent = if mem.total > 0 {
        round1(mem.used as f64 / mem.total as f64 * 100.0)
    } else {
        0.0
    };

    Ok(Snapshot {
        timestamp: Utc::now().timestamp_millis(),
        cpu: CpuSnapshot {
            usage: round1(load.usage_percent),
            cores: cpu.cores,
            model: cpu.model,
        },
        memory: MemorySnapshot {
            total: mem.total,
            used: mem.used,
            free: mem.free,
            usage_percent: memory_percent,
        },
        disk: filesystems
            .into_iter()
            .map(|fs| DiskSnapshot {
                fs: fs.device,
                mount: fs.mount,
                size: fs.total,
                used: fs.used,
                usage_percent: round1(fs.used_percent),
            })
            .collect(),
        network: interfaces
            .into_iter()
            .map(|iface| NetworkSnapshot {
                iface: iface.name,
                rx_sec: iface.rx_per_sec,
                tx_sec: iface.tx_per_sec,
            })
            .collect(),
        system: SystemSnapshot {
            platform: host.platform,
            distro: host.distro,
            hostname: host.hostname,
            uptime: host.uptime_secs / 60,
        },
    })
}

/// Round half away from zero to 1 decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
