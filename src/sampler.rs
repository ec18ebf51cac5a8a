//! System sampling: point-in-time readings of CPU, memory, disk, and network
//! state, backed by the `sysinfo` crate.
//!
//! The [`Sampler`] trait is the seam between OS introspection and the
//! exporter. Each method is an independent, fallible call so a failure in one
//! area (e.g. network stats) does not prevent readings from the others.

use anyhow::{ensure, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};

/// Current CPU load reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuLoad {
    /// Overall CPU utilization percentage (0-100).
    pub usage_percent: f64,
    /// Load averages (1min, 5min, 15min).
    pub load_avg: (f64, f64, f64),
}

/// Static CPU information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInfo {
    /// Number of logical cores.
    pub cores: usize,
    /// CPU model string.
    pub model: String,
}

/// Memory and swap usage in bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

/// Usage of one mounted filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemUsage {
    /// Device identifier (e.g., "/dev/sda1").
    pub device: String,
    /// Mount path (e.g., "/data").
    pub mount: String,
    /// Total size in bytes.
    pub total: u64,
    /// Used bytes.
    pub used: u64,
    /// Used space as a percentage of total.
    pub used_percent: f64,
}

/// Cumulative counters and instantaneous rates for one network interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceCounters {
    /// Interface name (e.g., "eth0").
    pub name: String,
    /// Total bytes received since boot.
    pub rx_bytes: u64,
    /// Total bytes transmitted since boot.
    pub tx_bytes: u64,
    /// Total packets received since boot.
    pub rx_packets: u64,
    /// Total packets transmitted since boot.
    pub tx_packets: u64,
    /// Receive rate in bytes per second since the previous sample.
    pub rx_per_sec: f64,
    /// Transmit rate in bytes per second since the previous sample.
    pub tx_per_sec: f64,
}

/// Host identity and uptime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub platform: String,
    pub distro: String,
    pub hostname: String,
    pub uptime_secs: u64,
}

/// Point-in-time readings of host resource state.
///
/// Implementations must be shareable across the HTTP handlers and the
/// background refresh task; interior mutability is the implementation's
/// concern.
pub trait Sampler: Send + Sync {
    fn current_load(&self) -> Result<CpuLoad>;
    fn cpu_info(&self) -> Result<CpuInfo>;
    fn memory(&self) -> Result<MemoryInfo>;
    fn filesystems(&self) -> Result<Vec<FilesystemUsage>>;
    fn network_interfaces(&self) -> Result<Vec<InterfaceCounters>>;
    fn host(&self) -> Result<HostInfo>;
}

/// Persistent sysinfo state for delta-based readings.
///
/// CPU utilization and network rates need a previous observation to compare
/// against, so the `System`/`Networks` instances live for the process
/// lifetime rather than being rebuilt per call.
struct SamplerState {
    sys: System,
    disks: Disks,
    networks: Networks,
    last_network_refresh: Instant,
}

/// [`Sampler`] implementation backed by the `sysinfo` crate.
pub struct SysinfoSampler {
    state: Mutex<SamplerState>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        // Initial refresh so the first real sample has a CPU baseline.
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Self {
            state: Mutex::new(SamplerState {
                sys,
                disks: Disks::new_with_refreshed_list(),
                networks: Networks::new_with_refreshed_list(),
                last_network_refresh: Instant::now(),
            }),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SysinfoSampler {
    fn current_load(&self) -> Result<CpuLoad> {
        let mut state = self.state.lock();
        state.sys.refresh_cpu_usage();
        let load = System::load_average();
        Ok(CpuLoad {
            usage_percent: f64::from(state.sys.global_cpu_usage()),
            load_avg: (load.one, load.five, load.fifteen),
        })
    }

    fn cpu_info(&self) -> Result<CpuInfo> {
        let state = self.state.lock();
        let cpus = state.sys.cpus();
        ensure!(!cpus.is_empty(), "no CPUs reported by the system");
        Ok(CpuInfo {
            cores: cpus.len(),
            model: cpus[0].brand().trim().to_string(),
        })
    }

    fn memory(&self) -> Result<MemoryInfo> {
        let mut state = self.state.lock();
        state.sys.refresh_memory();
        Ok(MemoryInfo {
            total: state.sys.total_memory(),
            used: state.sys.used_memory(),
            free: state.sys.free_memory(),
            available: state.sys.available_memory(),
            swap_total: state.sys.total_swap(),
            swap_used: state.sys.used_swap(),
        })
    }

    fn filesystems(&self) -> Result<Vec<FilesystemUsage>> {
        let mut state = self.state.lock();
        state.disks.refresh(true);

        let mut filesystems: Vec<FilesystemUsage> = state
            .disks
            .list()
            .iter()
            .map(|disk| {
                let total = disk.total_space();
                let used = total.saturating_sub(disk.available_space());
                let used_percent = if total > 0 {
                    used as f64 / total as f64 * 100.0
                } else {
                    0.0
                };
                FilesystemUsage {
                    device: disk.name().to_string_lossy().to_string(),
                    mount: disk.mount_point().display().to_string(),
                    total,
                    used,
                    used_percent,
                }
            })
            .collect();
        filesystems.sort_by(|a, b| a.mount.cmp(&b.mount));
        Ok(filesystems)
    }

    fn network_interfaces(&self) -> Result<Vec<InterfaceCounters>> {
        let mut state = self.state.lock();
        let elapsed = state.last_network_refresh.elapsed().as_secs_f64();
        state.networks.refresh(true);
        state.last_network_refresh = Instant::now();

        let mut interfaces: Vec<InterfaceCounters> = state
            .networks
            .list()
            .iter()
            .map(|(name, data)| {
                // received()/transmitted() report bytes since the previous
                // refresh; divide by the elapsed time to get a rate.
                let (rx_per_sec, tx_per_sec) = if elapsed > 0.0 {
                    (
                        data.received() as f64 / elapsed,
                        data.transmitted() as f64 / elapsed,
                    )
                } else {
                    (0.0, 0.0)
                };
                InterfaceCounters {
                    name: name.clone(),
                    rx_bytes: data.total_received(),
                    tx_bytes: data.total_transmitted(),
                    rx_packets: data.total_packets_received(),
                    tx_packets: data.total_packets_transmitted(),
                    rx_per_sec,
                    tx_per_sec,
                }
            })
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(interfaces)
    }

    fn host(&self) -> Result<HostInfo> {
        Ok(HostInfo {
            platform: std::env::consts::OS.to_string(),
            distro: System::long_os_version()
                .or_else(System::name)
                .unwrap_or_else(|| "unknown".to_string()),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            uptime_secs: System::uptime(),
        })
    }
}
