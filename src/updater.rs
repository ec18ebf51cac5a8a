//! Metrics updater: pulls fresh sampler readings each cycle and writes them
//! into the metric registry.
//!
//! A refresh is a fixed sequence of independent sampler calls. The first
//! failure is logged and aborts the remainder of the cycle; values written by
//! earlier calls in the same cycle stay in the registry (no rollback), so
//! `/metrics` keeps serving the last successful readings.

use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::registry::{MetricKind, Registry, RegistryError, SeriesHandle};
use crate::sampler::Sampler;

/// Outcome of one refresh cycle. Sampler errors never propagate to the
/// caller; a failed cycle is simply retried at the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Every sampler call succeeded.
    Complete,
    /// A sampler call failed; later writes in the cycle were skipped.
    Partial,
}

/// Handles for every series the exporter publishes.
struct ExporterSeries {
    cpu_usage: SeriesHandle,
    cpu_count: SeriesHandle,
    load_average: SeriesHandle,
    memory_total: SeriesHandle,
    memory_used: SeriesHandle,
    memory_available: SeriesHandle,
    memory_usage_percent: SeriesHandle,
    swap_total: SeriesHandle,
    swap_used: SeriesHandle,
    swap_usage_percent: SeriesHandle,
    disk_total: SeriesHandle,
    disk_used: SeriesHandle,
    disk_usage_percent: SeriesHandle,
    net_rx_bytes: SeriesHandle,
    net_tx_bytes: SeriesHandle,
    net_rx_packets: SeriesHandle,
    net_tx_packets: SeriesHandle,
}

impl ExporterSeries {
    /// Register the exported series. A conflict here is a programming error
    /// and fatal at startup.
    fn register(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            cpu_usage: registry.register(
                "node_cpu_usage_percent",
                MetricKind::Gauge,
                "CPU usage percentage",
                &[],
            )?,
            cpu_count: registry.register(
                "node_cpu_count",
                MetricKind::Gauge,
                "Number of CPU cores",
                &[],
            )?,
            load_average: registry.register(
                "node_load_average",
                MetricKind::Gauge,
                "Load average",
                &["period"],
            )?,
            memory_total: registry.register(
                "node_memory_total_bytes",
                MetricKind::Gauge,
                "Total memory in bytes",
                &[],
            )?,
            memory_used: registry.register(
                "node_memory_used_bytes",
                MetricKind::Gauge,
                "Used memory in bytes",
                &[],
            )?,
            memory_available: registry.register(
                "node_memory_available_bytes",
                MetricKind::Gauge,
                "Available memory in bytes",
                &[],
            )?,
            memory_usage_percent: registry.register(
                "node_memory_usage_percent",
                MetricKind::Gauge,
                "Memory usage percentage",
                &[],
            )?,
            swap_total: registry.register(
                "node_swap_total_bytes",
                MetricKind::Gauge,
                "Total swap in bytes",
                &[],
            )?,
            swap_used: registry.register(
                "node_swap_used_bytes",
                MetricKind::Gauge,
                "Used swap in bytes",
                &[],
            )?,
            swap_usage_percent: registry.register(
                "node_swap_usage_percent",
                MetricKind::Gauge,
                "Swap usage percentage",
                &[],
            )?,
            disk_total: registry.register(
                "node_disk_total_bytes",
                MetricKind::Gauge,
                "Total disk space in bytes",
                &["device", "mountpoint"],
            )?,
            disk_used: registry.register(
                "node_disk_used_bytes",
                MetricKind::Gauge,
                "Disk usage in bytes",
                &["device", "mountpoint"],
            )?,
            disk_usage_percent: registry.register(
                "node_disk_usage_percent",
                MetricKind::Gauge,
                "Disk usage percentage",
                &["device", "mountpoint"],
            )?,
            net_rx_bytes: registry.register(
                "node_network_receive_bytes_total",
                MetricKind::Counter,
                "Total bytes received",
                &["interface"],
            )?,
            net_tx_bytes: registry.register(
                "node_network_transmit_bytes_total",
                MetricKind::Counter,
                "Total bytes transmitted",
                &["interface"],
            )?,
            net_rx_packets: registry.register(
                "node_network_receive_packets_total",
                MetricKind::Counter,
                "Total packets received",
                &["interface"],
            )?,
            net_tx_packets: registry.register(
                "node_network_transmit_packets_total",
                MetricKind::Counter,
                "Total packets transmitted",
                &["interface"],
            )?,
        })
    }
}

/// Writes sampler readings into the registry; the registry's single writer.
pub struct MetricsUpdater {
    registry: Arc<RwLock<Registry>>,
    sampler: Arc<dyn Sampler>,
    series: ExporterSeries,
}

impl MetricsUpdater {
    pub fn new(
        registry: Arc<RwLock<Registry>>,
        sampler: Arc<dyn Sampler>,
    ) -> Result<Self, RegistryError> {
        let series = ExporterSeries::register(&mut registry.write());
        Ok(Self {
            registry,
            sampler,
            series: series?,
        })
    }

    /// Run one refresh cycle. Never raises; sampler failures are logged and
    /// turn the outcome into [`Refresh::Partial`].
    pub fn refresh(&self) -> Refresh {
        let steps: [(&str, fn(&Self) -> Result<()>); 5] = [
            ("cpu load", Self::refresh_load),
            ("cpu info", Self::refresh_cpu_info),
            ("memory", Self::refresh_memory),
            ("filesystems", Self::refresh_disks),
            ("network", Self::refresh_network),
        ];

        for (what, step) in steps {
            if let Err(err) = step(self) {
                tracing::warn!("refresh aborted at {what}: {err:#}");
                return Refresh::Partial;
            }
        }
        Refresh::Complete
    }

    /// Render the registry's current state in the Prometheus text format.
    pub fn render(&self) -> String {
        self.registry.read().render()
    }

    fn refresh_load(&self) -> Result<()> {
        let load = self.sampler.current_load()?;
        let mut registry = self.registry.write();
        registry.set_gauge(self.series.cpu_usage, &[], load.usage_percent)?;
        registry.set_gauge(self.series.load_average, &["1m"], load.load_avg.0)?;
        registry.set_gauge(self.series.load_average, &["5m"], load.load_avg.1)?;
        registry.set_gauge(self.series.load_average, &["15m"], load.load_avg.2)?;
        Ok(())
    }

    fn refresh_cpu_info(&self) -> Result<()> {
        let cpu = self.sampler.cpu_info()?;
        self.registry
            .write()
            .set_gauge(self.series.cpu_count, &[], cpu.cores as f64)?;
        Ok(())
    }

    fn refresh_memory(&self) -> Result<()> {
        let mem = self.sampler.memory()?;
        let usage_percent = if mem.total > 0 {
            mem.used as f64 / mem.total as f64 * 100.0
        } else {
            0.0
        };
        let swap_percent = if mem.swap_total > 0 {
            mem.swap_used as f64 / mem.swap_total as f64 * 100.0
        } else {
            0.0
        };

        let mut registry = self.registry.write();
        registry.set_gauge(self.series.memory_total, &[], mem.total as f64)?;
        registry.set_gauge(self.series.memory_used, &[], mem.used as f64)?;
        registry.set_gauge(self.series.memory_available, &[], mem.available as f64)?;
        registry.set_gauge(self.series.memory_usage_percent, &[], usage_percent)?;
        registry.set_gauge(self.series.swap_total, &[], mem.swap_total as f64)?;
        registry.set_gauge(self.series.swap_used, &[], mem.swap_used as f64)?;
        registry.set_gauge(self.series.swap_usage_percent, &[], swap_percent)?;
        Ok(())
    }

    fn refresh_disks(&self) -> Result<()> {
        let filesystems = self.sampler.filesystems()?;
        let mut registry = self.registry.write();
        for fs in &filesystems {
            let labels = [fs.device.as_str(), fs.mount.as_str()];
            registry.set_gauge(self.series.disk_total, &labels, fs.total as f64)?;
            registry.set_gauge(self.series.disk_used, &labels, fs.used as f64)?;
            registry.set_gauge(self.series.disk_usage_percent, &labels, fs.used_percent)?;
        }
        Ok(())
    }

    fn refresh_network(&self) -> Result<()> {
        let interfaces = self.sampler.network_interfaces()?;
        let mut registry = self.registry.write();
        for iface in interfaces.iter().filter(|i| !i.name.is_empty()) {
            let labels = [iface.name.as_str()];
            // The sampler reports cumulative totals, so counters are written
            // with absolute (replace) semantics rather than incremented.
            registry.set_counter_absolute(self.series.net_rx_bytes, &labels, iface.rx_bytes as f64)?;
            registry.set_counter_absolute(self.series.net_tx_bytes, &labels, iface.tx_bytes as f64)?;
            registry.set_counter_absolute(
                self.series.net_rx_packets,
                &labels,
                iface.rx_packets as f64,
            )?;
            registry.set_counter_absolute(
                self.series.net_tx_packets,
                &labels,
                iface.tx_packets as f64,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{
        CpuInfo, CpuLoad, FilesystemUsage, HostInfo, InterfaceCounters, MemoryInfo,
    };
    use anyhow::bail;
    use parking_lot::Mutex;

    /// Scriptable sampler: fixed readings, per-call failure switches, and a
    /// replaceable filesystem list for label-accumulation tests.
    #[derive(Default)]
    struct MockSampler {
        fail_memory: bool,
        fail_network: bool,
        filesystems: Mutex<Vec<FilesystemUsage>>,
        rx_bytes: Mutex<u64>,
    }

    impl MockSampler {
        fn with_disks(filesystems: Vec<FilesystemUsage>) -> Self {
            Self {
                filesystems: Mutex::new(filesystems),
                rx_bytes: Mutex::new(1024),
                ..Default::default()
            }
        }
    }

    fn disk(device: &str, mount: &str, used_percent: f64) -> FilesystemUsage {
        FilesystemUsage {
            device: device.to_string(),
            mount: mount.to_string(),
            total: 100_000_000_000,
            used: 40_000_000_000,
            used_percent,
        }
    }

    impl Sampler for MockSampler {
        fn current_load(&self) -> Result<CpuLoad> {
            Ok(CpuLoad {
                usage_percent: 42.5,
                load_avg: (0.52, 0.48, 0.35),
            })
        }

        fn cpu_info(&self) -> Result<CpuInfo> {
            Ok(CpuInfo {
                cores: 8,
                model: "Mock CPU".to_string(),
            })
        }

        fn memory(&self) -> Result<MemoryInfo> {
            if self.fail_memory {
                bail!("meminfo unavailable");
            }
            Ok(MemoryInfo {
                total: 8_000_000_000,
                used: 4_123_456_789,
                free: 3_000_000_000,
                available: 3_876_543_211,
                swap_total: 1_000_000_000,
                swap_used: 250_000_000,
            })
        }

        fn filesystems(&self) -> Result<Vec<FilesystemUsage>> {
            Ok(self.filesystems.lock().clone())
        }

        fn network_interfaces(&self) -> Result<Vec<InterfaceCounters>> {
            if self.fail_network {
                bail!("interface stats unsupported on this platform");
            }
            Ok(vec![
                InterfaceCounters {
                    name: "eth0".to_string(),
                    rx_bytes: *self.rx_bytes.lock(),
                    tx_bytes: 512,
                    rx_packets: 10,
                    tx_packets: 5,
                    rx_per_sec: 64.0,
                    tx_per_sec: 32.0,
                },
                InterfaceCounters {
                    name: String::new(),
                    rx_bytes: 999,
                    tx_bytes: 999,
                    rx_packets: 9,
                    tx_packets: 9,
                    rx_per_sec: 0.0,
                    tx_per_sec: 0.0,
                },
            ])
        }

        fn host(&self) -> Result<HostInfo> {
            Ok(HostInfo {
                platform: "linux".to_string(),
                distro: "Mock Linux 1.0".to_string(),
                hostname: "mockhost".to_string(),
                uptime_secs: 3_723,
            })
        }
    }

    fn updater_with(sampler: MockSampler) -> (Arc<MockSampler>, MetricsUpdater) {
        let sampler = Arc::new(sampler);
        let registry = Arc::new(RwLock::new(Registry::new()));
        let updater = MetricsUpdater::new(registry, sampler.clone()).unwrap();
        (sampler, updater)
    }

    #[test]
    fn complete_refresh_writes_every_series() {
        let (_, updater) = updater_with(MockSampler::with_disks(vec![disk("/dev/sda1", "/", 40.0)]));
        assert_eq!(updater.refresh(), Refresh::Complete);

        let output = updater.render();
        assert!(output.contains("node_cpu_usage_percent 42.5"));
        assert!(output.contains("node_cpu_count 8"));
        assert!(output.contains("node_load_average{period=\"1m\"} 0.52"));
        assert!(output.contains("node_memory_total_bytes 8000000000"));
        assert!(output.contains("node_swap_used_bytes 250000000"));
        assert!(output.contains("node_swap_usage_percent 25"));
        assert!(output.contains(
            "node_disk_usage_percent{device=\"/dev/sda1\",mountpoint=\"/\"} 40"
        ));
        assert!(output.contains("node_network_receive_bytes_total{interface=\"eth0\"} 1024"));
        assert!(output.contains("node_network_transmit_bytes_total{interface=\"eth0\"} 512"));
    }

    #[test]
    fn network_failure_keeps_earlier_writes() {
        let mut sampler = MockSampler::with_disks(vec![disk("/dev/sda1", "/", 40.0)]);
        sampler.fail_network = true;
        let (_, updater) = updater_with(sampler);

        assert_eq!(updater.refresh(), Refresh::Partial);

        let output = updater.render();
        // Memory and disk were sampled before the failing network call.
        assert!(output.contains("node_memory_used_bytes 4123456789"));
        assert!(output.contains(
            "node_disk_usage_percent{device=\"/dev/sda1\",mountpoint=\"/\"} 40"
        ));
        // Network series exist (HELP/TYPE) but hold no values.
        assert!(output.contains("# TYPE node_network_receive_bytes_total counter"));
        assert!(!output.contains("node_network_receive_bytes_total{"));
    }

    #[test]
    fn memory_failure_aborts_before_disks() {
        let mut sampler = MockSampler::with_disks(vec![disk("/dev/sda1", "/", 40.0)]);
        sampler.fail_memory = true;
        let (_, updater) = updater_with(sampler);

        assert_eq!(updater.refresh(), Refresh::Partial);

        let output = updater.render();
        assert!(output.contains("node_cpu_usage_percent 42.5"));
        assert!(!output.contains("node_disk_usage_percent{"));
    }

    #[test]
    fn removed_disk_keeps_last_known_series() {
        let sampler = MockSampler::with_disks(vec![
            disk("/dev/sda1", "/", 40.0),
            disk("/dev/sdb1", "/data", 75.0),
        ]);
        let (mock, updater) = updater_with(sampler);
        assert_eq!(updater.refresh(), Refresh::Complete);

        // /data disappears from the next sample.
        *mock.filesystems.lock() = vec![disk("/dev/sda1", "/", 41.0)];
        assert_eq!(updater.refresh(), Refresh::Complete);

        let output = updater.render();
        assert!(output.contains(
            "node_disk_usage_percent{device=\"/dev/sda1\",mountpoint=\"/\"} 41"
        ));
        assert!(output.contains(
            "node_disk_usage_percent{device=\"/dev/sdb1\",mountpoint=\"/data\"} 75"
        ));
    }

    #[test]
    fn network_counters_replace_rather_than_sum() {
        let (mock, updater) = updater_with(MockSampler::with_disks(vec![]));
        assert_eq!(updater.refresh(), Refresh::Complete);
        *mock.rx_bytes.lock() = 2048;
        assert_eq!(updater.refresh(), Refresh::Complete);

        assert!(updater
            .render()
            .contains("node_network_receive_bytes_total{interface=\"eth0\"} 2048"));
    }

    #[test]
    fn empty_interface_names_are_skipped() {
        let (_, updater) = updater_with(MockSampler::with_disks(vec![]));
        assert_eq!(updater.refresh(), Refresh::Complete);
        assert!(!updater.render().contains("interface=\"\""));
    }
}
