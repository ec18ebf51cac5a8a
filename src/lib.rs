//! System resource exporter: samples host CPU, memory, disk, and network
//! state and serves it as Prometheus text (`/metrics`), a JSON API
//! (`/api/metrics`), and an HTML dashboard.

pub mod registry;
pub mod sampler;
pub mod server;
pub mod snapshot;
pub mod updater;
