//! `[metrics]` section
//!
//! Controls the HTTP exporter for the allocator counters:
//!
//! - `GET /metrics` Prometheus text, refreshed from the allocator per scrape
//! - `GET /stats` the allocator-wide counters as JSON
//! - `GET /health` liveness

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Start the exporter alongside the simulator
    pub enabled: bool,
    /// Listen address, loopback only unless set otherwise
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 9100)),
        }
    }
}

impl MetricsConfig {
    /// URL of the Prometheus endpoint, for log lines and docs
    pub fn scrape_url(&self) -> String {
        format!("http://{}/metrics", self.bind)
    }
}
