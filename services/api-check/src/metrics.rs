//! Prometheus exposition for the check run
//!
//! The client crate records its counters through the `metrics` facade; this
//! installs the recorder that collects them so `--metrics` can print them.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
