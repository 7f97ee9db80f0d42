use std::net::SocketAddr;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::core::config::Settings;

/// Installs the Prometheus recorder with its own scrape listener.
///
/// Must be called from inside a Tokio runtime; the exporter spawns its listener there.
pub fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let raw = &settings.telemetry().prometheus_listen;
    let listen: SocketAddr =
        raw.parse().with_context(|| format!("Invalid PROMETHEUS_LISTEN: {raw}"))?;

    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .context("Failed to install Prometheus exporter")?;

    tracing::info!(%listen, "Prometheus exporter listening");
    Ok(())
}
