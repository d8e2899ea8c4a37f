//! Prometheus text file output for node_exporter's textfile collector.

use std::path::Path;

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};

use reconcile_core::metrics;

/// Registry holding every reconciliation metric.
pub fn registry() -> Result<Registry> {
    let registry = Registry::new();
    for collector in metrics::all_metrics() {
        registry
            .register(collector)
            .context("Failed to register metric")?;
    }
    Ok(registry)
}

/// Render `registry` in the text exposition format.
pub fn render(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics are not valid UTF-8")
}

/// Write the metrics next to `path` and rename into place, so the collector
/// never reads a half-written file.
pub async fn write(registry: &Registry, path: &Path) -> Result<()> {
    let body = render(registry)?;
    let file_name = path
        .file_name()
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));

    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;
    Ok(())
}
