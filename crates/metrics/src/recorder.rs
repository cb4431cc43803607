//! Installing the global recorder.

use tracing::{debug, info};

use crate::Result;

/// What `init_metrics` should install.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    /// Labels attached to every series, e.g. `("instance", "laptop")`.
    pub global_labels: Vec<(String, String)>,
}

/// Returned by `init_metrics`; renders the current values on demand.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    exporter: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Whether a recorder was installed.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        #[cfg(feature = "prometheus")]
        return self.exporter.is_some();
        #[cfg(not(feature = "prometheus"))]
        false
    }

    /// Prometheus text exposition of every series recorded so far, or an
    /// empty string when nothing is recording.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        if let Some(exporter) = &self.exporter {
            return exporter.render();
        }
        String::new()
    }
}

/// Install the process-wide recorder. Call once, before any connector starts.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        debug!("metrics disabled in config");
        return Ok(MetricsHandle::default());
    }

    #[cfg(feature = "prometheus")]
    {
        let exporter = install_prometheus(config.global_labels)?;
        info!("recording metrics in-process");
        Ok(MetricsHandle {
            exporter: Some(exporter),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!("built without the prometheus feature; metrics are discarded");
        Ok(MetricsHandle::default())
    }
}

#[cfg(feature = "prometheus")]
fn install_prometheus(
    global_labels: Vec<(String, String)>,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use {
        crate::{buckets, dispatch, inbound},
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(dispatch::DURATION_SECONDS.into()),
            &buckets::DISPATCH_DURATION,
        )?
        .set_buckets_for_metric(
            Matcher::Full(inbound::BATCH_SIZE.into()),
            &buckets::BATCH_SIZE,
        )?;
    let builder = global_labels
        .into_iter()
        .fold(builder, |b, (key, value)| b.add_global_label(key, value));

    // No HTTP listener; the handle is rendered by the caller.
    Ok(builder.install_recorder()?)
}
