use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use metrics::{Key, KeyName, Label, Recorder, SharedString};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use metrics_util::MetricKindMask;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ExporterError, Result};

pub const METRIC_PREFIX: &str = "gmail_";

/// Gauges untouched for this long are dropped from the exposition.
const STALE_GAUGE_DAYS: i64 = 365;

/// A named gauge family with a fixed set of label dimensions.
pub struct RegisteredGauge {
    name: String,
    dimensions: Vec<String>,
    recorder: Arc<PrometheusRecorder>,
}

impl RegisteredGauge {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn set(&self, value: f64) -> Result<()> {
        self.set_labelled(&[], value)
    }

    /// Assigns the gauge for one combination of label values, given in
    /// dimension order.
    pub fn set_labelled(&self, values: &[&str], value: f64) -> Result<()> {
        if values.len() != self.dimensions.len() {
            return Err(ExporterError::Metric(format!(
                "{} expects {} label values, got {}",
                self.name,
                self.dimensions.len(),
                values.len()
            )));
        }

        let labels: Vec<Label> = self
            .dimensions
            .iter()
            .zip(values)
            .map(|(dimension, value)| Label::new(dimension.clone(), value.to_string()))
            .collect();

        self.recorder
            .register_gauge(&Key::from_parts(self.name.clone(), labels))
            .set(value);

        Ok(())
    }
}

/// Process-scoped gauge table backed by its own Prometheus recorder.
pub struct MetricRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    gauges: Mutex<HashMap<String, Arc<RegisteredGauge>>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::with_instance_id(None)
    }

    /// Builds the registry, optionally tagging every series with an
    /// `instance_id` label.
    pub fn with_instance_id(instance_id: Option<Uuid>) -> Self {
        let mut builder = PrometheusBuilder::new().idle_timeout(
            MetricKindMask::ALL,
            chrono::Duration::days(STALE_GAUGE_DAYS).to_std().ok(),
        );

        if let Some(instance_id) = instance_id {
            builder = builder.add_global_label("instance_id", instance_id.to_string());
        }

        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        Self {
            recorder: Arc::new(recorder),
            handle,
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the gauge registered under `name`, creating it on first use.
    ///
    /// `name` is given without the `gmail_` prefix. On a cache hit the
    /// description and dimensions arguments are ignored, even if they differ
    /// from the ones the gauge was created with.
    pub fn get_or_create_gauge(
        &self,
        name: &str,
        description: &str,
        dimensions: &[&str],
    ) -> Arc<RegisteredGauge> {
        let mut gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(gauge) = gauges.get(name) {
            return Arc::clone(gauge);
        }

        let full_name = format!("{}{}", METRIC_PREFIX, name);
        debug!("registering gauge {}", full_name);

        self.recorder.describe_gauge(
            KeyName::from(full_name.clone()),
            None,
            SharedString::from(description.to_owned()),
        );

        let gauge = Arc::new(RegisteredGauge {
            name: full_name,
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            recorder: Arc::clone(&self.recorder),
        });
        gauges.insert(name.to_owned(), Arc::clone(&gauge));

        gauge
    }

    pub fn len(&self) -> usize {
        self.gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prometheus text exposition of every gauge set so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_returns_same_handle() {
        let registry = MetricRegistry::new();

        let first = registry.get_or_create_gauge("INBOX_total", "INBOX Total", &[]);
        let second = registry.get_or_create_gauge("INBOX_total", "something else", &["sender"]);

        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.dimensions().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_are_prefixed() {
        let registry = MetricRegistry::new();
        let gauge = registry.get_or_create_gauge("INBOX_unread", "INBOX Unread", &[]);
        assert_eq!(gauge.name(), "gmail_INBOX_unread");
    }

    #[test]
    fn test_set_is_absolute() {
        let registry = MetricRegistry::new();
        let gauge = registry.get_or_create_gauge("INBOX_total", "INBOX Total", &[]);

        gauge.set(7.0).unwrap();
        gauge.set(10.0).unwrap();

        let rendered = registry.render();
        assert!(rendered.contains("gmail_INBOX_total 10"));
        assert!(rendered.contains("INBOX Total"));
    }

    #[test]
    fn test_labelled_gauge() {
        let registry = MetricRegistry::new();
        let gauge = registry.get_or_create_gauge("INBOX_sender", "Label sender info", &["sender"]);

        gauge.set_labelled(&["alice@example.com"], 2.0).unwrap();

        let rendered = registry.render();
        assert!(rendered.contains(r#"gmail_INBOX_sender{sender="alice@example.com"} 2"#));
    }

    #[test]
    fn test_label_value_count_mismatch() {
        let registry = MetricRegistry::new();
        let gauge = registry.get_or_create_gauge("INBOX_sender", "Label sender info", &["sender"]);

        assert!(matches!(gauge.set(1.0), Err(ExporterError::Metric(_))));
    }

    #[test]
    fn test_instance_label() {
        let registry = MetricRegistry::with_instance_id(Some(Uuid::nil()));
        let gauge = registry.get_or_create_gauge("INBOX_total", "INBOX Total", &[]);
        gauge.set(1.0).unwrap();

        assert!(registry
            .render()
            .contains(r#"instance_id="00000000-0000-0000-0000-000000000000""#));
    }
}
