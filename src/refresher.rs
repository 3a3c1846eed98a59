use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::context::ExporterContext;
use crate::error::Result;
use crate::labels::{LabelRef, LabelSet};
use crate::mail::MailboxApi;
use crate::senders::aggregate_senders_for_label;

pub const SENDER_GAUGE_DESCRIPTION: &str = "Label sender info";

/// Recomputes the per-label gauges from the mailbox.
pub struct LabelMetricsRefresher {
    api: Arc<dyn MailboxApi>,
    labels: LabelSet,
    sender_labels: HashSet<String>,
    context: ExporterContext,
}

impl LabelMetricsRefresher {
    pub fn new(
        api: Arc<dyn MailboxApi>,
        labels: LabelSet,
        sender_labels: impl IntoIterator<Item = String>,
        context: ExporterContext,
    ) -> Self {
        Self {
            api,
            labels,
            sender_labels: sender_labels.into_iter().collect(),
            context,
        }
    }

    /// Runs one refresh cycle over every monitored label, in order.
    ///
    /// A failing label is logged and skipped. The only error returned is a
    /// failure to resolve the label set; [`ExporterError::NoLabels`] among
    /// those is fatal.
    ///
    /// [`ExporterError::NoLabels`]: crate::error::ExporterError::NoLabels
    pub async fn refresh_all(&self) -> Result<()> {
        info!("Updating gmail metrics - started");
        let started = Instant::now();

        let labels = self.labels.resolve(self.api.as_ref()).await?;

        for label in labels {
            if let Err(e) = self.refresh_label(label).await {
                error!("Error refreshing label {}: {}", label.id, e);
            }
        }

        info!(
            "Updating gmail metrics - complete in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    async fn refresh_label(&self, label: &LabelRef) -> Result<()> {
        let label_info = self.api.get_label(&label.id).await?;
        let registry = &self.context.registry;

        registry
            .get_or_create_gauge(
                &format!("{}_total", label_info.id),
                &format!("{} Total", label_info.name),
                &[],
            )
            .set(label_info.threads_total as f64)?;

        registry
            .get_or_create_gauge(
                &format!("{}_unread", label_info.id),
                &format!("{} Unread", label_info.name),
                &[],
            )
            .set(label_info.threads_unread as f64)?;

        if self.sender_labels.contains(&label.id) {
            self.update_sender_gauges_for_label(&label_info.id).await?;
        }

        Ok(())
    }

    async fn update_sender_gauges_for_label(&self, label_id: &str) -> Result<()> {
        let sender_counts =
            aggregate_senders_for_label(self.api.as_ref(), &self.context.sender_cache, label_id)
                .await?;

        let gauge = self.context.registry.get_or_create_gauge(
            &format!("{}_sender", label_id),
            SENDER_GAUGE_DESCRIPTION,
            &["sender"],
        );

        for (sender, count) in &sender_counts {
            gauge.set_labelled(&[sender.as_str()], *count as f64)?;
        }

        Ok(())
    }
}
