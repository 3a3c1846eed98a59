use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{ExporterError, Result};
use crate::mail::MailboxApi;

/// A label to monitor. Configured labels carry only their identifier;
/// discovered labels also carry the display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRef {
    pub id: String,
    pub name: Option<String>,
}

impl LabelRef {
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Resolves the set of labels once and keeps it for the process lifetime.
pub struct LabelSet {
    configured: Vec<String>,
    resolved: OnceCell<Vec<LabelRef>>,
}

impl LabelSet {
    pub fn new(configured: Vec<String>) -> Self {
        Self {
            configured,
            resolved: OnceCell::new(),
        }
    }

    /// Configured labels are returned unvalidated. With none configured every
    /// label in the mailbox is listed; an empty mailbox is
    /// [`ExporterError::NoLabels`]. A failed discovery is retried on the next
    /// call.
    pub async fn resolve(&self, api: &dyn MailboxApi) -> Result<&[LabelRef]> {
        let labels = self
            .resolved
            .get_or_try_init(|| async {
                info!("Getting metadata about labels");

                let labels: Vec<LabelRef> = if self.configured.is_empty() {
                    warn!("No labels specified, assuming all labels. If you have a lot of labels in your inbox you could hit API limits quickly.");

                    api.list_labels()
                        .await?
                        .into_iter()
                        .map(|label| LabelRef {
                            id: label.id,
                            name: Some(label.name),
                        })
                        .collect()
                } else {
                    info!("Using labels: {:?}", self.configured);
                    self.configured.iter().map(LabelRef::from_id).collect()
                };

                if labels.is_empty() {
                    return Err(ExporterError::NoLabels);
                }

                Ok::<_, ExporterError>(labels)
            })
            .await?;

        Ok(labels.as_slice())
    }

    pub fn resolved(&self) -> Option<&[LabelRef]> {
        self.resolved.get().map(Vec::as_slice)
    }
}
