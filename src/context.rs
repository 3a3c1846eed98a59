use std::sync::Arc;

use crate::readiness::Readiness;
use crate::registry::MetricRegistry;
use crate::senders::SenderCache;

/// State shared between the refresh scheduler and the HTTP server.
#[derive(Clone, Default)]
pub struct ExporterContext {
    pub readiness: Readiness,
    pub registry: Arc<MetricRegistry>,
    pub sender_cache: Arc<SenderCache>,
}

impl ExporterContext {
    pub fn new(readiness: Readiness, registry: MetricRegistry) -> Self {
        Self {
            readiness,
            registry: Arc::new(registry),
            sender_cache: Arc::new(SenderCache::new()),
        }
    }
}
