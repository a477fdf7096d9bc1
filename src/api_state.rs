use crate::repo::sqlite::LogStore;
use crate::service::broadcast::BroadcastHub;
use crate::service::pipeline::IngestPipeline;
use crate::service::udp_listener::IngestMetrics;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Storage plus live fan-out; markers go through here like datagrams
    pipeline: IngestPipeline,

    /// Counters of the running UDP listener, if there is one
    ingest_metrics: Option<Arc<IngestMetrics>>,
}

impl AppState {
    /// Create a new application state
    pub fn new(pipeline: IngestPipeline) -> Self {
        Self {
            pipeline,
            ingest_metrics: None,
        }
    }

    /// Attach the UDP listener's counters for reporting
    pub fn with_ingest_metrics(mut self, metrics: Arc<IngestMetrics>) -> Self {
        self.ingest_metrics = Some(metrics);
        self
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> Arc<LogStore> {
        Arc::clone(self.pipeline.store())
    }

    pub fn hub(&self) -> &BroadcastHub {
        self.pipeline.hub()
    }

    pub fn ingest_metrics(&self) -> Option<&Arc<IngestMetrics>> {
        self.ingest_metrics.as_ref()
    }
}
