use crate::models::host::Host;
use crate::models::log_entry::{LogEntry, LogEntryView};
use crate::models::query::StoreStats;
use crate::service::udp_listener::IngestMetricsSnapshot;
use serde::{Deserialize, Serialize, Serializer};

/// Response for GET /api/logs
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    #[serde(serialize_with = "serialize_views")]
    pub entries: Vec<LogEntry>,
    /// Entries matching the filters, ignoring limit and offset
    pub total: i64,
    pub limit: usize,
    pub offset: usize,
}

fn serialize_views<S: Serializer>(entries: &[LogEntry], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(entries.iter().map(LogEntryView::from))
}

/// Response for GET /api/stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub store: StoreStats,
    pub live_subscribers: usize,
    /// Present while the UDP listener is running
    pub ingest: Option<IngestMetricsSnapshot>,
}

/// Response for GET /api/hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsResponse {
    pub hosts: Vec<Host>,
}

/// Body of POST /api/hosts/<ip>/name. A blank name clears the override.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenameHostRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Body of POST /api/markers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarkerRequest {
    #[serde(default)]
    pub label: Option<String>,

    /// ISO-8601; defaults to now
    #[serde(default)]
    pub timestamp: Option<String>,

    /// One of default, info, success, warning, danger
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerResponse {
    pub ok: bool,
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Generic API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}
