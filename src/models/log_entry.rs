use crate::models::marker_style::MarkerStyle;
use crate::models::syslog::{facility_name, severity_name, MARKER_SOURCE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored log entry. `id` is assigned by storage and orders all entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub source_ip: String,
    pub source_port: Option<u16>,
    pub hostname: Option<String>,
    pub facility: Option<u8>,
    pub severity: Option<u8>,
    pub priority: Option<u8>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub message: String,
    pub raw_message: String,
    pub is_syslog: bool,
    pub is_marker: bool,
    pub marker_style: Option<MarkerStyle>,
}

/// An entry waiting to be committed; storage fills in `id` and `received_at`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewLogEntry {
    pub timestamp: Option<DateTime<Utc>>,
    pub source_ip: String,
    pub source_port: Option<u16>,
    pub hostname: Option<String>,
    pub facility: Option<u8>,
    pub severity: Option<u8>,
    pub priority: Option<u8>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub message: String,
    pub raw_message: String,
    pub is_syslog: bool,
    pub is_marker: bool,
    pub marker_style: Option<MarkerStyle>,
}

impl NewLogEntry {
    /// Builds a timeline marker. Markers never carry facility or severity.
    pub fn marker(label: &str, timestamp: Option<DateTime<Utc>>, style: MarkerStyle) -> Self {
        Self {
            timestamp: Some(timestamp.unwrap_or_else(Utc::now)),
            source_ip: MARKER_SOURCE.to_string(),
            hostname: Some("MARKER".to_string()),
            message: label.to_string(),
            raw_message: format!("[MARKER] {}", label),
            is_marker: true,
            marker_style: Some(style),
            ..Default::default()
        }
    }

    pub fn into_entry(self, id: i64, received_at: DateTime<Utc>) -> LogEntry {
        LogEntry {
            id,
            timestamp: self.timestamp,
            received_at,
            source_ip: self.source_ip,
            source_port: self.source_port,
            hostname: self.hostname,
            facility: self.facility,
            severity: self.severity,
            priority: self.priority,
            app_name: self.app_name,
            proc_id: self.proc_id,
            msg_id: self.msg_id,
            message: self.message,
            raw_message: self.raw_message,
            is_syslog: self.is_syslog,
            is_marker: self.is_marker,
            marker_style: self.marker_style,
        }
    }
}

/// Wire form of an entry: every stored field plus readable level names.
#[derive(Debug, Serialize)]
pub struct LogEntryView<'a> {
    #[serde(flatten)]
    pub entry: &'a LogEntry,
    pub severity_name: Option<&'static str>,
    pub facility_name: Option<&'static str>,
}

impl<'a> From<&'a LogEntry> for LogEntryView<'a> {
    fn from(entry: &'a LogEntry) -> Self {
        Self {
            entry,
            severity_name: entry.severity.map(severity_name),
            facility_name: entry.facility.map(facility_name),
        }
    }
}
