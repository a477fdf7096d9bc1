use crate::models::log_entry::LogEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Conjunctive filters for a history query. `None` means "don't filter".
#[derive(Debug, Clone, PartialEq)]
pub struct LogFilter {
    pub source_ip: Option<String>,
    /// Case-insensitive substring of the hostname or the host's display name.
    pub hostname: Option<String>,
    /// Keep entries with `severity <= value`; raw entries never match.
    pub severity: Option<u8>,
    pub search: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub include_markers: bool,
    /// Keep entries with `id > value`.
    pub after_id: Option<i64>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            source_ip: None,
            hostname: None,
            severity: None,
            search: None,
            start_time: None,
            end_time: None,
            include_markers: true,
            after_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    ReceivedAt,
    Timestamp,
    Severity,
    SourceIp,
    Hostname,
    Id,
}

impl SortField {
    /// SQL expression to order by. `timestamp` falls back to arrival time
    /// for entries that claimed none.
    pub fn column(&self) -> &'static str {
        match self {
            SortField::ReceivedAt => "received_at",
            SortField::Timestamp => "COALESCE(timestamp, received_at)",
            SortField::Severity => "severity",
            SortField::SourceIp => "source_ip",
            SortField::Hostname => "hostname",
            SortField::Id => "id",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received_at" => Ok(SortField::ReceivedAt),
            "timestamp" => Ok(SortField::Timestamp),
            "severity" => Ok(SortField::Severity),
            "source_ip" => Ok(SortField::SourceIp),
            "hostname" => Ok(SortField::Hostname),
            "id" => Ok(SortField::Id),
            other => Err(format!(
                "Unknown sort_by '{}', expected one of: received_at, timestamp, severity, source_ip, hostname, id",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(SortOrder::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(SortOrder::Desc)
        } else {
            Err(format!("Unknown sort_order '{}', expected ASC or DESC", s))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub filter: LogFilter,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub limit: usize,
    pub offset: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            filter: LogFilter::default(),
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            limit: 200,
            offset: 0,
        }
    }
}

/// One page of results plus the number of entries matching the filters.
#[derive(Debug, Clone)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_entries: i64,
    pub known_hosts: i64,
    pub latest_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_field_parsing() {
        assert_eq!("severity".parse::<SortField>().unwrap(), SortField::Severity);
        assert_eq!("id".parse::<SortField>().unwrap(), SortField::Id);
        assert!("message".parse::<SortField>().is_err());
        assert!("received_at; DROP TABLE log_entries".parse::<SortField>().is_err());
    }

    #[test]
    fn test_sort_order_is_case_insensitive() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("up".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_defaults() {
        let query = LogQuery::default();
        assert_eq!(query.sort_by, SortField::ReceivedAt);
        assert_eq!(query.sort_order, SortOrder::Desc);
        assert!(query.filter.include_markers);
        assert_eq!(query.limit, 200);
    }
}
