use crate::api_state::AppState;
use crate::models::api::*;
use crate::models::error::{ErrorKind, LogHubError, Result};
use crate::models::log_entry::{LogEntry, LogEntryView, NewLogEntry};
use crate::models::marker_style::MarkerStyle;
use crate::models::query::{LogFilter, LogQuery, SortField, SortOrder};
use crate::models::syslog::{facility_name, severity_name};
use crate::service::broadcast::Delivery;
use crate::utils::time::{format_db_time, parse_iso8601};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rocket::futures::{SinkExt, StreamExt};
use rocket::http::{Header, Status};
use rocket::request::Request;
use rocket::response::{self, status, Responder};
use rocket::serde::json::Json;
use rocket::{Route, State};
use rocket_ws::{Channel, Message, WebSocket};
use std::io;

/// Limits and default ordering for one listing endpoint.
struct Paging {
    default_limit: usize,
    max_limit: usize,
    default_sort_order: SortOrder,
}

const LOGS_PAGING: Paging = Paging {
    default_limit: 200,
    max_limit: 5000,
    default_sort_order: SortOrder::Desc,
};

const EXPORT_PAGING: Paging = Paging {
    default_limit: 10_000,
    max_limit: 100_000,
    default_sort_order: SortOrder::Asc,
};

const CSV_HEADER: [&str; 11] = [
    "ID",
    "Timestamp",
    "Received At",
    "Source IP",
    "Hostname",
    "Facility",
    "Severity",
    "App Name",
    "Message",
    "Is Syslog",
    "Is Marker",
];

/// Error returned by API handlers, rendered as `{error, details}`.
#[derive(Debug)]
pub struct ApiError(pub LogHubError);

impl From<LogHubError> for ApiError {
    fn from(error: LogHubError) -> Self {
        ApiError(error)
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::Invalid => Status::BadRequest,
            ErrorKind::NotFound => Status::NotFound,
            ErrorKind::Transient => Status::ServiceUnavailable,
            ErrorKind::Internal => Status::InternalServerError,
        };

        match kind {
            ErrorKind::Internal => error!("{} {} failed: {}", request.method(), request.uri(), self.0),
            ErrorKind::Transient => warn!("{} {} failed: {}", request.method(), request.uri(), self.0),
            _ => debug!("{} {} rejected: {}", request.method(), request.uri(), self.0),
        }

        let body = ErrorResponse {
            error: kind.as_str().to_string(),
            details: Some(self.0.to_string()),
        };
        status::Custom(status, Json(body)).respond_to(request)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Runs blocking storage work off the async executor.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LogHubError::Io(io::Error::other(e)))?
        .map_err(ApiError::from)
}

/// Query string shared by GET /api/logs and GET /api/export. Everything is
/// taken as text so malformed values become validation errors, not defaults.
#[derive(Debug, Default, FromForm)]
pub struct LogsParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub source_ip: Option<String>,
    pub hostname: Option<String>,
    pub severity: Option<String>,
    pub search: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub include_markers: Option<String>,
    pub after_id: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_int(name: &str, value: &Option<String>) -> Result<Option<i64>> {
    present(value)
        .map(|v| {
            v.parse::<i64>().map_err(|_| {
                LogHubError::Validation(format!("{} must be an integer, got '{}'", name, v))
            })
        })
        .transpose()
}

fn parse_bool(name: &str, value: &Option<String>) -> Result<Option<bool>> {
    present(value)
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(LogHubError::Validation(format!(
                "{} must be true or false, got '{}'",
                name, v
            ))),
        })
        .transpose()
}

fn parse_time(name: &str, value: &Option<String>) -> Result<Option<DateTime<Utc>>> {
    present(value)
        .map(|v| {
            parse_iso8601(v).ok_or_else(|| {
                LogHubError::Validation(format!("{} is not an ISO-8601 timestamp: '{}'", name, v))
            })
        })
        .transpose()
}

impl LogsParams {
    fn to_query(&self, paging: &Paging) -> Result<LogQuery> {
        let limit = match parse_int("limit", &self.limit)? {
            None => paging.default_limit,
            Some(limit) if limit >= 1 && limit <= paging.max_limit as i64 => limit as usize,
            Some(_) => {
                return Err(LogHubError::Validation(format!(
                    "limit must be between 1 and {}",
                    paging.max_limit
                )))
            }
        };

        let offset = match parse_int("offset", &self.offset)? {
            None => 0,
            Some(offset) if offset >= 0 => offset as usize,
            Some(_) => {
                return Err(LogHubError::Validation(
                    "offset must not be negative".to_string(),
                ))
            }
        };

        let severity = match parse_int("severity", &self.severity)? {
            None => None,
            Some(severity) if (0..=7).contains(&severity) => Some(severity as u8),
            Some(_) => {
                return Err(LogHubError::Validation(
                    "severity must be between 0 and 7".to_string(),
                ))
            }
        };

        let after_id = match parse_int("after_id", &self.after_id)? {
            Some(id) if id < 0 => {
                return Err(LogHubError::Validation(
                    "after_id must not be negative".to_string(),
                ))
            }
            other => other,
        };

        let sort_by = match present(&self.sort_by) {
            Some(value) => value.parse::<SortField>().map_err(LogHubError::Validation)?,
            None => SortField::default(),
        };
        let sort_order = match present(&self.sort_order) {
            Some(value) => value.parse::<SortOrder>().map_err(LogHubError::Validation)?,
            None => paging.default_sort_order,
        };

        Ok(LogQuery {
            filter: LogFilter {
                source_ip: present(&self.source_ip).map(str::to_string),
                hostname: present(&self.hostname).map(str::to_string),
                severity,
                search: present(&self.search).map(str::to_string),
                start_time: parse_time("start_time", &self.start_time)?,
                end_time: parse_time("end_time", &self.end_time)?,
                include_markers: parse_bool("include_markers", &self.include_markers)?
                    .unwrap_or(true),
                after_id,
            },
            sort_by,
            sort_order,
            limit,
            offset,
        })
    }
}

/// GET /api/logs - Filtered, paginated history
#[get("/logs?<params..>")]
pub async fn get_logs(params: LogsParams, state: &State<AppState>) -> ApiResult<Json<LogsResponse>> {
    let query = params.to_query(&LOGS_PAGING)?;
    let (limit, offset) = (query.limit, query.offset);
    let store = state.store();

    let page = blocking(move || store.query(&query)).await?;

    Ok(Json(LogsResponse {
        entries: page.entries,
        total: page.total,
        limit,
        offset,
    }))
}

/// GET /api/hosts - Every sender seen so far
#[get("/hosts")]
pub async fn get_hosts(state: &State<AppState>) -> ApiResult<Json<HostsResponse>> {
    let store = state.store();
    let hosts = blocking(move || store.list_hosts()).await?;
    Ok(Json(HostsResponse { hosts }))
}

/// POST /api/hosts/<ip>/name - Set or clear a host's display name
#[post("/hosts/<ip>/name", format = "json", data = "<request>")]
pub async fn rename_host(
    ip: String,
    request: Json<RenameHostRequest>,
    state: &State<AppState>,
) -> ApiResult<Json<OkResponse>> {
    let display_name = request.into_inner().display_name;
    let store = state.store();
    blocking(move || store.rename_host(&ip, display_name.as_deref())).await?;
    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/markers - Annotate the timeline
#[post("/markers", format = "json", data = "<request>")]
pub async fn create_marker(
    request: Json<MarkerRequest>,
    state: &State<AppState>,
) -> ApiResult<Json<MarkerResponse>> {
    let request = request.into_inner();

    let label = present(&request.label)
        .ok_or_else(|| LogHubError::Validation("label is required".to_string()))?
        .to_string();
    let timestamp = parse_time("timestamp", &request.timestamp)?;
    let style = match present(&request.style) {
        Some(style) => style.parse::<MarkerStyle>().map_err(LogHubError::Validation)?,
        None => MarkerStyle::default(),
    };

    let pipeline = state.pipeline().clone();
    let marker = blocking(move || pipeline.submit(NewLogEntry::marker(&label, timestamp, style))).await?;

    info!("Marker {} added: {}", marker.id, marker.message);
    Ok(Json(MarkerResponse {
        ok: true,
        id: marker.id,
    }))
}

#[derive(Responder)]
#[response(content_type = "text/csv")]
pub struct CsvExport {
    body: Vec<u8>,
    disposition: Header<'static>,
}

/// GET /api/export - Filtered history as a CSV download
#[get("/export?<params..>")]
pub async fn export_logs(params: LogsParams, state: &State<AppState>) -> ApiResult<CsvExport> {
    let query = params.to_query(&EXPORT_PAGING)?;
    let store = state.store();

    let body = blocking(move || {
        let page = store.query(&query)?;
        entries_to_csv(&page.entries)
    })
    .await?;

    let filename = format!("logs_export_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"));
    Ok(CsvExport {
        body,
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename={}", filename),
        ),
    })
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

pub fn entries_to_csv(entries: &[LogEntry]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for entry in entries {
        writer.write_record([
            entry.id.to_string().as_str(),
            entry
                .timestamp
                .as_ref()
                .map(format_db_time)
                .unwrap_or_default()
                .as_str(),
            format_db_time(&entry.received_at).as_str(),
            entry.source_ip.as_str(),
            entry.hostname.as_deref().unwrap_or(""),
            entry.facility.map(facility_name).unwrap_or(""),
            entry.severity.map(severity_name).unwrap_or(""),
            entry.app_name.as_deref().unwrap_or(""),
            entry.message.as_str(),
            yes_no(entry.is_syslog),
            yes_no(entry.is_marker),
        ])?;
    }

    writer.into_inner().map_err(|e| LogHubError::Io(e.into_error()))
}

/// GET /api/stats - Storage totals and live counters
#[get("/stats")]
pub async fn get_stats(state: &State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let store = state.store();
    let stats = blocking(move || store.stats()).await?;

    Ok(Json(StatsResponse {
        store: stats,
        live_subscribers: state.hub().subscriber_count(),
        ingest: state.ingest_metrics().map(|metrics| metrics.snapshot()),
    }))
}

/// GET /api/health - Liveness check
#[get("/health")]
pub fn health_check() -> &'static str {
    "OK"
}

/// Answer to a text frame from a live-feed client, if it needs one.
pub fn reply_to_client_text(text: &str) -> Option<&'static str> {
    if text.trim() == "ping" {
        Some("pong")
    } else {
        None
    }
}

/// GET /ws - Live feed of committed entries
#[get("/ws")]
pub fn live_feed(ws: WebSocket, state: &State<AppState>) -> Channel<'static> {
    let mut subscription = state.hub().subscribe();

    ws.channel(move |mut stream| {
        Box::pin(async move {
            let id = subscription.id();
            loop {
                tokio::select! {
                    delivery = subscription.recv() => match delivery {
                        Delivery::Entry(entry) => {
                            match serde_json::to_string(&LogEntryView::from(entry.as_ref())) {
                                Ok(text) => stream.send(Message::Text(text)).await?,
                                Err(e) => error!("Failed to serialize entry {}: {}", entry.id, e),
                            }
                        }
                        Delivery::Lagged(skipped) => {
                            // Closing makes the client reconnect and catch up on what it missed
                            warn!("Live subscriber {} fell {} entries behind, closing", id, skipped);
                            let _ = stream.send(Message::Close(None)).await;
                            break;
                        }
                        Delivery::Closed => {
                            let _ = stream.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = reply_to_client_text(&text) {
                                stream.send(Message::Text(reply.to_string())).await?;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("Live subscriber {} connection error: {}", id, e);
                            break;
                        }
                    }
                }
            }
            debug!("Live subscriber {} finished", id);
            Ok(())
        })
    })
}

/// Errors raised by rocket itself (no matching route, unparsable JSON
/// body) get the same `{error, details}` body as handler errors.
#[catch(default)]
pub fn json_catcher(status: Status, request: &Request) -> status::Custom<Json<ErrorResponse>> {
    let kind = match status.code {
        400 | 415 | 422 => ErrorKind::Invalid,
        404 => ErrorKind::NotFound,
        503 => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    };
    debug!("{} {} caught with status {}", request.method(), request.uri(), status);

    status::Custom(
        status,
        Json(ErrorResponse {
            error: kind.as_str().to_string(),
            details: Some(format!(
                "{} {}: {}",
                request.method(),
                request.uri(),
                status.reason_lossy()
            )),
        }),
    )
}

/// Routes mounted under `/api`
pub fn api_routes() -> Vec<Route> {
    routes![
        get_logs,
        get_hosts,
        rename_host,
        create_marker,
        export_logs,
        get_stats,
        health_check,
    ]
}
