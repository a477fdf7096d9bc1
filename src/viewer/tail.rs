use crate::models::log_entry::LogEntry;
use crate::models::syslog::severity_name;
use crate::viewer::feed_state::{BackoffPolicy, FeedAction, FeedSession};
use anyhow::{bail, Context, Result};
use futures_util::future::OptionFuture;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const CATCH_UP_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Base URL of the web server, e.g. `http://127.0.0.1:8080`
    pub server: String,
    /// Most entries fetched when catching up after a reconnect
    pub catch_up_limit: usize,
    pub ping_interval: Duration,
    /// Entries kept in memory
    pub history: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:8080".to_string(),
            catch_up_limit: 5000,
            ping_interval: Duration::from_secs(30),
            history: 10_000,
        }
    }
}

#[derive(Deserialize)]
struct LogsPage {
    entries: Vec<LogEntry>,
}

/// Follows the live feed forever, reconnecting with backoff and filling
/// any gap from history after each reconnect.
pub async fn run_tail(options: TailOptions) -> Result<()> {
    let server = options.server.trim_end_matches('/').to_string();
    let ws_url = websocket_url(&server)?;
    let client = reqwest::Client::new();
    let mut session = FeedSession::new(BackoffPolicy::default(), options.history);

    let mut action = session.start();
    loop {
        action = match action {
            FeedAction::Connect => match connect_async(ws_url.as_str()).await {
                Ok((stream, _)) => {
                    info!("Connected to {}", ws_url);
                    let next = session.opened();
                    follow(stream, &mut session, &client, &server, &options, next).await
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", ws_url, e);
                    session.closed()
                }
            },
            FeedAction::Wait(delay) => {
                info!("Reconnecting in {}s", delay.as_secs());
                tokio::time::sleep(delay).await;
                session.backoff_elapsed()
            }
            other => bail!("Unexpected feed action {:?} outside a connection", other),
        };
    }
}

/// Runs one connection until it closes; returns the next action.
async fn follow(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session: &mut FeedSession,
    client: &reqwest::Client,
    server: &str,
    options: &TailOptions,
    first: FeedAction,
) -> FeedAction {
    let (mut sink, mut stream) = stream.split();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + options.ping_interval,
        options.ping_interval,
    );

    let mut catch_up = match first {
        FeedAction::FetchCatchUp { after_id } => {
            info!("Catching up on entries after {}", after_id);
            Some(Box::pin(fetch_catch_up(
                client,
                server,
                after_id,
                options.catch_up_limit,
            )))
        }
        _ => None,
    };

    loop {
        tokio::select! {
            Some(result) = OptionFuture::from(catch_up.as_mut()), if catch_up.is_some() => {
                catch_up = None;
                match result {
                    Ok(fetched) => {
                        let count = fetched.len();
                        for entry in session.finish_catch_up(fetched) {
                            print_entry(&entry);
                        }
                        info!(
                            "Caught up {} entries, {} held in view",
                            count,
                            session.view().len()
                        );
                    }
                    Err(e) => {
                        warn!("Catch-up failed, reconnecting: {:#}", e);
                        let _ = sink.close().await;
                        return session.closed();
                    }
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(entry) = parse_live_text(&text) {
                        for shown in session.on_live(entry) {
                            print_entry(&shown);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!("Live feed closed by server");
                    return session.closed();
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Live feed error: {}", e);
                    return session.closed();
                }
            },
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::text("ping")).await {
                    warn!("Keepalive failed: {}", e);
                    return session.closed();
                }
            }
        }
    }
}

/// Pages through `/api/logs` by id until a short page or `limit` entries.
async fn fetch_catch_up(
    client: &reqwest::Client,
    server: &str,
    after_id: i64,
    limit: usize,
) -> Result<Vec<LogEntry>> {
    let url = format!("{}/api/logs", server);
    let mut collected: Vec<LogEntry> = Vec::new();
    let mut cursor = after_id;

    while collected.len() < limit {
        let page_size = (limit - collected.len()).min(CATCH_UP_PAGE_SIZE);
        let page: LogsPage = client
            .get(&url)
            .query(&[
                ("after_id", cursor.to_string()),
                ("sort_by", "id".to_string()),
                ("sort_order", "ASC".to_string()),
                ("limit", page_size.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to query {}", url))?
            .error_for_status()
            .context("History query rejected")?
            .json()
            .await
            .context("Malformed history response")?;

        let fetched = page.entries.len();
        if let Some(last) = page.entries.last() {
            cursor = last.id;
        }
        collected.extend(page.entries);
        if fetched < page_size {
            return Ok(collected);
        }
    }

    warn!(
        "Catch-up stopped at {} entries, the rest of the gap is not shown",
        limit
    );
    Ok(collected)
}

/// Entries arrive as JSON; anything else (the `pong` reply) is ignored.
pub fn parse_live_text(text: &str) -> Option<LogEntry> {
    serde_json::from_str(text).ok()
}

/// `http://host:port` to `ws://host:port/ws`.
pub fn websocket_url(server: &str) -> Result<String> {
    let server = server.trim_end_matches('/');
    if let Some(rest) = server.strip_prefix("http://") {
        Ok(format!("ws://{}/ws", rest))
    } else if let Some(rest) = server.strip_prefix("https://") {
        Ok(format!("wss://{}/ws", rest))
    } else {
        bail!("Server URL must start with http:// or https://, got '{}'", server)
    }
}

pub fn format_entry(entry: &LogEntry) -> String {
    let time = entry
        .timestamp
        .unwrap_or(entry.received_at)
        .format("%Y-%m-%d %H:%M:%S");

    if entry.is_marker {
        return format!("{} ===== {} =====", time, entry.message);
    }

    let host = entry.hostname.as_deref().unwrap_or(&entry.source_ip);
    let level = entry.severity.map(severity_name).unwrap_or("-");
    match &entry.app_name {
        Some(app) => format!("{} {} {} {}: {}", time, host, level, app, entry.message),
        None => format!("{} {} {} {}", time, host, level, entry.message),
    }
}

fn print_entry(entry: &LogEntry) {
    println!("{}", format_entry(entry));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::log_entry::{LogEntryView, NewLogEntry};
    use crate::models::marker_style::MarkerStyle;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://127.0.0.1:8080").unwrap(),
            "ws://127.0.0.1:8080/ws"
        );
        assert_eq!(
            websocket_url("https://logs.example.com/").unwrap(),
            "wss://logs.example.com/ws"
        );
        assert!(websocket_url("logs.example.com").is_err());
    }

    #[test]
    fn test_parse_live_text() {
        let entry = NewLogEntry {
            source_ip: "10.0.0.1".to_string(),
            severity: Some(3),
            facility: Some(0),
            priority: Some(3),
            message: "oops".to_string(),
            raw_message: "<3>oops".to_string(),
            is_syslog: true,
            ..Default::default()
        }
        .into_entry(9, Utc::now());
        let text = serde_json::to_string(&LogEntryView::from(&entry)).unwrap();

        assert_eq!(parse_live_text(&text), Some(entry));
        assert_eq!(parse_live_text("pong"), None);
    }

    #[test]
    fn test_format_entry() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let entry = NewLogEntry {
            timestamp: Some(at),
            source_ip: "10.0.0.1".to_string(),
            hostname: Some("web01".to_string()),
            severity: Some(4),
            app_name: Some("nginx".to_string()),
            message: "slow upstream".to_string(),
            raw_message: String::new(),
            ..Default::default()
        }
        .into_entry(1, at);
        assert_eq!(
            format_entry(&entry),
            "2024-05-01 08:30:00 web01 Warning nginx: slow upstream"
        );

        let marker = NewLogEntry::marker("Deploy", Some(at), MarkerStyle::Info).into_entry(2, at);
        assert_eq!(format_entry(&marker), "2024-05-01 08:30:00 ===== Deploy =====");
    }
}
