mod api_routes;
mod api_state;
mod models;
mod repo;
mod service;
mod utils;
mod viewer;

use crate::models::config::{load_config, Config};
use crate::models::config_validator::validate_config;
use crate::repo::sqlite::{LogStore, StoreOptions};
use crate::service::broadcast::BroadcastHub;
use crate::service::pipeline::IngestPipeline;
use crate::service::udp_listener::{ListenerSettings, SyslogUdpListener};
use crate::viewer::tail::{run_tail, TailOptions};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[macro_use]
extern crate rocket;

use api_state::AppState;

pub fn build_rocket(state: AppState, config: &Config) -> rocket::Rocket<rocket::Build> {
    let figment = rocket::Config::figment()
        .merge(("address", config.bind_address.clone()))
        .merge(("port", config.web_port));

    rocket::custom(figment)
        .manage(state)
        .mount("/", routes![api_routes::live_feed])
        .mount("/api", api_routes::api_routes())
        .register("/", catchers![api_routes::json_catcher])
}

#[rocket::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(&args.log_level);

    match args.command {
        Some(Command::Tail {
            server,
            catch_up_limit,
        }) => {
            let options = TailOptions {
                server,
                catch_up_limit,
                ..TailOptions::default()
            };
            run_tail(options).await
        }
        None => serve(args).await,
    }
}

#[derive(Parser)]
#[command(name = "RustyLogHub")]
#[command(about = "UDP syslog collector with live streaming and a query API", long_about = None)]
struct Cli {
    #[arg(
        short = 'c',
        long = "config",
        default_value = "config.json",
        env = "RUSTYLOGHUB_CONFIG"
    )]
    config_file: String,

    #[arg(
        short = 'l',
        long = "log-level",
        default_value = "info",
        env = "LOG_LEVEL"
    )]
    log_level: String,

    /// Address both listeners bind to
    #[arg(long = "host")]
    host: Option<String>,

    #[arg(long = "udp-port")]
    udp_port: Option<u16>,

    #[arg(long = "web-port")]
    web_port: Option<u16>,

    /// Path of the SQLite database file
    #[arg(long = "db")]
    database_file: Option<String>,

    #[arg(short = 'v', long = "validate-only")]
    validate_only: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Follow a running server's live feed in the terminal
    Tail {
        #[arg(
            short = 's',
            long = "server",
            default_value = "http://127.0.0.1:8080",
            env = "RUSTYLOGHUB_SERVER"
        )]
        server: String,

        /// Most missed entries fetched after a reconnect
        #[arg(long = "catch-up-limit", default_value_t = 5000)]
        catch_up_limit: usize,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.bind_address = host.clone();
        }
        if let Some(port) = self.udp_port {
            config.udp_port = port;
        }
        if let Some(port) = self.web_port {
            config.web_port = port;
        }
        if let Some(db) = &self.database_file {
            config.database_file = db.clone();
        }
    }
}

fn parse_log_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(parse_log_level(level))
        .format_timestamp_secs();
    // RUST_LOG still wins for per-module filters
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

async fn serve(args: Cli) -> Result<()> {
    info!("RustyLogHub starting...");

    // Strip any surrounding quotes from config file path
    let config_file = args.config_file.trim_matches(|c| c == '"' || c == '\'');
    let mut config = load_config(config_file).context("Failed to load configuration")?;
    args.apply_overrides(&mut config);
    validate_config(&config).context("Invalid configuration")?;
    debug!("Loaded config: {:?}", &config);

    if args.validate_only {
        info!("Configuration is valid. Exiting (--validate-only mode).");
        return Ok(());
    }

    let store = LogStore::open(&config.database_file, StoreOptions::from(&config))
        .context("Failed to open log storage")?;
    let hub = BroadcastHub::new(config.subscriber_queue_size, config.max_subscriber_overflows);
    let pipeline = IngestPipeline::new(Arc::new(store), hub);

    let listener = SyslogUdpListener::bind(
        &config.udp_bind_address(),
        pipeline.clone(),
        ListenerSettings::from(&config),
    )
    .await
    .context("Failed to start syslog listener")?;

    let state = AppState::new(pipeline).with_ingest_metrics(listener.metrics());
    let cancel = CancellationToken::new();
    let ingest = tokio::spawn(listener.run(cancel.clone()));

    info!(
        "Web server starting on {}:{}",
        config.bind_address, config.web_port
    );
    let launched = build_rocket(state, &config).launch().await;

    // The web server is gone; stop ingesting and let the queue drain
    cancel.cancel();
    let totals = ingest
        .await
        .context("Syslog listener task panicked")?
        .context("Syslog listener failed")?;
    info!(
        "Ingest stopped: {} received, {} stored, {} dropped, {} failed",
        totals.received, totals.stored, totals.dropped, totals.failed
    );

    launched.context("Web server failed")?;
    info!("RustyLogHub stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_log_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_log_level("verbose"), log::LevelFilter::Info);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "rustyloghub",
            "--host",
            "127.0.0.1",
            "--udp-port",
            "1514",
            "--db",
            "/var/lib/loghub/logs.db",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.udp_port, 1514);
        assert_eq!(config.web_port, 8080);
        assert_eq!(config.database_file, "/var/lib/loghub/logs.db");
    }

    #[test]
    fn test_tail_subcommand() {
        let cli = Cli::try_parse_from([
            "rustyloghub",
            "tail",
            "--server",
            "http://logs.local:8080",
            "--catch-up-limit",
            "200",
        ])
        .unwrap();

        match cli.command {
            Some(Command::Tail {
                server,
                catch_up_limit,
            }) => {
                assert_eq!(server, "http://logs.local:8080");
                assert_eq!(catch_up_limit, 200);
            }
            None => panic!("expected tail subcommand"),
        }
    }
}
