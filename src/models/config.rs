use crate::models::error::{LogHubError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
    #[serde(default = "default_ingest_queue_size")]
    pub ingest_queue_size: usize,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: u32,
    #[serde(default = "default_subscriber_queue_size")]
    pub subscriber_queue_size: usize,
    #[serde(default = "default_max_subscriber_overflows")]
    pub max_subscriber_overflows: u32,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
const fn default_udp_port() -> u16 {
    5514
}
const fn default_web_port() -> u16 {
    8080
}
fn default_database_file() -> String {
    "logs.db".to_string()
}
const fn default_max_datagram_size() -> usize {
    65_535
}
const fn default_ingest_queue_size() -> usize {
    4096
}
const fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_read_pool_size() -> u32 {
    // One per core plus headroom for bursts of dashboard queries
    (num_cpus::get_physical() + 7) as u32
}
const fn default_subscriber_queue_size() -> usize {
    1024
}
const fn default_max_subscriber_overflows() -> u32 {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            udp_port: default_udp_port(),
            web_port: default_web_port(),
            database_file: default_database_file(),
            max_datagram_size: default_max_datagram_size(),
            ingest_queue_size: default_ingest_queue_size(),
            write_timeout_ms: default_write_timeout_ms(),
            read_pool_size: default_read_pool_size(),
            subscriber_queue_size: default_subscriber_queue_size(),
            max_subscriber_overflows: default_max_subscriber_overflows(),
        }
    }
}

impl Config {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn udp_bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.udp_port)
    }
}

/// Loads a JSON config file, or the defaults when the file does not exist.
/// The result is not validated yet; command-line overrides come first.
pub fn load_config(config_file: &str) -> Result<Config> {
    if !Path::new(config_file).exists() {
        info!("Config file '{}' not found, using defaults", config_file);
        return Ok(Config::default());
    }
    read_config(config_file)
}

fn read_config(config_file: &str) -> Result<Config> {
    let config_path = PathBuf::from(config_file);
    info!("Loading config from: {}", config_path.display());

    let config_str = fs::read_to_string(&config_path).map_err(|cause| LogHubError::ConfigRead {
        path: config_path.clone(),
        cause,
    })?;

    let config: Config =
        serde_json::from_str(&config_str).map_err(|cause| LogHubError::ConfigParse {
            path: config_path,
            cause,
        })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config_validator::validate_config;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn load_and_validate(config_file: &str) -> Result<Config> {
        let config = load_config(config_file)?;
        validate_config(&config)?;
        Ok(config)
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_load_valid_config_with_all_fields() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("logs.db");

        let config_content = format!(
            r#"{{
            "bind_address": "127.0.0.1",
            "udp_port": 1514,
            "web_port": 9090,
            "database_file": "{}",
            "max_datagram_size": 8192,
            "ingest_queue_size": 100,
            "write_timeout_ms": 250,
            "read_pool_size": 4,
            "subscriber_queue_size": 32,
            "max_subscriber_overflows": 8
        }}"#,
            db_path.to_str().unwrap().replace('\\', "\\\\")
        );
        let temp_file = write_config(&config_content);

        let config = load_and_validate(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.udp_port, 1514);
        assert_eq!(config.web_port, 9090);
        assert_eq!(config.max_datagram_size, 8192);
        assert_eq!(config.ingest_queue_size, 100);
        assert_eq!(config.write_timeout(), Duration::from_millis(250));
        assert_eq!(config.read_pool_size, 4);
        assert_eq!(config.subscriber_queue_size, 32);
        assert_eq!(config.max_subscriber_overflows, 8);
        assert_eq!(config.udp_bind_address(), "127.0.0.1:1514");
    }

    #[test]
    fn test_load_config_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("defaults.db");
        let config_content = format!(
            r#"{{ "database_file": "{}" }}"#,
            db_path.to_str().unwrap().replace('\\', "\\\\")
        );
        let temp_file = write_config(&config_content);

        let config = load_and_validate(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.udp_port, 5514);
        assert_eq!(config.web_port, 8080);
        assert_eq!(config.max_datagram_size, 65_535);
        assert_eq!(config.write_timeout_ms, 5000);
        assert_eq!(config.read_pool_size, (num_cpus::get_physical() + 7) as u32);
    }

    #[test]
    fn test_error_on_unreadable_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_config(temp_dir.path().to_str().unwrap());

        match result {
            Err(LogHubError::ConfigRead { .. }) => {}
            _ => panic!("Expected ConfigRead error"),
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config("/this/does/not/exist/config.json").unwrap();
        assert_eq!(config.udp_port, 5514);
        assert_eq!(config.database_file, "logs.db");
    }

    #[test]
    fn test_error_on_invalid_json() {
        let temp_file = write_config(r#"{ "udp_port": 5514, "web_port": }"#);

        match load_and_validate(temp_file.path().to_str().unwrap()) {
            Err(LogHubError::ConfigParse { .. }) => {}
            _ => panic!("Expected ConfigParse error"),
        }
    }

    #[test]
    fn test_error_on_wrong_field_type() {
        let temp_file = write_config(r#"{ "udp_port": "syslog" }"#);

        match load_and_validate(temp_file.path().to_str().unwrap()) {
            Err(LogHubError::ConfigParse { .. }) => {}
            _ => panic!("Expected ConfigParse error for a non-numeric port"),
        }
    }
}
