use crate::models::config::Config;
use crate::models::error::{LogHubError, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;

/// Largest payload a UDP datagram can carry over IPv4.
const MAX_UDP_PAYLOAD: usize = 65_535;

/// Validates the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    info!("Validating configuration...");

    validate_numeric_values(config)?;
    validate_database_path(&config.database_file)?;
    check_port_layout(config);

    info!("Configuration validation passed");
    Ok(())
}

/// Validate numeric configuration values
fn validate_numeric_values(config: &Config) -> Result<()> {
    if config.max_datagram_size == 0 || config.max_datagram_size > MAX_UDP_PAYLOAD {
        return Err(LogHubError::InvalidConfig(format!(
            "max_datagram_size must be between 1 and {}, got {}",
            MAX_UDP_PAYLOAD, config.max_datagram_size
        )));
    }

    if config.ingest_queue_size == 0 {
        return Err(LogHubError::InvalidConfig(
            "ingest_queue_size must be greater than 0".to_string(),
        ));
    }

    if config.write_timeout_ms == 0 {
        return Err(LogHubError::InvalidConfig(
            "write_timeout_ms must be greater than 0".to_string(),
        ));
    }

    if config.read_pool_size == 0 {
        return Err(LogHubError::InvalidConfig(
            "read_pool_size must be greater than 0".to_string(),
        ));
    }

    if config.subscriber_queue_size == 0 {
        return Err(LogHubError::InvalidConfig(
            "subscriber_queue_size must be greater than 0".to_string(),
        ));
    }

    if config.max_subscriber_overflows == 0 {
        return Err(LogHubError::InvalidConfig(
            "max_subscriber_overflows must be greater than 0".to_string(),
        ));
    }

    if config.max_datagram_size < 1024 {
        warn!(
            "max_datagram_size ({}) is small; longer syslog lines will be truncated",
            config.max_datagram_size
        );
    }

    Ok(())
}

/// Validate database file path
fn validate_database_path(db_file: &str) -> Result<()> {
    if db_file.trim().is_empty() {
        return Err(LogHubError::InvalidConfig(
            "database_file cannot be empty".to_string(),
        ));
    }

    // WAL and the split reader/writer pools need a real file
    if db_file == ":memory:" || db_file.contains("mode=memory") || db_file.starts_with("file::memory:") {
        return Err(LogHubError::InvalidConfig(format!(
            "In-memory databases are not supported, use a file path: {}",
            db_file
        )));
    }

    let path = Path::new(db_file);

    if path.exists() {
        if !path.is_file() {
            return Err(LogHubError::InvalidConfig(format!(
                "Database path exists but is not a file: {}",
                db_file
            )));
        }

        if let Err(e) = fs::OpenOptions::new().read(true).write(true).open(path) {
            return Err(LogHubError::InvalidConfig(format!(
                "Database file is not readable/writable: {}\nError: {}",
                db_file, e
            )));
        }
    } else if let Some(parent) = path.parent() {
        // An empty parent means the current directory
        if !parent.as_os_str().is_empty() && !parent.exists() {
            #[cfg(windows)]
            let suggestion = format!("mkdir \"{}\"", parent.display());
            #[cfg(not(windows))]
            let suggestion = format!("mkdir -p \"{}\"", parent.display());

            return Err(LogHubError::InvalidConfig(format!(
                "Database parent directory does not exist: {}\nSuggestion: Create the directory with: {}",
                db_file, suggestion
            )));
        }
    } else {
        return Err(LogHubError::InvalidConfig(format!(
            "Database path has no parent directory: {}",
            db_file
        )));
    }

    Ok(())
}

fn check_port_layout(config: &Config) {
    if config.udp_port < 1024 && config.udp_port != 0 {
        warn!(
            "udp_port {} is privileged; binding will need elevated permissions",
            config.udp_port
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config(temp_dir: &TempDir) -> Config {
        Config {
            database_file: temp_dir
                .path()
                .join("logs.db")
                .to_str()
                .unwrap()
                .to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_numeric_values_zero_queue() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.ingest_queue_size = 0;

        let result = validate_numeric_values(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_numeric_values_oversized_datagram() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.max_datagram_size = 70_000;

        let result = validate_numeric_values(&config);
        assert!(result.unwrap_err().to_string().contains("max_datagram_size"));
    }

    #[test]
    fn test_validate_numeric_values_zero_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.write_timeout_ms = 0;

        assert!(validate_numeric_values(&config).is_err());
    }

    #[test]
    fn test_validate_database_path_rejects_memory() {
        assert!(validate_database_path(":memory:").is_err());
        assert!(validate_database_path("file::memory:?cache=shared").is_err());
        assert!(validate_database_path("").is_err());
    }

    #[test]
    fn test_validate_database_path_missing_parent() {
        let result = validate_database_path("/this/does/not/exist/logs.db");
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate_database_path_relative_file() {
        assert!(validate_database_path("logs_that_do_not_exist_yet.db").is_ok());
    }

    #[test]
    fn test_validate_database_path_is_directory() {
        let temp_dir = TempDir::new().unwrap();
        let result = validate_database_path(temp_dir.path().to_str().unwrap());
        assert!(result.unwrap_err().to_string().contains("not a file"));
    }
}
