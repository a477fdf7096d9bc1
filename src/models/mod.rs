pub mod api;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod host;
pub mod log_entry;
pub mod marker_style;
pub mod query;
pub mod syslog;
