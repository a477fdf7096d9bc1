pub mod broadcast;
pub mod pipeline;
pub mod syslog_parser;
pub mod udp_listener;
