/// Sentinel `source_ip` of marker entries. Never a valid socket address.
pub const MARKER_SOURCE: &str = "marker";

/// Largest valid PRI value (facility 23, severity 7).
pub const MAX_PRIORITY: u16 = 191;

const FACILITIES: [&str; 24] = [
    "kern",
    "user",
    "mail",
    "daemon",
    "auth",
    "syslog",
    "lpr",
    "news",
    "uucp",
    "cron",
    "authpriv",
    "ftp",
    "ntp",
    "security",
    "console",
    "solaris-cron",
    "local0",
    "local1",
    "local2",
    "local3",
    "local4",
    "local5",
    "local6",
    "local7",
];

const SEVERITIES: [&str; 8] = [
    "Emergency",
    "Alert",
    "Critical",
    "Error",
    "Warning",
    "Notice",
    "Informational",
    "Debug",
];

/// Splits a PRI value into (facility, severity).
pub fn decode_priority(pri: u8) -> (u8, u8) {
    (pri >> 3, pri & 0x07)
}

pub fn facility_name(code: u8) -> &'static str {
    FACILITIES.get(code as usize).copied().unwrap_or("unknown")
}

pub fn severity_name(code: u8) -> &'static str {
    SEVERITIES.get(code as usize).copied().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_priority_reconstructs_every_pri() {
        for pri in 0..=MAX_PRIORITY as u8 {
            let (facility, severity) = decode_priority(pri);
            assert_eq!(facility, pri / 8);
            assert_eq!(severity, pri % 8);
            assert!(facility <= 23);
            assert_eq!(facility * 8 + severity, pri);
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(facility_name(0), "kern");
        assert_eq!(facility_name(23), "local7");
        assert_eq!(facility_name(24), "unknown");
        assert_eq!(severity_name(0), "Emergency");
        assert_eq!(severity_name(6), "Informational");
        assert_eq!(severity_name(9), "unknown");
    }
}
