//! Syslog message parsing.
//!
//! Every datagram becomes a record: the matchers below are tried from the
//! strictest grammar to the loosest and the first hit wins. Anything no
//! matcher accepts is kept verbatim as a raw, non-syslog message.
//!
//! 1. RFC 5424: `<PRI>VERSION TIMESTAMP HOSTNAME APP-NAME PROCID MSGID SD [MSG]`
//! 2. RFC 3164: `<PRI>Mmm dd hh:mm:ss HOSTNAME TAG[PID]: MSG`, or the
//!    header-less `<PRI>TAG[PID]: MSG` that many embedded senders emit
//! 3. Priority only: `<PRI>MSG`
//! 4. Raw text

use crate::models::log_entry::NewLogEntry;
use crate::models::syslog::{decode_priority, MAX_PRIORITY};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

/// Stored in place of a datagram that decodes to nothing.
pub const EMPTY_MESSAGE: &str = "(empty message)";

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const MAX_TAG_LEN: usize = 64;

/// Which grammar accepted the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogFormat {
    Rfc5424,
    Rfc3164,
    SimplePriority,
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub format: SyslogFormat,
    pub priority: Option<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub message: String,
    pub raw_message: String,
}

impl ParsedMessage {
    fn syslog(format: SyslogFormat, priority: u8, message: &str, raw: &str) -> Self {
        Self {
            format,
            priority: Some(priority),
            timestamp: None,
            hostname: None,
            app_name: None,
            proc_id: None,
            msg_id: None,
            message: message.to_string(),
            raw_message: raw.to_string(),
        }
    }

    fn raw(text: &str) -> Self {
        Self {
            format: SyslogFormat::Raw,
            priority: None,
            timestamp: None,
            hostname: None,
            app_name: None,
            proc_id: None,
            msg_id: None,
            message: text.to_string(),
            raw_message: text.to_string(),
        }
    }

    pub fn is_syslog(&self) -> bool {
        self.format != SyslogFormat::Raw
    }

    pub fn facility(&self) -> Option<u8> {
        self.priority.map(|pri| decode_priority(pri).0)
    }

    pub fn severity(&self) -> Option<u8> {
        self.priority.map(|pri| decode_priority(pri).1)
    }

    /// Attaches the datagram's transport origin.
    pub fn into_new_entry(self, source: SocketAddr) -> NewLogEntry {
        let ip = match source.ip() {
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(v6)),
            ip => ip,
        };

        NewLogEntry {
            timestamp: self.timestamp,
            source_ip: ip.to_string(),
            source_port: Some(source.port()),
            facility: self.facility(),
            severity: self.severity(),
            priority: self.priority,
            is_syslog: self.is_syslog(),
            hostname: self.hostname,
            app_name: self.app_name,
            proc_id: self.proc_id,
            msg_id: self.msg_id,
            message: self.message,
            raw_message: self.raw_message,
            is_marker: false,
            marker_style: None,
        }
    }
}

type Matcher = fn(&str, &DateTime<Utc>) -> Option<ParsedMessage>;

const MATCHERS: [Matcher; 3] = [match_rfc5424, match_rfc3164, match_simple_priority];

/// Parses a datagram using the current time to complete RFC 3164 dates.
pub fn parse(data: &[u8]) -> ParsedMessage {
    parse_at(data, &Utc::now())
}

/// Parses a datagram. `now` supplies the year (and UTC assumption) that
/// RFC 3164 timestamps leave out. Never fails.
pub fn parse_at(data: &[u8], now: &DateTime<Utc>) -> ParsedMessage {
    let decoded = decode(data);
    let text = decoded.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let text = if text.is_empty() { EMPTY_MESSAGE } else { text };

    MATCHERS
        .iter()
        .find_map(|matcher| matcher(text, now))
        .unwrap_or_else(|| ParsedMessage::raw(text))
}

/// UTF-8 when valid, otherwise Latin-1, which maps every byte.
pub fn decode(data: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(data) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(data.iter().map(|&byte| byte as char).collect()),
    }
}

/// `<PRI>` prefix: one to three digits, value 0..=191.
fn split_pri(text: &str) -> Option<(u8, &str)> {
    let rest = text.strip_prefix('<')?;
    let close = rest.find('>')?;
    let digits = &rest[..close];
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u16 = digits.parse().ok()?;
    if value > MAX_PRIORITY {
        return None;
    }
    Some((value as u8, &rest[close + 1..]))
}

/// Next space-delimited header field. A separator must follow it.
fn next_field(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start_matches(' ');
    let end = text.find(' ')?;
    let field = &text[..end];
    if field.is_empty() {
        return None;
    }
    Some((field, &text[end + 1..]))
}

fn nil_to_none(field: &str) -> Option<String> {
    if field == "-" {
        None
    } else {
        Some(field.to_string())
    }
}

pub(crate) fn match_rfc5424(text: &str, _now: &DateTime<Utc>) -> Option<ParsedMessage> {
    let (pri, rest) = split_pri(text)?;

    let (version, rest) = next_field(rest)?;
    if version.len() > 2 || !version.bytes().all(|b| b.is_ascii_digit()) || version.starts_with('0')
    {
        return None;
    }

    let (timestamp_field, rest) = next_field(rest)?;
    let timestamp = match timestamp_field {
        "-" => None,
        field => Some(
            DateTime::parse_from_rfc3339(field)
                .ok()?
                .with_timezone(&Utc),
        ),
    };

    let (hostname, rest) = next_field(rest)?;
    let (app_name, rest) = next_field(rest)?;
    let (proc_id, rest) = next_field(rest)?;
    let (msg_id, rest) = next_field(rest)?;
    let rest = split_structured_data(rest.trim_start_matches(' '))?;

    let message = rest.strip_prefix(' ').unwrap_or(rest);
    let message = message.strip_prefix('\u{feff}').unwrap_or(message);

    let mut parsed = ParsedMessage::syslog(SyslogFormat::Rfc5424, pri, message, text);
    parsed.timestamp = timestamp;
    parsed.hostname = nil_to_none(hostname);
    parsed.app_name = nil_to_none(app_name);
    parsed.proc_id = nil_to_none(proc_id);
    parsed.msg_id = nil_to_none(msg_id);
    Some(parsed)
}

/// Skips the STRUCTURED-DATA part: `-` or one or more `[...]` elements,
/// where `]` inside a quoted value may be escaped. Returns what follows.
fn split_structured_data(text: &str) -> Option<&str> {
    if let Some(rest) = text.strip_prefix('-') {
        return (rest.is_empty() || rest.starts_with(' ')).then_some(rest);
    }

    let bytes = text.as_bytes();
    let mut pos = 0;
    while bytes.get(pos) == Some(&b'[') {
        let mut in_quotes = false;
        pos += 1;
        loop {
            match bytes.get(pos)? {
                b'\\' if in_quotes => pos += 1,
                b'"' => in_quotes = !in_quotes,
                b']' if !in_quotes => break,
                _ => {}
            }
            pos += 1;
        }
        pos += 1;
    }

    if pos == 0 {
        return None;
    }
    let rest = &text[pos..];
    (rest.is_empty() || rest.starts_with(' ')).then_some(rest)
}

pub(crate) fn match_rfc3164(text: &str, now: &DateTime<Utc>) -> Option<ParsedMessage> {
    let (pri, rest) = split_pri(text)?;

    if let Some((timestamp, after_timestamp)) = split_bsd_timestamp(rest, now) {
        let after_timestamp = after_timestamp.trim_start_matches(' ');
        let (first, remainder) = after_timestamp
            .split_once(' ')
            .unwrap_or((after_timestamp, ""));

        // Some senders skip HOSTNAME and go straight to the tag
        let (hostname, body) = if first.ends_with(':') || first.is_empty() {
            (None, after_timestamp)
        } else {
            (Some(first.to_string()), remainder)
        };

        let mut parsed = match split_tag(body) {
            Some((app_name, proc_id, message)) => {
                let mut parsed = ParsedMessage::syslog(SyslogFormat::Rfc3164, pri, message, text);
                parsed.app_name = Some(app_name.to_string());
                parsed.proc_id = proc_id.map(str::to_string);
                parsed
            }
            None => ParsedMessage::syslog(SyslogFormat::Rfc3164, pri, body.trim(), text),
        };
        parsed.timestamp = timestamp;
        parsed.hostname = hostname;
        return Some(parsed);
    }

    let (app_name, proc_id, message) = split_tag(rest)?;
    let mut parsed = ParsedMessage::syslog(SyslogFormat::Rfc3164, pri, message, text);
    parsed.app_name = Some(app_name.to_string());
    parsed.proc_id = proc_id.map(str::to_string);
    Some(parsed)
}

/// `Mmm dd hh:mm:ss` (day may be space padded). The header matches even
/// when the date itself is impossible; the timestamp is then `None`.
fn split_bsd_timestamp<'a>(
    text: &'a str,
    now: &DateTime<Utc>,
) -> Option<(Option<DateTime<Utc>>, &'a str)> {
    let month_name = text.get(..3)?;
    let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;

    let rest = &text[3..];
    let day_text = rest.trim_start_matches(' ');
    if day_text.len() == rest.len() {
        return None;
    }
    let day_len = day_text.bytes().take_while(u8::is_ascii_digit).count();
    if day_len == 0 || day_len > 2 {
        return None;
    }
    let day: u32 = day_text[..day_len].parse().ok()?;

    let time_text = day_text[day_len..].strip_prefix(' ')?;
    let clock = time_text.get(..8)?;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3
        || parts
            .iter()
            .any(|p| p.len() != 2 || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    let rest = &time_text[8..];
    if !(rest.is_empty() || rest.starts_with(' ')) {
        return None;
    }

    let hour: u32 = parts[0].parse().ok()?;
    let minute: u32 = parts[1].parse().ok()?;
    let second: u32 = parts[2].parse().ok()?;

    Some((bsd_datetime(month, day, hour, minute, second, now), rest))
}

/// Completes a year-less date with the current year, stepping back a year
/// when that would put it more than a day in the future (December logs
/// read in January).
fn bsd_datetime(
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    now: &DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let at_year = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .map(|naive| naive.and_utc())
    };

    match at_year(now.year()) {
        Some(candidate) if candidate - *now > Duration::days(1) => at_year(now.year() - 1),
        Some(candidate) => Some(candidate),
        None => at_year(now.year() - 1),
    }
}

/// `TAG[PID]: MSG` with the PID optional. The colon must end the word, so
/// text like `http://host` is not mistaken for a tag.
fn split_tag(text: &str) -> Option<(&str, Option<&str>, &str)> {
    let colon = text.find(':')?;
    let tag = &text[..colon];
    let after = &text[colon + 1..];
    if !(after.is_empty() || after.starts_with(' ')) {
        return None;
    }
    let message = after.trim_start();

    let (name, pid) = match tag.find('[') {
        Some(open) => {
            let pid = tag[open + 1..].strip_suffix(']')?;
            if pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (&tag[..open], Some(pid))
        }
        None => (tag, None),
    };

    if name.is_empty()
        || name.len() > MAX_TAG_LEN
        || name
            .chars()
            .any(|c| c.is_whitespace() || c == '[' || c == ']' || c == '<' || c == '>')
    {
        return None;
    }
    Some((name, pid, message))
}

pub(crate) fn match_simple_priority(text: &str, _now: &DateTime<Utc>) -> Option<ParsedMessage> {
    let (pri, rest) = split_pri(text)?;
    Some(ParsedMessage::syslog(
        SyslogFormat::SimplePriority,
        pri,
        rest.trim(),
        text,
    ))
}
