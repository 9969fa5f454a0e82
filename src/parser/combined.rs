//! Apache/Nginx Combined log parsing

use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;

use super::{unquote, LogEntry, ParseError, CLF_TIME_FORMAT};

// IP - USER [TIMESTAMP] "METHOD PATH PROTOCOL" STATUS BYTES "REFERER" "UA" [request_time]
static COMBINED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"^(\S+) "#,      // IP
        r#"\S+ "#,         // ident (always -)
        r#"(\S+) "#,       // auth user (- or username)
        r#"\[([^\]]+)\] "#, // timestamp
        r#""(\S+) (\S+) ([^"]+)" "#, // method path protocol
        r#"(\d+) "#,       // status
        r#"(\d+|-) "#,     // bytes (- decodes to 0)
        r#""([^"]*)" "#,   // referer
        r#""([^"]*)""#,    // user-agent
        r#"(?:\s+(\S+))?"#, // optional: nginx $request_time in seconds, e.g. "0.003"
    ))
    .expect("combined regex")
});

pub(super) fn matches(line: &str) -> bool {
    COMBINED_REGEX.is_match(line)
}

/// Parses a single Apache/Nginx Combined log line.
/// Sets the router to the synthetic `"server"` (this format has no router
/// concept) so Combined traffic never lands in the unrouted bucket.
pub fn parse_combined(line: &str) -> Result<LogEntry, ParseError> {
    let caps = COMBINED_REGEX
        .captures(line)
        .ok_or(ParseError::NoMatch("Combined"))?;

    let timestamp = DateTime::parse_from_str(&caps[3], CLF_TIME_FORMAT)?;
    let status: u16 = caps[7].parse()?;

    let bytes: i64 = match &caps[8] {
        "-" => 0,
        s => s.parse()?,
    };

    // Fractional seconds, round-half-up to ms. An unparsable token is
    // treated as absent rather than failing the line.
    let duration_ms = caps
        .get(11)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0).round() as i64)
        .unwrap_or(0);

    Ok(LogEntry {
        ip: caps[1].to_string(),
        timestamp,
        method: caps[4].to_string(),
        path: caps[5].to_string(),
        protocol: caps[6].to_string(),
        status,
        bytes,
        referer: unquote(&caps[9]),
        user_agent: unquote(&caps[10]),
        router: "server".to_string(),
        backend: String::new(),
        duration_ms,
    })
}
