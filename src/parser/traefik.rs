//! Traefik extended CLF parsing

use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;

use super::{unquote, LogEntry, ParseError, CLF_TIME_FORMAT};

// IP - USER [TIMESTAMP] "METHOD PATH PROTOCOL" STATUS BYTES "REFERER" "UA" REQ# "ROUTER" "BACKEND" DURATIONms
static TRAEFIK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"^(\S+) "#,      // IP
        r#"\S+ "#,         // ident (always -)
        r#"(\S+) "#,       // auth user (- or username)
        r#"\[([^\]]+)\] "#, // timestamp
        r#""(\S+) (\S+) ([^"]+)" "#, // method path protocol
        r#"(\d+) "#,       // status
        r#"(\d+) "#,       // bytes
        r#""([^"]*)" "#,   // referer
        r#""([^"]*)" "#,   // user-agent
        r#"\d+ "#,         // request number (ignored)
        r#""([^"]*)" "#,   // router
        r#""([^"]*)" "#,   // backend
        r#"(\d+)ms"#,      // duration
    ))
    .expect("traefik regex")
});

pub(super) fn matches(line: &str) -> bool {
    TRAEFIK_REGEX.is_match(line)
}

/// Parses a single Traefik access log line.
pub fn parse_traefik(line: &str) -> Result<LogEntry, ParseError> {
    let caps = TRAEFIK_REGEX
        .captures(line)
        .ok_or(ParseError::NoMatch("Traefik CLF"))?;

    let timestamp = DateTime::parse_from_str(&caps[3], CLF_TIME_FORMAT)?;
    let status: u16 = caps[7].parse()?;
    let bytes: i64 = caps[8].parse()?;
    let duration_ms: i64 = caps[13].parse()?;

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
        router: unquote(&caps[11]),
        backend: unquote(&caps[12]),
        duration_ms,
    })
}
