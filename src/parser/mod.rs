//! Access log line parsing
//!
//! Two supported formats: Traefik extended CLF and Apache/Nginx Combined.
//! A parser is locked to one format for the lifetime of the process; "auto"
//! samples the head of the log file once at startup.

mod combined;
mod traefik;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use thiserror::Error;

pub use combined::parse_combined;
pub use traefik::parse_traefik;

/// CLF timestamp layout: [07/Jan/2026:16:17:16 +0000]
const CLF_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// A parsed access log line
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub ip: String,
    pub timestamp: DateTime<FixedOffset>,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: u16,
    pub bytes: i64,
    pub referer: String,
    pub user_agent: String,
    pub router: String,
    pub backend: String,
    pub duration_ms: i64,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line does not match {0} log format")]
    NoMatch(&'static str),
    #[error("bad timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("bad numeric field: {0}")]
    Number(#[from] std::num::ParseIntError),
}

/// Log file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Auto,
    /// Traefik extended CLF
    Traefik,
    /// Apache/Nginx Combined
    Combined,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Auto => "auto",
            Format::Traefik => "traefik",
            Format::Combined => "combined",
        }
    }
}

/// Format-aware line parser
#[derive(Debug, Clone)]
pub struct Parser {
    format: Format,
}

impl Parser {
    /// Creates a Parser for the given format string.
    /// Valid values: "auto", "traefik", "combined".
    pub fn new(format: &str) -> Self {
        let format = match format.to_lowercase().as_str() {
            "traefik" => Format::Traefik,
            "combined" => Format::Combined,
            _ => Format::Auto,
        };
        Self { format }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Examines sample lines to determine the log format. Only meaningful
    /// when the format is `Auto`; locks the format for future calls.
    pub fn detect(&mut self, lines: &[String]) -> Format {
        if self.format != Format::Auto {
            return self.format;
        }
        self.format = detect_format(lines);
        self.format
    }

    /// Parses a single log line using the configured format.
    /// For `Auto`, tries Traefik first (more specific), then Combined.
    pub fn parse_line(&self, line: &str) -> Result<LogEntry, ParseError> {
        match self.format {
            Format::Traefik => parse_traefik(line),
            Format::Combined => parse_combined(line),
            Format::Auto => parse_traefik(line)
                .or_else(|_| parse_combined(line))
                .map_err(|_| ParseError::NoMatch("any known")),
        }
    }
}

/// Examines sample log lines and returns the most likely format.
/// Traefik wins ties since it is the more specific grammar.
pub fn detect_format(lines: &[String]) -> Format {
    let mut traefik_hits = 0;
    let mut combined_hits = 0;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if traefik::matches(line) {
            traefik_hits += 1;
        } else if combined::matches(line) {
            combined_hits += 1;
        }
    }

    if combined_hits > traefik_hits {
        Format::Combined
    } else {
        Format::Traefik
    }
}

/// Truncates a timestamp to its UTC hour, formatted `YYYY-MM-DDTHH:00:00Z`.
/// This string is the primary time dimension of every aggregate table.
pub fn hour_bucket<Tz: TimeZone>(t: &DateTime<Tz>) -> String {
    t.with_timezone(&Utc)
        .format("%Y-%m-%dT%H:00:00Z")
        .to_string()
}

/// Decodes a quoted CLF field; the literal `-` means absent.
fn unquote(s: &str) -> String {
    if s == "-" {
        String::new()
    } else {
        s.to_string()
    }
}
