//! Database schema definitions
//!
//! Every aggregate table is keyed by (hour, router, ...) where hour is the
//! UTC hour boundary as `YYYY-MM-DDTHH:00:00Z`. Counters accumulate via
//! upsert; log_position tracks durable read progress per file.

pub const CREATE_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    hour     TEXT    NOT NULL,
    router   TEXT    NOT NULL,
    path     TEXT    NOT NULL,
    method   TEXT    NOT NULL,
    status   INTEGER NOT NULL,
    count    INTEGER NOT NULL DEFAULT 0,
    bytes    INTEGER NOT NULL DEFAULT 0,
    duration INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hour, router, path, method, status)
)
"#;

pub const CREATE_VISITORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS visitors (
    hour    TEXT NOT NULL,
    router  TEXT NOT NULL,
    ip_hash TEXT NOT NULL,
    PRIMARY KEY (hour, router, ip_hash)
)
"#;

pub const CREATE_REFERRERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS referrers (
    hour     TEXT    NOT NULL,
    router   TEXT    NOT NULL,
    referrer TEXT    NOT NULL,
    count    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hour, router, referrer)
)
"#;

pub const CREATE_USER_AGENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_agents (
    hour     TEXT    NOT NULL,
    router   TEXT    NOT NULL,
    category TEXT    NOT NULL,
    count    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hour, router, category)
)
"#;

pub const CREATE_COUNTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS countries (
    hour    TEXT    NOT NULL,
    router  TEXT    NOT NULL,
    country TEXT    NOT NULL,
    count   INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hour, router, country)
)
"#;

pub const CREATE_BROWSERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS browsers (
    hour    TEXT    NOT NULL,
    router  TEXT    NOT NULL,
    browser TEXT    NOT NULL,
    count   INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hour, router, browser)
)
"#;

pub const CREATE_OS_STATS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS os_stats (
    hour   TEXT    NOT NULL,
    router TEXT    NOT NULL,
    os     TEXT    NOT NULL,
    count  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hour, router, os)
)
"#;

pub const CREATE_DURATION_HIST_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS duration_hist (
    hour   TEXT    NOT NULL,
    router TEXT    NOT NULL,
    bucket TEXT    NOT NULL,
    count  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hour, router, bucket)
)
"#;

pub const CREATE_LOG_POSITION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS log_position (
    file   TEXT    PRIMARY KEY,
    offset INTEGER NOT NULL DEFAULT 0,
    inode  INTEGER NOT NULL DEFAULT 0,
    size   INTEGER NOT NULL DEFAULT 0
)
"#;

// Hour indexes support the retention sweep and time-ranged reads
pub const CREATE_REQUESTS_HOUR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_requests_hour ON requests(hour)";
pub const CREATE_VISITORS_HOUR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_visitors_hour ON visitors(hour)";
pub const CREATE_REFERRERS_HOUR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_referrers_hour ON referrers(hour)";
pub const CREATE_USER_AGENTS_HOUR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_user_agents_hour ON user_agents(hour)";
pub const CREATE_COUNTRIES_HOUR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_countries_hour ON countries(hour)";
pub const CREATE_BROWSERS_HOUR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_browsers_hour ON browsers(hour)";
pub const CREATE_OS_STATS_HOUR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_os_stats_hour ON os_stats(hour)";
pub const CREATE_DURATION_HIST_HOUR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_duration_hist_hour ON duration_hist(hour)";

/// All statements in creation order; each is idempotent.
pub const MIGRATIONS: &[&str] = &[
    CREATE_REQUESTS_TABLE,
    CREATE_VISITORS_TABLE,
    CREATE_REFERRERS_TABLE,
    CREATE_USER_AGENTS_TABLE,
    CREATE_COUNTRIES_TABLE,
    CREATE_BROWSERS_TABLE,
    CREATE_OS_STATS_TABLE,
    CREATE_DURATION_HIST_TABLE,
    CREATE_LOG_POSITION_TABLE,
    CREATE_REQUESTS_HOUR_INDEX,
    CREATE_VISITORS_HOUR_INDEX,
    CREATE_REFERRERS_HOUR_INDEX,
    CREATE_USER_AGENTS_HOUR_INDEX,
    CREATE_COUNTRIES_HOUR_INDEX,
    CREATE_BROWSERS_HOUR_INDEX,
    CREATE_OS_STATS_HOUR_INDEX,
    CREATE_DURATION_HIST_HOUR_INDEX,
];

/// Time-bucketed tables swept by retention, in delete order.
/// log_position is deliberately absent.
pub const TIME_BUCKETED_TABLES: &[&str] = &[
    "requests",
    "visitors",
    "referrers",
    "user_agents",
    "countries",
    "browsers",
    "os_stats",
    "duration_hist",
];
