//! Traffic classification
//!
//! Labels each request with a traffic class (human/bot/unrouted), a browser
//! family, an OS family, and a display category for the user-agents table.
//! All pure functions over the parsed entry.

use crate::parser::LogEntry;

/// Traffic class of a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    Human,
    Bot,
    Unrouted,
}

/// Substring signatures that mark a user-agent as a bot
const BOT_SIGNATURES: &[&str] = &[
    "bot", "crawl", "spider", "slurp",
    "googlebot", "bingbot", "ahrefsbot", "censysinspect",
    "cms-checker", "facebookexternalhit", "go-http-client",
    "curl", "wget", "python-requests", "scrapy",
    "headlesschrome", "phantomjs", "selenium",
    "bot/", "+http",
];

/// Named bots reported individually by the user-agents category
const KNOWN_BOTS: &[&str] = &[
    "ahrefsbot", "googlebot", "bingbot", "yandexbot",
    "baiduspider", "duckduckbot", "slurp", "facebookexternalhit",
    "twitterbot", "linkedinbot", "censysinspect", "cms-checker",
];

/// Classifies a log entry. Requests that matched no router are always
/// `Unrouted` regardless of user-agent.
pub fn classify_traffic(entry: &LogEntry) -> TrafficClass {
    if entry.router.is_empty() {
        return TrafficClass::Unrouted;
    }
    if is_bot(&entry.user_agent) {
        return TrafficClass::Bot;
    }
    TrafficClass::Human
}

/// Checks a user-agent string against known bot patterns.
pub fn is_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();

    // Empty or "-" user-agent is suspicious
    if ua.is_empty() || ua == "-" {
        return true;
    }

    // Exactly "Mozilla/5.0" without more detail is suspicious
    if user_agent.trim() == "Mozilla/5.0" {
        return true;
    }

    BOT_SIGNATURES.iter().any(|sig| ua.contains(sig))
}

/// Returns a display category for the user_agents table: a known bot name,
/// "bot" for generic bots, a browser label, or "unknown".
pub fn classify_ua_category(user_agent: &str) -> String {
    let ua = user_agent.to_lowercase();

    if ua.is_empty() || ua == "-" {
        return "unknown".to_string();
    }

    if let Some(name) = KNOWN_BOTS.iter().find(|name| ua.contains(*name)) {
        return name.to_string();
    }

    if is_bot(user_agent) {
        return "bot".to_string();
    }

    // Order matters: Edge UA contains "chrome/", Chrome UA contains "safari/"
    if ua.contains("edg/") {
        return "Edge".to_string();
    }
    if ua.contains("chrome/") && !ua.contains("chromium") {
        return "Chrome".to_string();
    }
    if ua.contains("firefox/") {
        return "Firefox".to_string();
    }
    if ua.contains("safari/") && !ua.contains("chrome/") {
        return "Safari".to_string();
    }

    "unknown".to_string()
}

/// Returns the browser family: Chrome, Firefox, Safari, Edge, Opera, Bot,
/// Unknown, or Other. The bot check wins over any browser marker.
pub fn classify_browser(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();

    if ua.is_empty() || ua == "-" {
        return "Unknown";
    }
    if is_bot(user_agent) {
        return "Bot";
    }

    // Edge contains both "edg/" and "chrome/"
    if ua.contains("edg/") {
        return "Edge";
    }
    if ua.contains("opr/") || ua.contains("opera/") {
        return "Opera";
    }
    // Chrome before Safari since Chrome UA contains "safari/"
    if ua.contains("chrome/") || ua.contains("chromium/") {
        return "Chrome";
    }
    if ua.contains("firefox/") {
        return "Firefox";
    }
    if ua.contains("safari/") {
        return "Safari";
    }

    "Other"
}

/// Returns the OS family: Windows, macOS, Linux, iOS, Android, ChromeOS,
/// or Other. Mobile markers are checked before desktop ones.
pub fn classify_os(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();

    if ua.is_empty() || ua == "-" {
        return "Other";
    }

    if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        return "iOS";
    }
    if ua.contains("android") {
        return "Android";
    }

    // CrOS user-agents also contain "linux"
    if ua.contains("cros") {
        return "ChromeOS";
    }

    if ua.contains("windows") {
        return "Windows";
    }
    if ua.contains("macintosh") || ua.contains("mac os") {
        return "macOS";
    }
    if ua.contains("linux") {
        return "Linux";
    }

    "Other"
}

/// Histogram bucket label for a request duration in milliseconds.
pub fn duration_bucket(ms: i64) -> &'static str {
    match ms {
        _ if ms <= 10 => "0-10ms",
        _ if ms <= 50 => "10-50ms",
        _ if ms <= 100 => "50-100ms",
        _ if ms <= 500 => "100-500ms",
        _ if ms <= 1000 => "500-1000ms",
        _ => "1000+ms",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";

    fn entry(router: &str, ua: &str) -> LogEntry {
        LogEntry {
            ip: "1.2.3.4".to_string(),
            timestamp: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2026, 1, 7, 16, 0, 0)
                .unwrap(),
            method: "GET".to_string(),
            path: "/".to_string(),
            protocol: "HTTP/1.1".to_string(),
            status: 200,
            bytes: 100,
            referer: String::new(),
            user_agent: ua.to_string(),
            router: router.to_string(),
            backend: String::new(),
            duration_ms: 5,
        }
    }

    #[test]
    fn unrouted_wins_regardless_of_ua() {
        assert_eq!(classify_traffic(&entry("", CHROME_MAC)), TrafficClass::Unrouted);
        assert_eq!(classify_traffic(&entry("", "curl/7.68.0")), TrafficClass::Unrouted);
    }

    #[test]
    fn routed_bot_and_human() {
        assert_eq!(classify_traffic(&entry("web@docker", "curl/7.68.0")), TrafficClass::Bot);
        assert_eq!(classify_traffic(&entry("web@docker", CHROME_MAC)), TrafficClass::Human);
    }

    #[test]
    fn suspicious_user_agents_are_bots() {
        assert!(is_bot(""));
        assert!(is_bot("-"));
        assert!(is_bot("Mozilla/5.0"));
        assert!(is_bot(" Mozilla/5.0 "));
        assert!(is_bot("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"));
        assert!(is_bot("python-requests/2.31"));
        assert!(!is_bot(CHROME_MAC));
    }

    #[test]
    fn ua_category_prefers_known_bot_names() {
        assert_eq!(classify_ua_category("Mozilla/5.0 (compatible; AhrefsBot/7.0)"), "ahrefsbot");
        assert_eq!(classify_ua_category("Googlebot-Image/1.0"), "googlebot");
        assert_eq!(classify_ua_category("curl/7.68.0"), "bot");
        assert_eq!(classify_ua_category(CHROME_MAC), "Chrome");
        assert_eq!(classify_ua_category(""), "unknown");
        assert_eq!(classify_ua_category("Mozilla/4.0 (something ancient)"), "unknown");
    }

    #[test]
    fn browser_ordering() {
        assert_eq!(classify_browser("Mozilla/5.0 (Windows NT 10.0) Chrome/120.0 Safari/537.36 Edg/120.0"), "Edge");
        assert_eq!(classify_browser("Mozilla/5.0 (X11) Chrome/120.0 Safari/537.36 OPR/106.0"), "Opera");
        assert_eq!(classify_browser(CHROME_MAC), "Chrome");
        assert_eq!(classify_browser("Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0"), "Firefox");
        assert_eq!(classify_browser("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 Version/17.0 Safari/605.1.15"), "Safari");
        assert_eq!(classify_browser("Googlebot/2.1"), "Bot");
        assert_eq!(classify_browser(""), "Unknown");
        assert_eq!(classify_browser("SomethingElse/1.0"), "Other");
    }

    #[test]
    fn os_ordering() {
        assert_eq!(classify_os("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)"), "iOS");
        assert_eq!(classify_os("Mozilla/5.0 (Linux; Android 14; Pixel 8)"), "Android");
        assert_eq!(classify_os("Mozilla/5.0 (X11; CrOS x86_64 14541.0.0)"), "ChromeOS");
        assert_eq!(classify_os("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"), "Windows");
        assert_eq!(classify_os(CHROME_MAC), "macOS");
        assert_eq!(classify_os("Mozilla/5.0 (X11; Linux x86_64)"), "Linux");
        assert_eq!(classify_os("weird"), "Other");
    }

    #[test]
    fn duration_buckets_are_left_open_right_closed() {
        assert_eq!(duration_bucket(0), "0-10ms");
        assert_eq!(duration_bucket(10), "0-10ms");
        assert_eq!(duration_bucket(11), "10-50ms");
        assert_eq!(duration_bucket(50), "10-50ms");
        assert_eq!(duration_bucket(100), "50-100ms");
        assert_eq!(duration_bucket(500), "100-500ms");
        assert_eq!(duration_bucket(1000), "500-1000ms");
        assert_eq!(duration_bucket(1001), "1000+ms");
    }
}
