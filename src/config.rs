//! Configuration management
//!
//! Everything comes from `TRAIL_`-prefixed environment variables with
//! defaults suitable for the standard container layout. Invalid values are
//! fatal at startup.

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Active access log file the tailer follows
    pub log_file: String,
    /// SQLite database file
    pub db_path: String,
    /// HTTP listen address (":8080" or "host:port")
    pub listen: String,
    /// Days to retain aggregate rows
    pub retention_days: u32,
    /// Log format: "auto", "traefik", or "combined"
    pub log_format: String,
    /// Optional MaxMind mmdb path for country lookup
    #[serde(default)]
    pub geoip_path: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("log_file", "/logs/access.log")?
            .set_default("db_path", "/data/trail.db")?
            .set_default("listen", ":8080")?
            .set_default("retention_days", 90i64)?
            .set_default("log_format", "auto")?
            .set_default("geoip_path", "")?
            .add_source(config::Environment::with_prefix("TRAIL").try_parsing(true))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_file.is_empty() {
            anyhow::bail!("TRAIL_LOG_FILE cannot be empty");
        }
        if self.db_path.is_empty() {
            anyhow::bail!("TRAIL_DB_PATH cannot be empty");
        }
        if self.listen.is_empty() {
            anyhow::bail!("TRAIL_LISTEN cannot be empty");
        }
        if self.retention_days == 0 {
            anyhow::bail!("TRAIL_RETENTION_DAYS must be positive");
        }

        let valid_formats = ["auto", "traefik", "combined"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            anyhow::bail!(
                "invalid TRAIL_LOG_FORMAT '{}'. Must be one of: {:?}",
                self.log_format,
                valid_formats
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            log_file: "/logs/access.log".to_string(),
            db_path: "/data/trail.db".to_string(),
            listen: ":8080".to_string(),
            retention_days: 90,
            log_format: "auto".to_string(),
            geoip_path: String::new(),
        }
    }

    #[test]
    fn defaults_validate() {
        base_config().validate().unwrap();
    }

    #[test]
    fn zero_retention_is_rejected() {
        let mut cfg = base_config();
        cfg.retention_days = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let mut cfg = base_config();
        cfg.log_format = "syslog".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn format_is_case_insensitive() {
        let mut cfg = base_config();
        cfg.log_format = "Traefik".to_string();
        cfg.validate().unwrap();
    }
}
