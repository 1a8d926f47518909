//! Configuration for Cadence

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Sending and pacing configuration
    #[serde(default)]
    pub sending: SendingConfig,

    /// SMTP transport pool configuration
    #[serde(default)]
    pub smtp_pool: SmtpPoolConfig,

    /// Queue worker configuration
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Security configuration (encryption key, tokens)
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname used for generated links (unsubscribe URLs)
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: default_public_host(),
        }
    }
}

fn default_public_host() -> String {
    "localhost".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Sending and pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingConfig {
    /// Start of the send window, 24-hour clock
    #[serde(default = "default_office_hours_start")]
    pub office_hours_start: u32,

    /// End of the send window, 24-hour clock; the window is [start, end)
    #[serde(default = "default_office_hours_end")]
    pub office_hours_end: u32,

    /// Bounce rate percentage above which a running campaign auto-pauses
    #[serde(default = "default_max_bounce_rate")]
    pub max_bounce_rate: f64,

    /// Default daily limit for new SMTP accounts
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: i32,

    /// Default minimum delay between two emails, seconds
    #[serde(default = "default_min_delay")]
    pub min_delay_between_emails: u32,

    /// Default maximum delay between two emails, seconds
    #[serde(default = "default_max_delay")]
    pub max_delay_between_emails: u32,

    /// Lower bound for a batch size draw
    #[serde(default = "default_batch_size_min")]
    pub batch_size_min: u32,

    /// Upper bound for a batch size draw
    #[serde(default = "default_batch_size_max")]
    pub batch_size_max: u32,

    /// Break between two batches, seconds
    #[serde(default = "default_batch_break")]
    pub batch_break_duration: u32,

    /// Retry attempts per email before it is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries_per_email: i32,
}

impl Default for SendingConfig {
    fn default() -> Self {
        Self {
            office_hours_start: default_office_hours_start(),
            office_hours_end: default_office_hours_end(),
            max_bounce_rate: default_max_bounce_rate(),
            default_daily_limit: default_daily_limit(),
            min_delay_between_emails: default_min_delay(),
            max_delay_between_emails: default_max_delay(),
            batch_size_min: default_batch_size_min(),
            batch_size_max: default_batch_size_max(),
            batch_break_duration: default_batch_break(),
            max_retries_per_email: default_max_retries(),
        }
    }
}

fn default_office_hours_start() -> u32 {
    8
}

fn default_office_hours_end() -> u32 {
    18
}

fn default_max_bounce_rate() -> f64 {
    5.0
}

fn default_daily_limit() -> i32 {
    500
}

fn default_min_delay() -> u32 {
    30
}

fn default_max_delay() -> u32 {
    120
}

fn default_batch_size_min() -> u32 {
    5
}

fn default_batch_size_max() -> u32 {
    10
}

fn default_batch_break() -> u32 {
    300
}

fn default_max_retries() -> i32 {
    3
}

/// SMTP transport pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpPoolConfig {
    /// Maximum pooled transports per account
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Idle transports are closed after this many seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Parallel connections a single transport may open
    #[serde(default = "default_transport_connections")]
    pub max_connections: u32,

    /// Messages sent through one transport before it reconnects
    #[serde(default = "default_transport_messages")]
    pub max_messages: u32,

    /// Messages per second per account
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
}

impl Default for SmtpPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            idle_timeout_secs: default_idle_timeout(),
            max_connections: default_transport_connections(),
            max_messages: default_transport_messages(),
            rate_limit: default_rate_limit(),
        }
    }
}

fn default_max_pool_size() -> usize {
    3
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_transport_connections() -> u32 {
    5
}

fn default_transport_messages() -> u32 {
    100
}

fn default_rate_limit() -> u32 {
    5
}

/// Queue worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Workers consuming the campaign-tick queue
    #[serde(default = "default_tick_workers")]
    pub tick_workers: usize,

    /// Workers consuming the email-send queue
    #[serde(default = "default_send_workers")]
    pub send_workers: usize,

    /// Queue poll interval, milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_workers: default_tick_workers(),
            send_workers: default_send_workers(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_tick_workers() -> usize {
    2
}

fn default_send_workers() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1000
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Symmetric key for SMTP credentials at rest.
    /// Either 32 raw bytes or 64 hex characters.
    pub encryption_key: String,

    /// JWT configuration
    pub jwt: JwtConfig,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret for access tokens
    pub secret: String,

    /// Token lifetime in seconds
    #[serde(default = "default_jwt_expires")]
    pub expires_in_secs: u64,
}

fn default_jwt_expires() -> u64 {
    86_400
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./cadence.toml"),
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/cadence/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> crate::Result<()> {
        let s = &self.sending;
        if s.office_hours_start >= 24 || s.office_hours_end > 24 {
            return Err(crate::Error::Config(
                "office hours must be within 0..24".to_string(),
            ));
        }
        if s.min_delay_between_emails > s.max_delay_between_emails {
            return Err(crate::Error::Config(
                "min_delay_between_emails must not exceed max_delay_between_emails".to_string(),
            ));
        }
        if s.batch_size_min == 0 || s.batch_size_min > s.batch_size_max {
            return Err(crate::Error::Config(
                "batch size bounds must satisfy 0 < min <= max".to_string(),
            ));
        }
        if self.security.encryption_key.len() != 32 && self.security.encryption_key.len() != 64 {
            return Err(crate::Error::Config(
                "encryption_key must be 32 raw bytes or 64 hex characters".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[database]
url = "postgres://localhost/cadence"

[security]
encryption_key = "12345678901234567890123456789012"

[security.jwt]
secret = "test-secret"
"#
        .to_string()
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str(&base_toml()).unwrap();
        assert_eq!(config.sending.office_hours_start, 8);
        assert_eq!(config.sending.office_hours_end, 18);
        assert_eq!(config.sending.max_bounce_rate, 5.0);
        assert_eq!(config.smtp_pool.max_pool_size, 3);
        assert_eq!(config.workers.tick_workers, 2);
        assert_eq!(config.security.jwt.expires_in_secs, 86_400);
    }

    #[test]
    fn test_overrides() {
        let toml = format!(
            "{}\n[sending]\noffice_hours_start = 9\noffice_hours_end = 17\nbatch_size_min = 10\nbatch_size_max = 10\n",
            base_toml()
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.sending.office_hours_start, 9);
        assert_eq!(config.sending.batch_size_min, 10);
        assert_eq!(config.sending.batch_size_max, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let toml = format!(
            "{}\n[sending]\nmin_delay_between_emails = 100\nmax_delay_between_emails = 20\n",
            base_toml()
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_key_length() {
        let toml = r#"
[database]
url = "postgres://localhost/cadence"

[security]
encryption_key = "short"

[security.jwt]
secret = "test-secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
