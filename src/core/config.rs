//! # Configuration Module
//!
//! Configuration structures and loading for the tracking service.
//!
//! ## Key Features
//! - YAML configuration parsing with serde (every section has defaults, so a
//!   partial file is enough)
//! - Human-readable durations (`"30s"`, `"1h"`) via `humantime-serde`
//! - Environment variable overrides, including the variable names the
//!   deployment already uses (`REDIS_URL`, `APP_PORT`, `THIRD_PARTY_*`)
//! - Validation that reports every problem at once

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::caching::stores::RedisCacheConfig;
use crate::core::error::{TrackingError, TrackingResult};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Key-value cache settings
    pub cache: CacheConfig,

    /// Lookup key and TTL settings
    pub lookup: LookupConfig,

    /// Primary source: vendor tracking API
    pub vendor: VendorConfig,

    /// Secondary source: published spreadsheet
    pub sheet: SheetConfig,

    /// Offsets used to synthesize tracking events for spreadsheet records
    pub timeline: TimelineConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file, apply environment overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> TrackingResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: AppConfig = serde_yaml::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults.
    /// Environment overrides and validation apply in both cases.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> TrackingResult<Self> {
        if tokio::fs::try_exists(path.as_ref()).await.unwrap_or(false) {
            return Self::load_from_file(path).await;
        }

        let mut config = AppConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> TrackingResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source
    ///
    /// Recognised variables:
    /// - `APP_HOST`, `APP_PORT`
    /// - `REDIS_URL`, `BOL_CACHE_BACKEND` (`redis` | `memory`)
    /// - `BOL_CACHE_TTL` (humantime, e.g. `1h`), `BOL_CACHE_KEY_PREFIX`
    /// - `THIRD_PARTY_API_URL`, `THIRD_PARTY_TRACKING_URL`,
    ///   `THIRD_PARTY_USERNAME`, `THIRD_PARTY_PASSWORD`, `THIRD_PARTY_API_KEY`
    /// - `BOL_SHEET_ID`, `BOL_SHEET_TABS` (comma separated)
    /// - `BOL_LOG_LEVEL`, `BOL_LOG_FORMAT`
    pub fn apply_overrides_from<F>(&mut self, var: F) -> TrackingResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("APP_HOST") {
            self.server.bind_address = host;
        }

        if let Some(port) = var("APP_PORT") {
            self.server.http_port = port
                .parse()
                .map_err(|e| TrackingError::config(format!("Invalid APP_PORT: {}", e)))?;
        }

        if let Some(url) = var("REDIS_URL") {
            self.cache.redis.url = url;
        }

        if let Some(backend) = var("BOL_CACHE_BACKEND") {
            self.cache.backend = match backend.to_lowercase().as_str() {
                "redis" => CacheBackend::Redis,
                "memory" => CacheBackend::Memory,
                other => {
                    return Err(TrackingError::config(format!(
                        "Invalid BOL_CACHE_BACKEND: {}",
                        other
                    )))
                }
            };
        }

        if let Some(ttl) = var("BOL_CACHE_TTL") {
            self.lookup.ttl = humantime::parse_duration(&ttl)
                .map_err(|e| TrackingError::config(format!("Invalid BOL_CACHE_TTL: {}", e)))?;
        }

        if let Some(prefix) = var("BOL_CACHE_KEY_PREFIX") {
            self.lookup.key_prefix = prefix;
        }

        if let Some(url) = var("THIRD_PARTY_API_URL") {
            self.vendor.base_url = Some(url);
        }

        if let Some(url) = var("THIRD_PARTY_TRACKING_URL") {
            self.vendor.tracking_url = Some(url);
            self.vendor.enabled = true;
        }

        if let Some(username) = var("THIRD_PARTY_USERNAME") {
            self.vendor.username = Some(username);
        }

        if let Some(password) = var("THIRD_PARTY_PASSWORD") {
            self.vendor.password = Some(password);
        }

        if let Some(api_key) = var("THIRD_PARTY_API_KEY") {
            self.vendor.api_key = Some(api_key);
        }

        if let Some(id) = var("BOL_SHEET_ID") {
            self.sheet.spreadsheet_id = id;
        }

        if let Some(tabs) = var("BOL_SHEET_TABS") {
            self.sheet.tabs = tabs
                .split(',')
                .map(|tab| tab.trim().to_string())
                .filter(|tab| !tab.is_empty())
                .collect();
        }

        if let Some(level) = var("BOL_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = var("BOL_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every error before failing
    pub fn validate(&self) -> TrackingResult<()> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be greater than 0".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        }

        if self.cache.backend == CacheBackend::Redis {
            if let Err(e) = Url::parse(&self.cache.redis.url) {
                errors.push(format!("cache.redis.url is not a valid URL: {}", e));
            }
            if self.cache.redis.max_connect_attempts == 0 {
                errors.push("cache.redis.max_connect_attempts must be greater than 0".to_string());
            }
            if self.cache.redis.base_retry_delay > self.cache.redis.max_retry_delay {
                errors.push("cache.redis.base_retry_delay cannot exceed max_retry_delay".to_string());
            }
            if self.cache.redis.operation_timeout.is_zero() {
                errors.push("cache.redis.operation_timeout must be greater than 0".to_string());
            }
        }

        if self.lookup.key_prefix.is_empty() {
            errors.push("lookup.key_prefix cannot be empty".to_string());
        }

        if self.lookup.ttl.as_secs() == 0 {
            errors.push("lookup.ttl must be at least one second".to_string());
        }

        if !(-12..=14).contains(&self.lookup.utc_offset_hours) {
            errors.push(format!(
                "lookup.utc_offset_hours must be between -12 and 14, got {}",
                self.lookup.utc_offset_hours
            ));
        }

        if self.vendor.enabled {
            match &self.vendor.tracking_url {
                Some(url) => {
                    if let Err(e) = Url::parse(url) {
                        errors.push(format!("vendor.tracking_url is not a valid URL: {}", e));
                    }
                }
                None => errors.push("vendor.tracking_url is required when the vendor source is enabled".to_string()),
            }

            let has_login = self.vendor.username.is_some() && self.vendor.password.is_some();
            if has_login && self.vendor.base_url.is_none() {
                errors.push("vendor.base_url is required for vendor login".to_string());
            }
            if !has_login && self.vendor.api_key.is_none() {
                errors.push("vendor needs either username/password or api_key".to_string());
            }
            if self.vendor.timeout.is_zero() {
                errors.push("vendor.timeout must be greater than 0".to_string());
            }
        }

        if let Err(e) = Url::parse(&self.sheet.base_url) {
            errors.push(format!("sheet.base_url is not a valid URL: {}", e));
        }

        if self.sheet.spreadsheet_id.is_empty() {
            errors.push("sheet.spreadsheet_id cannot be empty".to_string());
        }

        if self.sheet.tabs.is_empty() {
            errors.push("sheet.tabs must list at least one tab".to_string());
        }

        let column_ok = self.sheet.code_column.len() == 1
            && self.sheet.code_column.chars().all(|c| c.is_ascii_uppercase());
        if !column_ok {
            errors.push(format!(
                "sheet.code_column must be a single column letter, got '{}'",
                self.sheet.code_column
            ));
        }

        if self.sheet.schema_version != 1 {
            errors.push(format!(
                "sheet.schema_version {} is not supported (supported: 1)",
                self.sheet.schema_version
            ));
        }

        if self.sheet.timeout.is_zero() {
            errors.push("sheet.timeout must be greater than 0".to_string());
        }

        if self.timeline.delivery_after_min > self.timeline.delivery_after_max {
            errors.push("timeline.delivery_after_min cannot exceed delivery_after_max".to_string());
        }

        // events are emitted in offset order
        if self.timeline.transfer_after >= self.timeline.delivery_after_min {
            errors.push("timeline.transfer_after must be less than delivery_after_min".to_string());
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if !errors.is_empty() {
            return Err(TrackingError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 3001,
        }
    }
}

/// Which key-value store backs the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis: RedisCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            redis: RedisCacheConfig::default(),
        }
    }
}

/// Lookup key and TTL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Namespace prefix of the lookup key; the upper-cased code is appended
    pub key_prefix: String,

    /// TTL for both positive and negative cache entries
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Offset of the timezone spreadsheet dates are written in
    pub utc_offset_hours: i32,
}

impl LookupConfig {
    /// The configured offset as a chrono timezone
    ///
    /// Out-of-range values (rejected by `validate`) fall back to UTC.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            key_prefix: "bol:detailBySheet:".to_string(),
            ttl: Duration::from_secs(3600),
            utc_offset_hours: 7,
        }
    }
}

/// Vendor tracking API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    /// Whether the primary source is consulted at all
    pub enabled: bool,

    /// Base URL of the client API (login)
    pub base_url: Option<String>,

    /// Base URL of the tracking API
    pub tracking_url: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Static tracking key, used when no login credentials are configured
    pub api_key: Option<String>,

    /// Timeout for every vendor request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Cache key for the login session
    pub session_cache_key: String,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            tracking_url: None,
            username: None,
            password: None,
            api_key: None,
            timeout: Duration::from_secs(30),
            session_cache_key: "247:client:data".to_string(),
        }
    }
}

/// Published spreadsheet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    /// Base URL of the spreadsheet host
    pub base_url: String,

    pub spreadsheet_id: String,

    /// Tabs scanned in order; the first tab with a matching row wins
    pub tabs: Vec<String>,

    /// Column holding the shipment code (the server-side filter column)
    pub code_column: String,

    /// Column layout version, see `lookup::sheet::SheetSchema`
    pub schema_version: u32,

    /// Origin reported for spreadsheet records, which carry no origin column
    pub default_origin: String,

    /// Timeout for every tab request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            base_url: "https://docs.google.com".to_string(),
            spreadsheet_id: String::new(),
            tabs: vec!["Sheet1".to_string()],
            code_column: "B".to_string(),
            schema_version: 1,
            default_origin: "2/10 Hồng Hà,p2,Tân Bình,HCM".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Offsets for synthesized tracking events
///
/// Spreadsheet rows have no event history, only a start date, an optional
/// end date and the current status. Intermediate events are placed at these
/// offsets from the start date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Offset of the "in transit" event
    #[serde(with = "humantime_serde")]
    pub transfer_after: Duration,

    /// Lower bound of the "out for delivery" offset
    #[serde(with = "humantime_serde")]
    pub delivery_after_min: Duration,

    /// Upper bound of the "out for delivery" offset
    #[serde(with = "humantime_serde")]
    pub delivery_after_max: Duration,

    /// Offset of the final event when the row has no end date
    #[serde(with = "humantime_serde")]
    pub completion_after: Duration,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            transfer_after: Duration::from_secs(13 * 3600),
            delivery_after_min: Duration::from_secs(20 * 3600),
            delivery_after_max: Duration::from_secs(27 * 3600),
            completion_after: Duration::from_secs(30 * 3600),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sheet.spreadsheet_id = "1AbCdEf".to_string();
        config
    }

    #[test]
    fn test_defaults_need_only_a_spreadsheet() {
        assert!(AppConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
sheet:
  spreadsheet_id: "1AbCdEf"
  tabs: ["T10", "T11"]
lookup:
  ttl: 10m
timeline:
  transfer_after: 12h
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sheet.tabs, vec!["T10", "T11"]);
        assert_eq!(config.lookup.ttl, Duration::from_secs(600));
        assert_eq!(config.lookup.key_prefix, "bol:detailBySheet:");
        assert_eq!(config.timeline.transfer_after, Duration::from_secs(12 * 3600));
        assert_eq!(config.timeline.delivery_after_min, Duration::from_secs(20 * 3600));
        assert_eq!(config.server.http_port, 3001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_from_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("APP_PORT", "8088"),
            ("REDIS_URL", "redis://cache:6380"),
            ("BOL_CACHE_TTL", "90s"),
            ("BOL_SHEET_TABS", "T1, T2 ,,T3"),
            ("THIRD_PARTY_TRACKING_URL", "https://tracking.example.com"),
            ("THIRD_PARTY_API_KEY", "k-123"),
        ]);

        let mut config = valid_config();
        config
            .apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.http_port, 8088);
        assert_eq!(config.cache.redis.url, "redis://cache:6380");
        assert_eq!(config.lookup.ttl, Duration::from_secs(90));
        assert_eq!(config.sheet.tabs, vec!["T1", "T2", "T3"]);
        assert!(config.vendor.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = valid_config();
        let result = config.apply_overrides_from(|name| {
            (name == "APP_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(TrackingError::Configuration { .. })));
    }

    #[test]
    fn test_validation_reports_all_errors() {
        let mut config = valid_config();
        config.lookup.key_prefix.clear();
        config.sheet.code_column = "AB".to_string();
        config.timeline.delivery_after_min = Duration::from_secs(30 * 3600);
        config.logging.format = "xml".to_string();

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("key_prefix"));
        assert!(message.contains("code_column"));
        assert!(message.contains("delivery_after_min"));
        assert!(message.contains("log format"));
    }

    #[test]
    fn test_transfer_must_precede_delivery() {
        let mut config = valid_config();
        config.timeline.transfer_after = Duration::from_secs(26 * 3600);
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("transfer_after"));

        config.timeline.transfer_after = config.timeline.delivery_after_min;
        assert!(config.validate().is_err());

        config.timeline.transfer_after = Duration::from_secs(19 * 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vendor_requires_credentials() {
        let mut config = valid_config();
        config.vendor.enabled = true;
        config.vendor.tracking_url = Some("https://tracking.example.com".to_string());
        assert!(config.validate().is_err());

        config.vendor.api_key = Some("key".to_string());
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"sheet:\n  spreadsheet_id: \"1AbCdEf\"\n  code_column: C\ncache:\n  backend: memory\n",
        )
        .unwrap();

        let config = AppConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.sheet.spreadsheet_id, "1AbCdEf");
        assert_eq!(config.sheet.code_column, "C");

        let missing = AppConfig::load_from_file("/definitely/not/here.yaml").await;
        assert!(matches!(missing, Err(TrackingError::Io { .. })));
    }

    #[tokio::test]
    async fn test_load_from_file_rejects_bad_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"sheet: [unterminated\n").unwrap();

        let err = AppConfig::load_from_file(file.path()).await.unwrap_err();
        assert!(matches!(err, TrackingError::Yaml { .. }));
        assert_eq!(err.error_type(), "yaml_error");
    }

    #[test]
    fn test_utc_offset() {
        let config = LookupConfig::default();
        assert_eq!(config.utc_offset().local_minus_utc(), 7 * 3600);
    }
}
