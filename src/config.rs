//! Configuration file parser for ~/.config/tldr-harvest/config.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged as likely typos.
//! Values are checked by [`Config::validate`] before any network call.
use chrono::NaiveDate;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::orchestrator::{Backoff, RetryPolicy};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level harvester configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Newsletter slug, e.g. "tech", "ai", "webdev".
    pub newsletter_type: String,
    pub max_articles: usize,
    /// ISO 3166 alpha-2 code selecting the holiday table.
    pub country_code: String,
    /// Translation target (e.g. "de", "pt-BR"); unset disables translation.
    pub target_language: Option<String>,
    pub base_url: String,
    pub database_path: PathBuf,
    pub audio_dir: PathBuf,
    /// Seconds between consecutive processed days.
    pub delay_between_days: f64,
    pub retry_failed_days: bool,
    /// Total attempts per day per run.
    pub max_retries: u32,
    pub retry_backoff: Backoff,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub min_request_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub enrichment_concurrency: usize,
    /// Extra attempts per enrichment stage on transient errors.
    pub stage_retries: u32,
    pub stage_backoff_ms: u64,
    /// Additional non-publishing dates on top of the country's holidays.
    pub extra_holidays: Vec<NaiveDate>,
    pub translation: TranslationConfig,
    pub audio: AudioConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            newsletter_type: "tech".to_string(),
            max_articles: 20,
            country_code: "US".to_string(),
            target_language: None,
            base_url: "https://tldr.tech".to_string(),
            database_path: PathBuf::from("data/tldr.db"),
            audio_dir: PathBuf::from("data/audio"),
            delay_between_days: 2.0,
            retry_failed_days: true,
            max_retries: 3,
            retry_backoff: Backoff::Exponential,
            retry_base_delay_ms: 2000,
            retry_max_delay_ms: 60_000,
            min_request_interval_ms: 1000,
            request_timeout_secs: 30,
            enrichment_concurrency: 4,
            stage_retries: 2,
            stage_backoff_ms: 500,
            extra_holidays: Vec::new(),
            translation: TranslationConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

/// `[translation]` table.
///
/// Custom Debug impl masks `api_key` so it never reaches logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Translation runs only when this is set and `target_language` is set.
    pub enabled: bool,
    pub api_url: String,
    /// Alternative to the TRANSLATION_API_KEY env var, which takes precedence.
    pub api_key: Option<String>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api-free.deepl.com".to_string(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for TranslationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationConfig")
            .field("enabled", &self.enabled)
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// `[audio]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub command: String,
    pub voice: String,
    /// Words per minute.
    pub rate: u32,
    pub volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "espeak-ng".to_string(),
            voice: "en-us".to_string(),
            rate: 180,
            volume: 0.9,
        }
    }
}

const TOP_LEVEL_KEYS: &[&str] = &[
    "newsletter_type",
    "max_articles",
    "country_code",
    "target_language",
    "base_url",
    "database_path",
    "audio_dir",
    "delay_between_days",
    "retry_failed_days",
    "max_retries",
    "retry_backoff",
    "retry_base_delay_ms",
    "retry_max_delay_ms",
    "min_request_interval_ms",
    "request_timeout_secs",
    "enrichment_concurrency",
    "stage_retries",
    "stage_backoff_ms",
    "extra_holidays",
    "translation",
    "audio",
];
const TRANSLATION_KEYS: &[&str] = &["enabled", "api_url", "api_key"];
const AUDIO_KEYS: &[&str] = &["enabled", "command", "voice", "rate", "volume"];

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    for (section, known) in [("translation", TRANSLATION_KEYS), ("audio", AUDIO_KEYS)] {
        if let Some(toml::Value::Table(table)) = raw.get(section) {
            for key in table.keys() {
                if !known.contains(&key.as_str()) {
                    tracing::warn!(key = %format!("{section}.{key}"), "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// Does not validate values; call [`Config::validate`] afterwards.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file cannot exhaust memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            newsletter = %config.newsletter_type,
            country = %config.country_code,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Check every value, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let slug_ok = !self.newsletter_type.is_empty()
            && self
                .newsletter_type
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !slug_ok {
            return Err(invalid(
                "newsletter_type",
                format!("'{}' must match [a-z0-9-]+", self.newsletter_type),
            ));
        }

        if !(1..=200).contains(&self.max_articles) {
            return Err(invalid("max_articles", "must be between 1 and 200"));
        }

        if self.country_code.len() != 2 || !self.country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid(
                "country_code",
                format!("'{}' must be two ASCII letters", self.country_code),
            ));
        }

        if let Some(lang) = &self.target_language {
            let ok = (2..=5).contains(&lang.len())
                && lang.chars().all(|c| c.is_ascii_alphabetic() || c == '-');
            if !ok {
                return Err(invalid(
                    "target_language",
                    format!("'{lang}' must be 2-5 characters of [A-Za-z-]"),
                ));
            }
        }

        match Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(invalid(
                    "base_url",
                    format!("scheme '{}' is not http(s)", url.scheme()),
                ))
            }
            Err(e) => return Err(invalid("base_url", e.to_string())),
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(invalid("database_path", "must not be empty"));
        }
        if self.audio_dir.as_os_str().is_empty() {
            return Err(invalid("audio_dir", "must not be empty"));
        }

        if !self.delay_between_days.is_finite() || self.delay_between_days < 0.0 {
            return Err(invalid("delay_between_days", "must be a non-negative number"));
        }

        if self.max_retries < 1 {
            return Err(invalid("max_retries", "must be at least 1"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(invalid(
                "retry_max_delay_ms",
                "must be at least retry_base_delay_ms",
            ));
        }
        if self.request_timeout_secs < 1 {
            return Err(invalid("request_timeout_secs", "must be at least 1"));
        }
        if self.enrichment_concurrency < 1 {
            return Err(invalid("enrichment_concurrency", "must be at least 1"));
        }

        if self.translation_active() {
            if let Err(e) = Url::parse(&self.translation.api_url) {
                return Err(invalid("translation.api_url", e.to_string()));
            }
            if self.translation_api_key().is_none() {
                return Err(invalid(
                    "translation.api_key",
                    "required when target_language is set (or set TRANSLATION_API_KEY)",
                ));
            }
        }

        if self.audio.enabled {
            if self.audio.command.trim().is_empty() {
                return Err(invalid("audio.command", "must not be empty"));
            }
            if !(80..=450).contains(&self.audio.rate) {
                return Err(invalid("audio.rate", "must be between 80 and 450"));
            }
            if !(0.0..=1.0).contains(&self.audio.volume) {
                return Err(invalid("audio.volume", "must be between 0.0 and 1.0"));
            }
        }

        Ok(())
    }

    /// Whether translation should run at all.
    pub fn translation_active(&self) -> bool {
        self.translation.enabled && self.target_language.is_some()
    }

    /// API key from TRANSLATION_API_KEY, falling back to the config file.
    pub fn translation_api_key(&self) -> Option<SecretString> {
        std::env::var("TRANSLATION_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.translation.api_key.clone())
            .map(SecretString::from)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff: self.retry_backoff,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// `delay_between_days` as a Duration; assumes [`Config::validate`] passed.
    pub fn day_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_between_days).unwrap_or(Duration::ZERO)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("tldr_harvest_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.newsletter_type, "tech");
        assert_eq!(config.max_articles, 20);
        assert_eq!(config.country_code, "US");
        assert!(config.target_language.is_none());
        assert_eq!(config.base_url, "https://tldr.tech");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Backoff::Exponential);
        assert!(config.retry_failed_days);
        assert!(config.audio.enabled);
        assert_eq!(config.audio.command, "espeak-ng");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/tldr_harvest_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.newsletter_type, "tech");
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "   \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_articles, 20);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
newsletter_type = "ai"
max_articles = 10
country_code = "GB"
target_language = "de"
base_url = "https://mirror.example.com"
database_path = "/var/lib/tldr/tldr.db"
delay_between_days = 0.5
retry_failed_days = false
max_retries = 5
retry_backoff = "fixed"
retry_base_delay_ms = 100
retry_max_delay_ms = 1000
extra_holidays = ["2024-12-24", "2024-12-31"]

[translation]
api_url = "https://api.deepl.com"
api_key = "test-key-123"

[audio]
enabled = false
voice = "de"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();

        assert_eq!(config.newsletter_type, "ai");
        assert_eq!(config.max_articles, 10);
        assert_eq!(config.country_code, "GB");
        assert_eq!(config.target_language.as_deref(), Some("de"));
        assert_eq!(config.day_delay(), Duration::from_millis(500));
        assert!(!config.retry_failed_days);
        assert_eq!(config.retry_backoff, Backoff::Fixed);
        assert_eq!(
            config.extra_holidays,
            vec![
                NaiveDate::from_ymd_opt(2024, 12, 24).unwrap(),
                NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            ]
        );
        assert_eq!(config.translation.api_key.as_deref(), Some("test-key-123"));
        assert!(!config.audio.enabled);
        assert_eq!(config.audio.voice, "de");
        assert_eq!(config.audio.rate, 180); // default

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(100));

        assert!(config.translation_active());
        assert!(config.validate().is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result = Config::from_toml("this is not [valid toml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml(
            r#"
newsletter_type = "crypto"
totally_fake_key = "should not fail"

[audio]
speed = 3
"#,
        )
        .unwrap();
        assert_eq!(config.newsletter_type, "crypto");
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::from_toml("max_articles = \"many\"\n").is_err());
        assert!(Config::from_toml("retry_backoff = \"linear\"\n").is_err());
        assert!(Config::from_toml("extra_holidays = [\"not-a-date\"]\n").is_err());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        std::fs::remove_dir_all(&dir).ok();
    }

    fn invalid_field(config: &Config) -> &'static str {
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut c = Config::default();
        c.newsletter_type = "Tech News".into();
        assert_eq!(invalid_field(&c), "newsletter_type");

        let mut c = Config::default();
        c.max_articles = 0;
        assert_eq!(invalid_field(&c), "max_articles");
        c.max_articles = 201;
        assert_eq!(invalid_field(&c), "max_articles");

        let mut c = Config::default();
        c.country_code = "USA".into();
        assert_eq!(invalid_field(&c), "country_code");

        let mut c = Config::default();
        c.base_url = "ftp://tldr.tech".into();
        assert_eq!(invalid_field(&c), "base_url");

        let mut c = Config::default();
        c.delay_between_days = -1.0;
        assert_eq!(invalid_field(&c), "delay_between_days");
        c.delay_between_days = f64::NAN;
        assert_eq!(invalid_field(&c), "delay_between_days");

        let mut c = Config::default();
        c.max_retries = 0;
        assert_eq!(invalid_field(&c), "max_retries");

        let mut c = Config::default();
        c.retry_base_delay_ms = 5000;
        c.retry_max_delay_ms = 1000;
        assert_eq!(invalid_field(&c), "retry_max_delay_ms");

        let mut c = Config::default();
        c.audio.rate = 20;
        assert_eq!(invalid_field(&c), "audio.rate");

        let mut c = Config::default();
        c.audio.volume = 1.5;
        assert_eq!(invalid_field(&c), "audio.volume");
    }

    #[test]
    fn test_validate_target_language() {
        let mut c = Config::default();
        c.translation.api_key = Some("k".into());
        c.target_language = Some("pt-BR".into());
        assert!(c.validate().is_ok());
        c.target_language = Some("english!".into());
        assert_eq!(invalid_field(&c), "target_language");
    }

    #[test]
    fn test_translation_disabled_needs_no_key() {
        let mut c = Config::default();
        c.target_language = Some("fr".into());
        c.translation.enabled = false;
        assert!(!c.translation_active());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_debug_masks_api_key() {
        let mut config = Config::default();
        config.translation.api_key = Some("super-secret-key-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(
            !debug_output.contains("super-secret-key-12345"),
            "Debug output should not contain the API key"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }
}
