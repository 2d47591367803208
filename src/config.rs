//! Configuration loader and validator for the notebox bridge.
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub notion: Notion,
    pub security: Security,
    #[serde(default)]
    pub migration: Migration,
    #[serde(default)]
    pub sweep: Sweep,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Number of worker tasks draining the inbound queue.
    pub workers: usize,
    pub queue_capacity: usize,
    /// Offset applied to UTC when deciding what "today" is.
    #[serde(default)]
    pub utc_offset_hours: i32,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Empty means everyone may talk to the bot.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

/// Notion API settings and the guest workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notion {
    pub version: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Shared integration token used for guest containers.
    pub admin_token: String,
    /// Page under which guest containers are created.
    pub guest_root_page_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Security {
    /// Base64 of the 32-byte key protecting stored credentials.
    pub credential_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Migration {
    pub pace_ms: u64,
}

impl Default for Migration {
    fn default() -> Self {
        Self { pace_ms: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sweep {
    pub enabled: bool,
    /// Local hour (0..=23) at which yesterday's pages are digested.
    pub hour: u32,
}

impl Default for Sweep {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 8,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.app.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn migration_pace(&self) -> Duration {
        Duration::from_millis(self.migration.pace_ms)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/notebox.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.workers == 0 {
        return Err(ConfigError::Invalid("app.workers must be > 0"));
    }
    if cfg.app.queue_capacity == 0 {
        return Err(ConfigError::Invalid("app.queue_capacity must be > 0"));
    }
    if !(-12..=14).contains(&cfg.app.utc_offset_hours) {
        return Err(ConfigError::Invalid("app.utc_offset_hours must be within -12..=14"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }
    if cfg.notion.admin_token.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.admin_token must be non-empty"));
    }
    if cfg.notion.guest_root_page_id.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.guest_root_page_id must be non-empty"));
    }
    if let Some(url) = &cfg.notion.base_url {
        if reqwest::Url::parse(url).is_err() {
            return Err(ConfigError::Invalid("notion.base_url must be a valid URL"));
        }
    }

    if cfg.security.credential_key.trim().is_empty() {
        return Err(ConfigError::Invalid("security.credential_key must be non-empty"));
    }
    if crate::crypto::CredentialCipher::from_base64(&cfg.security.credential_key).is_err() {
        return Err(ConfigError::Invalid(
            "security.credential_key must be base64 of 32 bytes",
        ));
    }

    if cfg.sweep.hour > 23 {
        return Err(ConfigError::Invalid("sweep.hour must be within 0..=23"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  workers: 4
  queue_capacity: 256
  utc_offset_hours: 8

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  allowed_users: []

notion:
  version: "2025-09-03"
  admin_token: "YOUR_NOTION_ADMIN_INTEGRATION_TOKEN"
  guest_root_page_id: "NOTION_GUEST_ROOT_PAGE_ID"

security:
  credential_key: "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8="

migration:
  pace_ms: 300

sweep:
  enabled: true
  hour: 8
"#
}
