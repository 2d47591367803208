use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Note application a user is bound to. Only Notion is modelled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppType {
    Notion,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Notion => "NOTION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOTION" => Some(AppType::Notion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigStatus {
    Active,
    Inactive,
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStatus::Active => "ACTIVE",
            ConfigStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ConfigStatus::Active),
            "INACTIVE" => Some(ConfigStatus::Inactive),
            _ => None,
        }
    }
}

/// Progress of a guest → own-workspace migration.
///
/// Only moves forward: `None -> Migrating -> {Done, Failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MigrationStatus {
    None,
    Migrating,
    Done,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::None => "NONE",
            MigrationStatus::Migrating => "MIGRATING",
            MigrationStatus::Done => "DONE",
            MigrationStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(MigrationStatus::None),
            "MIGRATING" => Some(MigrationStatus::Migrating),
            "DONE" => Some(MigrationStatus::Done),
            "FAILED" => Some(MigrationStatus::Failed),
            _ => None,
        }
    }
}

/// Step of the conversational setup flow. `None` means no flow is in progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigStep {
    None,
    WaitingKey,
    WaitingDb,
}

impl ConfigStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStep::None => "NONE",
            ConfigStep::WaitingKey => "WAITING_KEY",
            ConfigStep::WaitingDb => "WAITING_DB",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(ConfigStep::None),
            "WAITING_KEY" => Some(ConfigStep::WaitingKey),
            "WAITING_DB" => Some(ConfigStep::WaitingDb),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: i64,
    pub external_user_id: String,
    pub app_type: AppType,
    pub status: ConfigStatus,
    /// Encrypted credential. Empty for guests, who use the shared admin credential.
    pub credential: String,
    pub container_id: Option<String>,
    pub is_guest: bool,
    pub migration_status: MigrationStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: i64,
    pub external_user_id: String,
    pub step: ConfigStep,
    /// Encrypted credential collected in `WaitingKey`, cleared when the flow ends.
    pub pending_key: Option<String>,
    pub updated_at: DateTime<Utc>,
}
