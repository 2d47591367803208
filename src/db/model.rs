//! Row mapping for the repository layer.
//!
//! Status columns are stored as the upper-case strings of `crate::model`;
//! an unknown value is a corrupt row and surfaces as an error.

use crate::model::{AppType, ConfigStatus, ConfigStep, ConversationState, MigrationStatus, UserConfig};
use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub const USER_CONFIG_COLUMNS: &str = "id, external_user_id, app_type, status, credential, \
     container_id, is_guest, migration_status, updated_at";

pub const CONVERSATION_COLUMNS: &str = "id, external_user_id, step, pending_key, updated_at";

pub fn user_config_from_row(row: &SqliteRow) -> Result<UserConfig> {
    let app_type: String = row.try_get("app_type")?;
    let status: String = row.try_get("status")?;
    let migration: String = row.try_get("migration_status")?;
    Ok(UserConfig {
        id: row.try_get("id")?,
        external_user_id: row.try_get("external_user_id")?,
        app_type: AppType::parse(&app_type).ok_or_else(|| anyhow!("unknown app_type {app_type}"))?,
        status: ConfigStatus::parse(&status).ok_or_else(|| anyhow!("unknown status {status}"))?,
        credential: row.try_get("credential")?,
        container_id: row.try_get("container_id")?,
        is_guest: row.try_get::<i64, _>("is_guest")? != 0,
        migration_status: MigrationStatus::parse(&migration)
            .ok_or_else(|| anyhow!("unknown migration_status {migration}"))?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub fn conversation_from_row(row: &SqliteRow) -> Result<ConversationState> {
    let step: String = row.try_get("step")?;
    Ok(ConversationState {
        id: row.try_get("id")?,
        external_user_id: row.try_get("external_user_id")?,
        step: ConfigStep::parse(&step).ok_or_else(|| anyhow!("unknown step {step}"))?,
        pending_key: row.try_get("pending_key")?,
        updated_at: row.try_get("updated_at")?,
    })
}
