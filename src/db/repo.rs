use super::model::{conversation_from_row, user_config_from_row, CONVERSATION_COLUMNS, USER_CONFIG_COLUMNS};
use crate::model::{ConfigStatus, ConfigStep, ConversationState, MigrationStatus, UserConfig};
use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs: expand a leading `~/`, create the parent
/// directory and ask SQLite to create the file. In-memory and non-sqlite
/// URLs pass through untouched.
pub fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = query_part.unwrap_or("mode=rwc");
    format!("sqlite://{}?{}", expanded, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// user_config

#[instrument(skip_all)]
pub async fn find_user_config(pool: &Pool, external_user_id: &str) -> Result<Option<UserConfig>> {
    let sql = format!("SELECT {USER_CONFIG_COLUMNS} FROM user_config WHERE external_user_id = ?");
    let row = sqlx::query(&sql)
        .bind(external_user_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(user_config_from_row).transpose()
}

/// Insert an ACTIVE guest record without a container. Returns `false` if a
/// record already exists for the user (the existing row is left alone).
#[instrument(skip_all)]
pub async fn insert_guest_config(pool: &Pool, external_user_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO user_config (external_user_id, status, credential, is_guest, migration_status, updated_at) \
         VALUES (?, ?, '', 1, ?, ?) ON CONFLICT(external_user_id) DO NOTHING",
    )
    .bind(external_user_id)
    .bind(ConfigStatus::Active.as_str())
    .bind(MigrationStatus::None.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Attach a freshly created container to a record that has none yet.
/// Returns `false` if another caller won the race.
#[instrument(skip_all)]
pub async fn assign_container(pool: &Pool, external_user_id: &str, container_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE user_config SET container_id = ?, updated_at = ? \
         WHERE external_user_id = ? AND container_id IS NULL",
    )
    .bind(container_id)
    .bind(Utc::now())
    .bind(external_user_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn list_active_configs(pool: &Pool) -> Result<Vec<UserConfig>> {
    let sql = format!("SELECT {USER_CONFIG_COLUMNS} FROM user_config WHERE status = ? ORDER BY id");
    let rows = sqlx::query(&sql)
        .bind(ConfigStatus::Active.as_str())
        .fetch_all(pool)
        .await?;
    rows.iter().map(user_config_from_row).collect()
}

/// Compare-and-swap on `migration_status`.
#[instrument(skip_all, fields(from = from.as_str(), to = to.as_str()))]
pub async fn transition_migration(
    pool: &Pool,
    external_user_id: &str,
    from: MigrationStatus,
    to: MigrationStatus,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE user_config SET migration_status = ?, updated_at = ? \
         WHERE external_user_id = ? AND migration_status = ?",
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(external_user_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;
    let swapped = res.rows_affected() == 1;
    debug!(swapped, "migration status transition");
    Ok(swapped)
}

/// Swap in the destination workspace and mark the migration DONE. Only
/// applies while the record is MIGRATING.
#[instrument(skip_all)]
pub async fn complete_migration(
    pool: &Pool,
    external_user_id: &str,
    credential: &str,
    container_id: &str,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE user_config SET credential = ?, container_id = ?, is_guest = 0, status = ?, \
         migration_status = ?, updated_at = ? \
         WHERE external_user_id = ? AND migration_status = ?",
    )
    .bind(credential)
    .bind(container_id)
    .bind(ConfigStatus::Active.as_str())
    .bind(MigrationStatus::Done.as_str())
    .bind(Utc::now())
    .bind(external_user_id)
    .bind(MigrationStatus::Migrating.as_str())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

// ---------------------------------------------------------------------------
// conversation_state

#[instrument(skip_all)]
pub async fn find_conversation(pool: &Pool, external_user_id: &str) -> Result<Option<ConversationState>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversation_state WHERE external_user_id = ?");
    let row = sqlx::query(&sql)
        .bind(external_user_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(conversation_from_row).transpose()
}

/// (Re)start the setup flow from any step.
#[instrument(skip_all)]
pub async fn start_conversation(pool: &Pool, external_user_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO conversation_state (external_user_id, step, pending_key, updated_at) \
         VALUES (?, ?, NULL, ?) \
         ON CONFLICT(external_user_id) DO UPDATE SET step = excluded.step, \
         pending_key = NULL, updated_at = excluded.updated_at",
    )
    .bind(external_user_id)
    .bind(ConfigStep::WaitingKey.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// WAITING_KEY → WAITING_DB, storing the (already encrypted) pending key.
#[instrument(skip_all)]
pub async fn advance_to_waiting_db(pool: &Pool, external_user_id: &str, pending_key: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE conversation_state SET step = ?, pending_key = ?, updated_at = ? \
         WHERE external_user_id = ? AND step = ?",
    )
    .bind(ConfigStep::WaitingDb.as_str())
    .bind(pending_key)
    .bind(Utc::now())
    .bind(external_user_id)
    .bind(ConfigStep::WaitingKey.as_str())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn touch_conversation(pool: &Pool, external_user_id: &str) -> Result<()> {
    sqlx::query("UPDATE conversation_state SET updated_at = ? WHERE external_user_id = ?")
        .bind(Utc::now())
        .bind(external_user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// WAITING_DB → NONE without touching the user's config.
#[instrument(skip_all)]
pub async fn finish_conversation(pool: &Pool, external_user_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE conversation_state SET step = ?, pending_key = NULL, updated_at = ? \
         WHERE external_user_id = ? AND step = ?",
    )
    .bind(ConfigStep::None.as_str())
    .bind(Utc::now())
    .bind(external_user_id)
    .bind(ConfigStep::WaitingDb.as_str())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Close a WAITING_DB conversation and upsert the ACTIVE config in one
/// transaction. Returns `false` and changes nothing if the conversation was
/// no longer in WAITING_DB or the user's notes are being migrated.
#[instrument(skip_all)]
pub async fn save_validated_config(
    pool: &Pool,
    external_user_id: &str,
    credential: &str,
    container_id: &str,
) -> Result<bool> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let closed = sqlx::query(
        "UPDATE conversation_state SET step = ?, pending_key = NULL, updated_at = ? \
         WHERE external_user_id = ? AND step = ?",
    )
    .bind(ConfigStep::None.as_str())
    .bind(now)
    .bind(external_user_id)
    .bind(ConfigStep::WaitingDb.as_str())
    .execute(&mut *tx)
    .await?;
    if closed.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }

    let saved = sqlx::query(
        "INSERT INTO user_config (external_user_id, status, credential, container_id, is_guest, migration_status, updated_at) \
         VALUES (?, ?, ?, ?, 0, ?, ?) \
         ON CONFLICT(external_user_id) DO UPDATE SET status = excluded.status, \
         credential = excluded.credential, container_id = excluded.container_id, \
         is_guest = 0, updated_at = excluded.updated_at \
         WHERE user_config.migration_status != ?",
    )
    .bind(external_user_id)
    .bind(ConfigStatus::Active.as_str())
    .bind(credential)
    .bind(container_id)
    .bind(MigrationStatus::None.as_str())
    .bind(now)
    .bind(MigrationStatus::Migrating.as_str())
    .execute(&mut *tx)
    .await?;
    if saved.rows_affected() != 1 {
        debug!("config save refused while migrating");
        tx.rollback().await?;
        return Ok(false);
    }
    tx.commit().await?;
    Ok(true)
}
