//! Append-or-create of the user's page for the current day.

use crate::codec::NotionContent;
use crate::crypto::CredentialCipher;
use crate::db::{self, Pool};
use crate::model::{ConfigStatus, MigrationStatus, UserConfig};
use crate::notion::{DocumentApi, NotionError};
use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDate, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const MSG_MIGRATING: &str = "Your notes are being migrated, please try again in a moment.";
pub const MSG_NOT_CONFIGURED: &str =
    "Notion is not configured or not active yet. Send /config to set it up.";
pub const MSG_GUEST_FAILED: &str =
    "Could not create your guest notebook, please try again later.";
pub const MSG_APPEND_FAILED: &str = "Appending to today's note failed, please retry.";
pub const MSG_CREATE_FAILED: &str =
    "Creating today's note failed. Please check your database configuration.";
pub const MSG_EMPTY: &str = "Nothing to save.";
pub const MSG_SYNC_ERROR: &str = "Sync error, please try again later.";

/// Operator-owned workspace that hosts guest containers.
#[derive(Clone)]
pub struct GuestWorkspace {
    pub admin_token: String,
    pub root_page_id: String,
}

impl fmt::Debug for GuestWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestWorkspace")
            .field("admin_token", &"[REDACTED]")
            .field("root_page_id", &self.root_page_id)
            .finish()
    }
}

impl GuestWorkspace {
    pub fn new(admin_token: impl Into<String>, root_page_id: impl Into<String>) -> Self {
        Self {
            admin_token: admin_token.into(),
            root_page_id: root_page_id.into(),
        }
    }

    /// `NoteBox_<last 6 chars of the user id>`.
    pub fn container_title(external_user_id: &str) -> String {
        format!("NoteBox_{}", user_suffix(external_user_id))
    }
}

pub fn user_suffix(external_user_id: &str) -> String {
    let chars: Vec<char> = external_user_id.chars().collect();
    let start = chars.len().saturating_sub(6);
    chars[start..].iter().collect()
}

pub struct SyncEngine {
    pool: Pool,
    notion: Arc<dyn DocumentApi>,
    cipher: Arc<CredentialCipher>,
    guest: GuestWorkspace,
    utc_offset: FixedOffset,
}

impl SyncEngine {
    pub fn new(
        pool: Pool,
        notion: Arc<dyn DocumentApi>,
        cipher: Arc<CredentialCipher>,
        guest: GuestWorkspace,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            pool,
            notion,
            cipher,
            guest,
            utc_offset,
        }
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.utc_offset).date_naive()
    }

    pub async fn sync(&self, external_user_id: &str, raw_text: &str) -> String {
        self.sync_on(external_user_id, raw_text, self.today()).await
    }

    /// Sync against an explicit calendar day.
    #[instrument(skip_all, fields(user = %external_user_id, %date))]
    pub async fn sync_on(&self, external_user_id: &str, raw_text: &str, date: NaiveDate) -> String {
        match self.try_sync(external_user_id, raw_text, date).await {
            Ok(msg) => msg,
            Err(e) => {
                error!(error = %format!("{e:#}"), "sync failed");
                MSG_SYNC_ERROR.to_string()
            }
        }
    }

    async fn try_sync(&self, user: &str, raw_text: &str, date: NaiveDate) -> Result<String> {
        let cfg = self.load_or_bootstrap(user).await?;

        if cfg.migration_status == MigrationStatus::Migrating {
            return Ok(MSG_MIGRATING.to_string());
        }
        if !cfg.is_guest && cfg.status != ConfigStatus::Active {
            return Ok(MSG_NOT_CONFIGURED.to_string());
        }

        let (token, container) = if cfg.is_guest {
            let container = match cfg.container_id {
                Some(id) => id,
                None => match self.ensure_guest_container(user).await? {
                    Some(id) => id,
                    None => return Ok(MSG_GUEST_FAILED.to_string()),
                },
            };
            (self.guest.admin_token.clone(), container)
        } else {
            let Some(container) = cfg.container_id else {
                return Ok(MSG_NOT_CONFIGURED.to_string());
            };
            let token = self
                .cipher
                .decrypt(&cfg.credential)
                .context("decrypt stored credential")?;
            (token, container)
        };

        let mut content = NotionContent::from_message(raw_text);
        if content.title.is_empty() && content.body.is_empty() && content.tags.is_empty() {
            return Ok(MSG_EMPTY.to_string());
        }

        if let Some(page_id) = self.notion.find_page_by_date(&token, &container, date).await? {
            if self.notion.append_content(&token, &page_id, &content).await? {
                info!(page_id = %page_id, "appended to daily page");
                return Ok(format!("Appended to today's note.\nSummary: {}", content.title));
            }
            return Ok(MSG_APPEND_FAILED.to_string());
        }

        let day = date.format("%Y-%m-%d").to_string();
        content.body = match (content.title.is_empty(), content.body.is_empty()) {
            (true, _) => content.body,
            (false, true) => content.title.clone(),
            (false, false) => format!("{}\n{}", content.title, content.body),
        };
        content.title = day.clone();

        match self.notion.create_page(&token, &container, &content).await {
            Ok(created) if created.ok => {
                info!(page_id = ?created.page_id, "created daily page");
                Ok(format!("Created today's note.\nDate: {day}"))
            }
            Ok(created) => {
                warn!(raw = %created.raw, "create daily page rejected");
                Ok(MSG_CREATE_FAILED.to_string())
            }
            Err(e @ NotionError::NoTitleProperty { .. }) => {
                warn!(error = %e, "container has no title property");
                Ok(MSG_CREATE_FAILED.to_string())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_or_bootstrap(&self, user: &str) -> Result<UserConfig> {
        if let Some(cfg) = db::find_user_config(&self.pool, user).await? {
            return Ok(cfg);
        }
        if db::insert_guest_config(&self.pool, user).await? {
            info!("bootstrapped guest record");
        }
        db::find_user_config(&self.pool, user)
            .await?
            .context("guest record missing after insert")
    }

    /// Create the guest container lazily. `None` means the API refused.
    async fn ensure_guest_container(&self, user: &str) -> Result<Option<String>> {
        let title = GuestWorkspace::container_title(user);
        let created = self
            .notion
            .create_database(&self.guest.admin_token, &self.guest.root_page_id, &title)
            .await?;
        let Some(container) = created else {
            warn!(title = %title, "guest container creation refused");
            return Ok(None);
        };
        if db::assign_container(&self.pool, user, &container).await? {
            info!(container = %container, "guest container assigned");
            return Ok(Some(container));
        }
        // a concurrent sync assigned one first; use theirs
        warn!(orphan = %container, "guest container already assigned");
        Ok(db::find_user_config(&self.pool, user)
            .await?
            .and_then(|cfg| cfg.container_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_title_uses_last_six_chars() {
        assert_eq!(GuestWorkspace::container_title("123456789"), "NoteBox_456789");
        assert_eq!(GuestWorkspace::container_title("42"), "NoteBox_42");
        assert_eq!(user_suffix(""), "");
    }

    #[test]
    fn debug_hides_admin_token() {
        let g = GuestWorkspace::new("secret_admin", "root");
        assert!(!format!("{g:?}").contains("secret_admin"));
    }
}
