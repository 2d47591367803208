//! Copies a user's notes from their current container into a new workspace,
//! then switches the user over to it.
//!
//! Record-level failures are skipped; anything that breaks the walk over the
//! source container marks the run FAILED. The source is only ever read, plus a
//! best-effort rename once the run is DONE.

use crate::codec::{self, NotionContent};
use crate::config_flow::Destination;
use crate::crypto::{CredentialCipher, CryptoError};
use crate::db::{self, Pool};
use crate::dispatch::Notifier;
use crate::model::MigrationStatus;
use crate::notion::{DocumentApi, NotionError};
use crate::rate_limit::RateLimiter;
use crate::sync::{user_suffix, GuestWorkspace};
use anyhow::Context;
use chrono::{FixedOffset, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const MSG_NOT_STARTED: &str =
    "Migration could not be started. Your notes are unchanged; please contact the administrator.";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("no configuration for user {0}")]
    NotFound(String),
    #[error("user {0} is not eligible for migration")]
    NotEligible(String),
    #[error("user {0} has no source container")]
    NoSourceContainer(String),
    #[error(transparent)]
    Notion(#[from] NotionError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub run_id: Uuid,
    /// Records whose destination page was created.
    pub migrated: usize,
    pub skipped: usize,
    /// Whether the source container was renamed.
    pub archived: bool,
}

pub struct MigrationEngine {
    pool: Pool,
    notion: Arc<dyn DocumentApi>,
    cipher: Arc<CredentialCipher>,
    guest: GuestWorkspace,
    notifier: Arc<dyn Notifier>,
    pace: Duration,
    utc_offset: FixedOffset,
}

impl MigrationEngine {
    pub fn new(
        pool: Pool,
        notion: Arc<dyn DocumentApi>,
        cipher: Arc<CredentialCipher>,
        guest: GuestWorkspace,
        notifier: Arc<dyn Notifier>,
        pace: Duration,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            pool,
            notion,
            cipher,
            guest,
            notifier,
            pace,
            utc_offset,
        }
    }

    /// Run a migration as its own task.
    pub fn start(
        self: &Arc<Self>,
        external_user_id: String,
        destination: Destination,
    ) -> JoinHandle<Result<MigrationReport, MigrationError>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = engine.run(&external_user_id, destination).await;
            if let Err(e) = &result {
                error!(user = %external_user_id, error = %e, "background migration ended with an error");
            }
            result
        })
    }

    pub async fn run(
        &self,
        external_user_id: &str,
        destination: Destination,
    ) -> Result<MigrationReport, MigrationError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("migration", user = %external_user_id, %run_id);
        self.run_inner(run_id, external_user_id, &destination)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        user: &str,
        destination: &Destination,
    ) -> Result<MigrationReport, MigrationError> {
        let (source_token, source_container, sealed_destination) =
            match self.begin(user, destination).await {
                Ok(started) => started,
                Err(e) => {
                    warn!(error = %e, "migration not started");
                    self.notify(user, MSG_NOT_STARTED).await;
                    return Err(e);
                }
            };
        info!(source = %source_container, destination = %destination.container_id, "migration started");

        let outcome = self
            .copy_and_switch(user, &source_token, &source_container, destination, &sealed_destination)
            .await;
        let (migrated, skipped) = match outcome {
            Ok(counts) => counts,
            Err(e) => {
                error!(error = %e, "migration failed");
                if let Err(store) = db::transition_migration(
                    &self.pool,
                    user,
                    MigrationStatus::Migrating,
                    MigrationStatus::Failed,
                )
                .await
                {
                    error!(error = %store, "could not record failed migration");
                }
                self.notify(
                    user,
                    "Migration stopped. Your notes are safe; please contact the administrator.",
                )
                .await;
                return Err(e);
            }
        };

        let archived_title = format!("[Migrated] NoteBox_{}", user_suffix(user));
        let archived = match self
            .notion
            .update_database(&source_token, &source_container, &archived_title)
            .await
        {
            Ok(renamed) => renamed,
            Err(e) => {
                warn!(error = %e, "archiving source container failed");
                false
            }
        };

        info!(migrated, skipped, archived, "migration done");
        self.notify(
            user,
            &format!(
                "Migration finished! Moved {migrated} notes. You are now using your own workspace."
            ),
        )
        .await;
        Ok(MigrationReport {
            run_id,
            migrated,
            skipped,
            archived,
        })
    }

    /// Resolve both sides and claim the record (NONE → MIGRATING). Nothing
    /// is written when this fails.
    async fn begin(
        &self,
        user: &str,
        destination: &Destination,
    ) -> Result<(String, String, String), MigrationError> {
        let cfg = db::find_user_config(&self.pool, user)
            .await?
            .ok_or_else(|| MigrationError::NotFound(user.to_string()))?;
        let source_container = cfg
            .container_id
            .clone()
            .ok_or_else(|| MigrationError::NoSourceContainer(user.to_string()))?;
        let source_token = if cfg.is_guest {
            self.guest.admin_token.clone()
        } else {
            self.cipher.decrypt(&cfg.credential)?
        };
        let sealed_destination = self.cipher.encrypt(&destination.token)?;

        if !db::transition_migration(&self.pool, user, MigrationStatus::None, MigrationStatus::Migrating)
            .await?
        {
            return Err(MigrationError::NotEligible(user.to_string()));
        }
        Ok((source_token, source_container, sealed_destination))
    }

    async fn copy_and_switch(
        &self,
        user: &str,
        source_token: &str,
        source_container: &str,
        destination: &Destination,
        sealed_destination: &str,
    ) -> Result<(usize, usize), MigrationError> {
        let counts = self
            .copy_pages(source_token, source_container, destination)
            .await?;
        if !db::complete_migration(&self.pool, user, sealed_destination, &destination.container_id)
            .await?
        {
            return Err(MigrationError::NotEligible(user.to_string()));
        }
        Ok(counts)
    }

    /// Walk the source in creation order and recreate each record.
    async fn copy_pages(
        &self,
        source_token: &str,
        source_container: &str,
        destination: &Destination,
    ) -> Result<(usize, usize), MigrationError> {
        let limiter = RateLimiter::every(self.pace);
        let mut cursor: Option<String> = None;
        let (mut migrated, mut skipped) = (0usize, 0usize);

        loop {
            let page = self
                .notion
                .query_database(source_token, source_container, cursor.as_deref())
                .await?;
            for record in &page.items {
                match self.copy_record(source_token, record, destination, &limiter).await {
                    Ok(true) => migrated += 1,
                    Ok(false) => skipped += 1,
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "skipping record");
                        skipped += 1;
                    }
                }
            }
            match page.cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }
        Ok((migrated, skipped))
    }

    async fn copy_record(
        &self,
        source_token: &str,
        record: &Value,
        destination: &Destination,
        limiter: &RateLimiter,
    ) -> anyhow::Result<bool> {
        let page_id = record
            .get("id")
            .and_then(Value::as_str)
            .context("record without id")?;
        let properties = record.get("properties").unwrap_or(&Value::Null);

        let name = title_text(properties)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                Utc::now()
                    .with_timezone(&self.utc_offset)
                    .date_naive()
                    .format("%Y-%m-%d")
                    .to_string()
            });
        let extra_title = named_text(properties, "Title");
        let description = named_text(properties, "Description");

        let children = self
            .notion
            .retrieve_block_children(source_token, page_id)
            .await
            .with_context(|| format!("read blocks of {page_id}"))?;
        let block_text: String = children
            .iter()
            .filter_map(codec::block_plain_text)
            .map(|line| line + "\n")
            .collect();

        let content = NotionContent::new(name, compose_body(&extra_title, &description, &block_text), Vec::new());

        limiter.acquire().await;
        let created = self
            .notion
            .create_page(&destination.token, &destination.container_id, &content)
            .await?;
        if !created.ok {
            warn!(source_page = %page_id, raw = %created.raw, "destination rejected page");
        }
        Ok(created.ok)
    }

    async fn notify(&self, user: &str, text: &str) {
        if let Err(e) = self.notifier.notify(user, text).await {
            warn!(error = %format!("{e:#}"), "migration notification failed");
        }
    }
}

/// Text of whichever property is declared as the record's title.
fn title_text(properties: &Value) -> Option<String> {
    properties
        .as_object()?
        .values()
        .find(|p| p.get("type").and_then(Value::as_str) == Some("title"))
        .map(codec::property_text)
}

fn named_text(properties: &Value, name: &str) -> String {
    properties
        .get(name)
        .map(codec::property_text)
        .unwrap_or_default()
}

/// `### extra` and `> description` lines ahead of the copied block text.
pub fn compose_body(extra_title: &str, description: &str, block_text: &str) -> String {
    let mut body = String::new();
    if !extra_title.is_empty() {
        body.push_str("### ");
        body.push_str(extra_title);
        body.push('\n');
    }
    if !description.is_empty() {
        body.push_str("> ");
        body.push_str(description);
        body.push_str("\n\n");
    }
    body.push_str(block_text);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compose_body_orders_parts() {
        assert_eq!(compose_body("Plan", "short", "a\nb\n"), "### Plan\n> short\n\na\nb\n");
        assert_eq!(compose_body("", "", "only\n"), "only\n");
    }

    #[test]
    fn title_found_by_declared_type() {
        let props = json!({
            "Tags": { "type": "multi_select", "multi_select": [] },
            "Headline": { "type": "title", "title": [{ "plain_text": "Hello" }] },
        });
        assert_eq!(title_text(&props).as_deref(), Some("Hello"));
        assert_eq!(title_text(&json!({})), None);
        assert_eq!(named_text(&props, "Description"), "");
    }
}
