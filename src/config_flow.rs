//! Conversational Notion setup: `/config` → API key → database id.

use crate::crypto::CredentialCipher;
use crate::db::{self, Pool};
use crate::model::{ConfigStep, MigrationStatus};
use crate::notion::DocumentApi;
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const MSG_ASK_KEY: &str = "Please send your Notion integration token (API key).";
pub const MSG_ASK_DB: &str =
    "API key received. Now send the Notion database id (copy it from the database page URL).";
pub const MSG_SAVED: &str =
    "Verified. Your configuration is saved and active; send any message to sync it.";
pub const MSG_RETRY: &str = "Verification failed: check the API key and database id, then send \
     the database id again or send /config to start over.";
pub const MSG_PROMOTED: &str = "Verified. Moving your guest notes into your own workspace; \
     you will get a message when it is done.";
pub const MSG_RESTART: &str = "Setup was interrupted. Send /config to start over.";
pub const MSG_NOT_CONFIGURED: &str = "Not configured yet. Send /config to set up Notion.";
pub const MSG_MIGRATION_RUNNING: &str = "Your notes are still being migrated. \
     Send /config again once the migration has finished.";

/// Workspace a user asked to move into.
#[derive(Clone, PartialEq, Eq)]
pub struct Destination {
    /// Plain credential for the destination workspace.
    pub token: String,
    pub container_id: String,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("token", &"[REDACTED]")
            .field("container_id", &self.container_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// No setup in progress; the text is an ordinary note.
    NotInFlow,
    Reply(String),
    /// A guest validated their own workspace; the caller starts a migration.
    Promote { reply: String, destination: Destination },
}

pub struct ConfigFlowEngine {
    pool: Pool,
    notion: Arc<dyn DocumentApi>,
    cipher: Arc<CredentialCipher>,
}

impl ConfigFlowEngine {
    pub fn new(pool: Pool, notion: Arc<dyn DocumentApi>, cipher: Arc<CredentialCipher>) -> Self {
        Self { pool, notion, cipher }
    }

    #[instrument(skip_all, fields(user = %external_user_id))]
    pub async fn start(&self, external_user_id: &str) -> Result<String> {
        db::start_conversation(&self.pool, external_user_id).await?;
        info!("config flow started");
        Ok(MSG_ASK_KEY.to_string())
    }

    #[instrument(skip_all, fields(user = %external_user_id))]
    pub async fn handle_input(&self, external_user_id: &str, text: &str) -> Result<FlowOutcome> {
        let Some(state) = db::find_conversation(&self.pool, external_user_id).await? else {
            return Ok(FlowOutcome::NotInFlow);
        };
        let input = text.trim();

        match state.step {
            ConfigStep::None => Ok(FlowOutcome::NotInFlow),
            ConfigStep::WaitingKey => {
                if input.is_empty() {
                    return Ok(FlowOutcome::Reply(MSG_ASK_KEY.to_string()));
                }
                let sealed = self.cipher.encrypt(input).context("encrypt pending key")?;
                if !db::advance_to_waiting_db(&self.pool, external_user_id, &sealed).await? {
                    return Ok(FlowOutcome::Reply(MSG_RESTART.to_string()));
                }
                info!("api key received");
                Ok(FlowOutcome::Reply(MSG_ASK_DB.to_string()))
            }
            ConfigStep::WaitingDb => {
                let Some(sealed) = state.pending_key else {
                    return Ok(FlowOutcome::Reply(MSG_RESTART.to_string()));
                };
                let token = self.cipher.decrypt(&sealed).context("decrypt pending key")?;

                if input.is_empty() || !self.notion.validate_access(&token, input).await? {
                    warn!(container = %input, "access validation failed");
                    db::touch_conversation(&self.pool, external_user_id).await?;
                    return Ok(FlowOutcome::Reply(MSG_RETRY.to_string()));
                }

                let existing = db::find_user_config(&self.pool, external_user_id).await?;
                if existing
                    .as_ref()
                    .is_some_and(|cfg| cfg.migration_status == MigrationStatus::Migrating)
                {
                    warn!("setup finished while a migration is running, not saving");
                    db::finish_conversation(&self.pool, external_user_id).await?;
                    return Ok(FlowOutcome::Reply(MSG_MIGRATION_RUNNING.to_string()));
                }
                let promotable = existing.as_ref().is_some_and(|cfg| {
                    cfg.is_guest
                        && cfg.migration_status == MigrationStatus::None
                        && cfg.container_id.is_some()
                });
                if promotable {
                    if !db::finish_conversation(&self.pool, external_user_id).await? {
                        return Ok(FlowOutcome::Reply(MSG_RESTART.to_string()));
                    }
                    info!(container = %input, "guest promotion requested");
                    return Ok(FlowOutcome::Promote {
                        reply: MSG_PROMOTED.to_string(),
                        destination: Destination {
                            token,
                            container_id: input.to_string(),
                        },
                    });
                }

                if !db::save_validated_config(&self.pool, external_user_id, &sealed, input).await? {
                    return Ok(FlowOutcome::Reply(MSG_RESTART.to_string()));
                }
                info!(container = %input, "configuration saved");
                Ok(FlowOutcome::Reply(MSG_SAVED.to_string()))
            }
        }
    }

    /// One-line summary of the stored configuration.
    pub async fn query(&self, external_user_id: &str) -> Result<String> {
        let Some(cfg) = db::find_user_config(&self.pool, external_user_id).await? else {
            return Ok(MSG_NOT_CONFIGURED.to_string());
        };
        let mut summary = format!(
            "App: Notion, status: {}, database id: {}",
            cfg.status.as_str(),
            cfg.container_id.as_deref().unwrap_or("-"),
        );
        if cfg.is_guest {
            summary.push_str(" (guest notebook)");
        }
        if cfg.migration_status != MigrationStatus::None {
            summary.push_str(&format!(", migration: {}", cfg.migration_status.as_str()));
        }
        Ok(summary)
    }
}
