use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use notebox::crypto::CredentialCipher;
use notebox::{config, db, Destination, GuestWorkspace, MigrationEngine, Notifier, NotionClient};
use tracing::info;

/// Move one user's notes into another Notion workspace and switch them over.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// External user id (Telegram chat id)
    #[arg(long)]
    user: String,

    /// Destination integration token
    #[arg(long, env = "NOTEBOX_DEST_TOKEN")]
    dest_token: String,

    /// Destination database id
    #[arg(long)]
    dest_db: String,
}

/// Operator runs print user notifications instead of pushing them.
struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn notify(&self, external_user_id: &str, text: &str) -> Result<()> {
        println!("[to {external_user_id}] {text}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    notebox::init_tracing();
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let cipher = CredentialCipher::from_base64(&cfg.security.credential_key)
        .context("load credential key")?;
    let engine = MigrationEngine::new(
        pool,
        Arc::new(NotionClient::from_config(&cfg)?),
        Arc::new(cipher),
        GuestWorkspace::new(
            cfg.notion.admin_token.clone(),
            cfg.notion.guest_root_page_id.clone(),
        ),
        Arc::new(StdoutNotifier),
        cfg.migration_pace(),
        cfg.utc_offset(),
    );

    let report = engine
        .run(
            &args.user,
            Destination {
                token: args.dest_token,
                container_id: args.dest_db,
            },
        )
        .await?;
    info!(run_id = %report.run_id, "migration finished");
    println!(
        "migrated {} pages ({} skipped), source archived: {}",
        report.migrated, report.skipped, report.archived
    );
    Ok(())
}
