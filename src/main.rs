use anyhow::{Context, Result};
use clap::Parser;
use notebox::crypto::CredentialCipher;
use notebox::handlers::{self, TelegramNotifier};
use notebox::{
    config, db, ConfigFlowEngine, DailySweep, DigestSummarizer, DocumentApi, Dispatcher,
    GuestWorkspace, MigrationEngine, Notifier, NotionClient, Router, SyncEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    notebox::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let cipher = Arc::new(
        CredentialCipher::from_base64(&cfg.security.credential_key)
            .context("load credential key")?,
    );
    let notion: Arc<dyn DocumentApi> = Arc::new(NotionClient::from_config(&cfg)?);
    let guest = GuestWorkspace::new(
        cfg.notion.admin_token.clone(),
        cfg.notion.guest_root_page_id.clone(),
    );
    let offset = cfg.utc_offset();

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot.clone()));

    let migration = Arc::new(MigrationEngine::new(
        pool.clone(),
        Arc::clone(&notion),
        Arc::clone(&cipher),
        guest.clone(),
        Arc::clone(&notifier),
        cfg.migration_pace(),
        offset,
    ));
    let router = Arc::new(Router::new(
        ConfigFlowEngine::new(pool.clone(), Arc::clone(&notion), Arc::clone(&cipher)),
        SyncEngine::new(
            pool.clone(),
            Arc::clone(&notion),
            Arc::clone(&cipher),
            guest.clone(),
            offset,
        ),
        migration,
    ));
    let (dispatcher, _workers) = Dispatcher::spawn(
        router,
        Arc::clone(&notifier),
        cfg.app.workers,
        cfg.app.queue_capacity,
    );

    if cfg.sweep.enabled {
        let sweep = Arc::new(DailySweep::new(
            pool.clone(),
            Arc::clone(&notion),
            Arc::clone(&cipher),
            guest,
            Arc::new(DigestSummarizer),
            Arc::clone(&notifier),
            offset,
        ));
        tokio::spawn(sweep.run_daily(cfg.sweep.hour));
    }

    let allowed_users = Arc::new(cfg.telegram.allowed_users.clone());
    info!(workers = cfg.app.workers, "starting telegram bot");
    teloxide::repl(bot, move |_bot: Bot, msg: Message| {
        let dispatcher = dispatcher.clone();
        let allowed_users = Arc::clone(&allowed_users);
        async move {
            if let Err(err) = handlers::handle_message(&dispatcher, &allowed_users, &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    Ok(())
}
