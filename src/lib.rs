//! Telegram → Notion daily-notes bridge.

pub mod codec;
pub mod config;
pub mod config_flow;
pub mod crypto;
pub mod db;
pub mod dispatch;
pub mod handlers;
pub mod migration;
pub mod model;
pub mod notion;
pub mod rate_limit;
pub mod sweep;
pub mod sync;

pub use codec::{Block, NotionContent};
pub use config_flow::{ConfigFlowEngine, Destination, FlowOutcome};
pub use dispatch::{Dispatcher, InboundEvent, MessageKind, Notifier, Router};
pub use migration::{MigrationEngine, MigrationError, MigrationReport};
pub use notion::{DocumentApi, NotionClient, NotionError};
pub use sweep::{DailySweep, DigestSummarizer, Summarizer, SweepReport};
pub use sync::{GuestWorkspace, SyncEngine};

/// Install the compact `RUST_LOG`-driven subscriber used by every binary.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
