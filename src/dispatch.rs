//! Inbound event routing and the worker pool that runs it off the transport.

use crate::config_flow::{ConfigFlowEngine, FlowOutcome};
use crate::migration::MigrationEngine;
use crate::sync::SyncEngine;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub const MSG_IMAGE: &str = "Images are not supported yet, please send text.";
pub const MSG_UNSUPPORTED: &str = "Unsupported message type.";
pub const MSG_INTERNAL: &str = "Something went wrong, please try again later.";
pub const MSG_HELP: &str = "Send any text and it is added to today's Notion page. \
     /config connects your own Notion database, /status shows the current setup.";

/// Out-of-band push to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, external_user_id: &str, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user: String,
    pub kind: MessageKind,
    pub text: String,
}

impl InboundEvent {
    pub fn text(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            kind: MessageKind::Text,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Help,
    Config,
    Status,
}

/// `/start`, `/help`, `/config`, `/setup` and `/status`, with or without a `@botname` suffix.
fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name.to_ascii_lowercase().as_str() {
        "start" | "help" => Some(Command::Help),
        "config" | "setup" => Some(Command::Config),
        "status" => Some(Command::Status),
        _ => None,
    }
}

pub struct Router {
    config_flow: ConfigFlowEngine,
    sync: SyncEngine,
    migration: Arc<MigrationEngine>,
}

impl Router {
    pub fn new(config_flow: ConfigFlowEngine, sync: SyncEngine, migration: Arc<MigrationEngine>) -> Self {
        Self {
            config_flow,
            sync,
            migration,
        }
    }

    /// Reply text for one event. Never fails; internal errors are logged.
    #[instrument(skip_all, fields(user = %event.user))]
    pub async fn route(&self, event: &InboundEvent) -> String {
        match self.try_route(event).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %format!("{e:#}"), "routing failed");
                MSG_INTERNAL.to_string()
            }
        }
    }

    async fn try_route(&self, event: &InboundEvent) -> Result<String> {
        match event.kind {
            MessageKind::Text => {}
            MessageKind::Image => return Ok(MSG_IMAGE.to_string()),
            MessageKind::Other => return Ok(MSG_UNSUPPORTED.to_string()),
        }

        match parse_command(&event.text) {
            Some(Command::Help) => return Ok(MSG_HELP.to_string()),
            Some(Command::Config) => return self.config_flow.start(&event.user).await,
            Some(Command::Status) => return self.config_flow.query(&event.user).await,
            None => {}
        }

        match self.config_flow.handle_input(&event.user, &event.text).await? {
            FlowOutcome::NotInFlow => Ok(self.sync.sync(&event.user, &event.text).await),
            FlowOutcome::Reply(reply) => Ok(reply),
            FlowOutcome::Promote { reply, destination } => {
                info!("starting guest migration");
                drop(self.migration.start(event.user.clone(), destination));
                Ok(reply)
            }
        }
    }
}

/// Bounded queue drained by a fixed set of workers.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<InboundEvent>,
}

impl Dispatcher {
    /// Start `workers` tasks. The returned handle completes once every
    /// `Dispatcher` clone is dropped and the queue is drained.
    pub fn spawn(
        router: Arc<Router>,
        notifier: Arc<dyn Notifier>,
        workers: usize,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handles: Vec<_> = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&router),
                    Arc::clone(&notifier),
                ))
            })
            .collect();
        let joined = tokio::spawn(async move {
            for res in futures::future::join_all(handles).await {
                if let Err(e) = res {
                    error!(error = %e, "dispatch worker aborted");
                }
            }
        });
        (Self { tx }, joined)
    }

    /// Queue an event, waiting while the queue is full.
    pub async fn submit(&self, event: InboundEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("dispatcher is shut down"))
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<InboundEvent>>>,
    router: Arc<Router>,
    notifier: Arc<dyn Notifier>,
) {
    debug!(worker = id, "dispatch worker started");
    loop {
        let next = rx.lock().await.recv().await;
        let Some(event) = next else {
            break;
        };
        let user = event.user.clone();

        // routed in its own task so a panic only costs this event
        let routed = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.route(&event).await }).await
        };
        let reply = match routed {
            Ok(reply) => reply,
            Err(e) => {
                error!(worker = id, user = %user, error = %e, "routing task panicked");
                MSG_INTERNAL.to_string()
            }
        };

        if let Err(e) = notifier.notify(&user, &reply).await {
            warn!(worker = id, user = %user, error = %format!("{e:#}"), "reply delivery failed");
        }
    }
    debug!(worker = id, "dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recognised() {
        assert_eq!(parse_command("/config"), Some(Command::Config));
        assert_eq!(parse_command("/setup now"), Some(Command::Config));
        assert_eq!(parse_command("/Status@notebox_bot"), Some(Command::Status));
        assert_eq!(parse_command("/start"), Some(Command::Help));
        assert_eq!(parse_command("/unknown"), None);
        assert_eq!(parse_command("config"), None);
        assert_eq!(parse_command(""), None);
    }
}
