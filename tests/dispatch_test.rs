mod common;

use common::Harness;
use notebox::config_flow::{MSG_ASK_DB, MSG_ASK_KEY, MSG_PROMOTED};
use notebox::db;
use notebox::dispatch::{MSG_IMAGE, MSG_UNSUPPORTED};
use notebox::model::MigrationStatus;
use notebox::{Dispatcher, InboundEvent, MessageKind, Notifier};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn router_sends_flow_input_to_config_and_the_rest_to_sync() {
    let h = Harness::new().await;
    h.notion.add_container("own-db").await;
    let router = h.router();

    assert_eq!(router.route(&InboundEvent::text("u1", "/config")).await, MSG_ASK_KEY);
    assert_eq!(router.route(&InboundEvent::text("u1", "tok")).await, MSG_ASK_DB);
    let saved = router.route(&InboundEvent::text("u1", "own-db")).await;
    assert!(saved.starts_with("Verified."), "{saved}");

    let synced = router.route(&InboundEvent::text("u1", "a note")).await;
    assert!(synced.starts_with("Created today's note."), "{synced}");
    assert_eq!(h.notion.pages("own-db").await.len(), 1);

    let status = router.route(&InboundEvent::text("u1", "/status")).await;
    assert!(status.contains("own-db"), "{status}");
}

#[tokio::test]
async fn non_text_messages_get_fixed_replies() {
    let h = Harness::new().await;
    let router = h.router();
    let image = InboundEvent {
        user: "u1".into(),
        kind: MessageKind::Image,
        text: String::new(),
    };
    let sticker = InboundEvent {
        kind: MessageKind::Other,
        ..image.clone()
    };
    assert_eq!(router.route(&image).await, MSG_IMAGE);
    assert_eq!(router.route(&sticker).await, MSG_UNSUPPORTED);
    assert!(db::find_user_config(&h.pool, "u1").await.unwrap().is_none());
}

#[tokio::test]
async fn guest_promotion_runs_a_migration() {
    let h = Harness::new().await;
    h.notion.add_container("own-db").await;
    let router = h.router();

    router.route(&InboundEvent::text("u1", "kept note")).await;
    router.route(&InboundEvent::text("u1", "/setup")).await;
    router.route(&InboundEvent::text("u1", "own-token")).await;
    assert_eq!(router.route(&InboundEvent::text("u1", "own-db")).await, MSG_PROMOTED);

    let mut status = MigrationStatus::None;
    for _ in 0..200 {
        status = db::find_user_config(&h.pool, "u1").await.unwrap().unwrap().migration_status;
        if status == MigrationStatus::Done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, MigrationStatus::Done);
    assert_eq!(h.notion.pages("own-db").await.len(), 1);
    let cfg = db::find_user_config(&h.pool, "u1").await.unwrap().unwrap();
    assert_eq!(cfg.container_id.as_deref(), Some("own-db"));
}

#[tokio::test]
async fn dispatcher_replies_to_every_event_through_the_notifier() {
    let h = Harness::new().await;
    let notifier: Arc<dyn Notifier> = Arc::new(h.notifier.clone());
    let (dispatcher, workers) = Dispatcher::spawn(Arc::new(h.router()), notifier, 3, 2);

    for i in 0..6 {
        dispatcher
            .submit(InboundEvent::text(format!("user-{i}"), "/help"))
            .await
            .unwrap();
    }
    drop(dispatcher);
    workers.await.unwrap();

    let mut users: Vec<String> = h.notifier.messages().await.into_iter().map(|(u, _)| u).collect();
    users.sort();
    assert_eq!(users, (0..6).map(|i| format!("user-{i}")).collect::<Vec<_>>());
}
