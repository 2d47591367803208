mod common;

use common::{day, Harness, ADMIN_TOKEN};
use notebox::codec;
use notebox::db;
use notebox::sync::{MSG_CREATE_FAILED, MSG_GUEST_FAILED, MSG_MIGRATING, MSG_NOT_CONFIGURED};
use serde_json::Value;

fn texts(blocks: &[Value]) -> Vec<String> {
    blocks.iter().filter_map(codec::block_plain_text).collect()
}

#[tokio::test]
async fn same_day_syncs_share_one_page() {
    let h = Harness::new().await;
    let engine = h.sync_engine();
    let today = day(2026, 10, 18);

    let first = engine.sync_on("chat-1001", "Standup #work\n- fixed login", today).await;
    assert_eq!(first, "Created today's note.\nDate: 2026-10-18");

    let second = engine.sync_on("chat-1001", "Lunch\nramen", today).await;
    assert_eq!(second, "Appended to today's note.\nSummary: Lunch");

    // guest bootstrap made exactly one container holding exactly one page
    let cfg = db::find_user_config(&h.pool, "chat-1001").await.unwrap().unwrap();
    assert!(cfg.is_guest);
    let container = cfg.container_id.unwrap();
    let pages = h.notion.pages(&container).await;
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].title, "2026-10-18");
    assert_eq!(
        texts(&pages[0].blocks),
        vec!["Standup", "fixed login", "#work", "Lunch", "ramen"]
    );
    assert_eq!(pages[0].blocks[1]["type"], "bulleted_list_item");
    assert_eq!(pages[0].blocks[3]["type"], "heading_3");

    let st = h.notion.state.lock().await;
    assert_eq!(st.created_databases, vec!["NoteBox_t-1001".to_string()]);
}

#[tokio::test]
async fn a_new_day_gets_a_new_page() {
    let h = Harness::new().await;
    let engine = h.sync_engine();
    engine.sync_on("u1", "one", day(2026, 10, 17)).await;
    engine.sync_on("u1", "two", day(2026, 10, 18)).await;

    let cfg = db::find_user_config(&h.pool, "u1").await.unwrap().unwrap();
    let titles: Vec<String> = h
        .notion
        .pages(cfg.container_id.as_deref().unwrap())
        .await
        .into_iter()
        .map(|p| p.title)
        .collect();
    assert_eq!(titles, vec!["2026-10-17", "2026-10-18"]);
}

#[tokio::test]
async fn guests_write_with_the_admin_token_and_users_with_their_own() {
    let h = Harness::new().await;
    h.notion.add_container("own-db").await;
    h.configure_user("u2", "secret_user_token", "own-db").await;
    let engine = h.sync_engine();

    engine.sync_on("guest", "hello", day(2026, 1, 1)).await;
    engine.sync_on("u2", "hello", day(2026, 1, 1)).await;

    assert_eq!(
        h.notion.tokens_for("create_page").await,
        vec![ADMIN_TOKEN.to_string(), "secret_user_token".to_string()]
    );
    assert_eq!(h.notion.pages("own-db").await.len(), 1);
}

#[tokio::test]
async fn refuses_while_migrating_and_when_inactive() {
    let h = Harness::new().await;
    h.notion.add_container("own-db").await;
    h.configure_user("u1", "tok", "own-db").await;
    let engine = h.sync_engine();

    h.set_column("u1", "migration_status", "MIGRATING").await;
    assert_eq!(engine.sync_on("u1", "note", day(2026, 1, 1)).await, MSG_MIGRATING);

    h.set_column("u1", "migration_status", "NONE").await;
    h.set_column("u1", "status", "INACTIVE").await;
    assert_eq!(engine.sync_on("u1", "note", day(2026, 1, 1)).await, MSG_NOT_CONFIGURED);

    assert!(h.notion.pages("own-db").await.is_empty());
    assert!(h.notion.tokens_for("find_page_by_date").await.is_empty());
}

#[tokio::test]
async fn failed_guest_container_is_retried_on_next_sync() {
    let h = Harness::new().await;
    let engine = h.sync_engine();
    h.notion.set(|st| st.fail_create_database = true).await;

    assert_eq!(engine.sync_on("u1", "note", day(2026, 1, 1)).await, MSG_GUEST_FAILED);
    let cfg = db::find_user_config(&h.pool, "u1").await.unwrap().unwrap();
    assert!(cfg.is_guest);
    assert!(cfg.container_id.is_none());

    h.notion.set(|st| st.fail_create_database = false).await;
    let reply = engine.sync_on("u1", "note", day(2026, 1, 1)).await;
    assert!(reply.starts_with("Created today's note."), "{reply}");
    let cfg = db::find_user_config(&h.pool, "u1").await.unwrap().unwrap();
    assert!(cfg.container_id.is_some());
}

#[tokio::test]
async fn rejected_create_is_reported() {
    let h = Harness::new().await;
    h.notion.add_container("own-db").await;
    h.configure_user("u1", "tok", "own-db").await;
    h.notion
        .set(|st| {
            st.reject_titles.insert("2026-01-01".into());
        })
        .await;

    let reply = h.sync_engine().sync_on("u1", "note", day(2026, 1, 1)).await;
    assert_eq!(reply, MSG_CREATE_FAILED);
}
