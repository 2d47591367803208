#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate};
use notebox::codec::{self, NotionContent};
use notebox::crypto::CredentialCipher;
use notebox::db::Pool;
use notebox::notion::model::{CreatedPage, QueryPage};
use notebox::notion::{DocumentApi, NotionError, NotionResult};
use notebox::{
    ConfigFlowEngine, GuestWorkspace, MigrationEngine, Notifier, Router, SyncEngine,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const ADMIN_TOKEN: &str = "admin-token";
pub const ROOT_PAGE: &str = "guest-root";

pub async fn setup_pool() -> Pool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn test_cipher() -> Arc<CredentialCipher> {
    Arc::new(CredentialCipher::new(&[7u8; 32]).unwrap())
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[derive(Debug, Clone)]
pub struct FakePage {
    pub id: String,
    pub title: String,
    pub properties: serde_json::Map<String, Value>,
    pub blocks: Vec<Value>,
}

#[derive(Default)]
pub struct FakeState {
    /// container id → pages in creation order
    pub containers: HashMap<String, Vec<FakePage>>,
    pub valid_containers: HashSet<String>,
    pub reject_titles: HashSet<String>,
    pub fail_create_database: bool,
    pub fail_query: bool,
    pub query_page_size: usize,
    pub next_id: usize,
    pub renamed: Vec<(String, String)>,
    /// titles passed to `create_database`
    pub created_databases: Vec<String>,
    /// (operation, token) for every call
    pub calls: Vec<(String, String)>,
}

/// In-memory Notion: containers hold pages, pages hold API-shaped blocks.
#[derive(Clone)]
pub struct FakeNotion {
    pub state: Arc<Mutex<FakeState>>,
}

impl Default for FakeNotion {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                query_page_size: 2,
                ..Default::default()
            })),
        }
    }
}

fn title_property(text: &str) -> Value {
    json!({ "type": "title", "title": [{ "plain_text": text }] })
}

fn rich_text_property(text: &str) -> Value {
    json!({ "type": "rich_text", "rich_text": [{ "plain_text": text }] })
}

impl FakeNotion {
    pub async fn add_container(&self, id: &str) {
        let mut st = self.state.lock().await;
        st.containers.entry(id.to_string()).or_default();
        st.valid_containers.insert(id.to_string());
    }

    /// Seed a source record with optional `Title` / `Description` properties
    /// and a body given as plain text lines.
    pub async fn seed_page(&self, container: &str, name: &str, extra: Option<&str>, description: Option<&str>, body: &str) -> String {
        let mut st = self.state.lock().await;
        st.next_id += 1;
        let id = format!("seed-{}", st.next_id);
        let mut properties = serde_json::Map::new();
        properties.insert("Name".into(), title_property(name));
        if let Some(extra) = extra {
            properties.insert("Title".into(), rich_text_property(extra));
        }
        if let Some(description) = description {
            properties.insert("Description".into(), rich_text_property(description));
        }
        let blocks = codec::to_blocks(body).iter().map(|b| b.to_api()).collect();
        st.containers.entry(container.to_string()).or_default().push(FakePage {
            id: id.clone(),
            title: name.to_string(),
            properties,
            blocks,
        });
        id
    }

    pub async fn pages(&self, container: &str) -> Vec<FakePage> {
        self.state
            .lock()
            .await
            .containers
            .get(container)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn container_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.state.lock().await.containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn tokens_for(&self, op: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub async fn set(&self, f: impl FnOnce(&mut FakeState)) {
        let mut st = self.state.lock().await;
        f(&mut *st);
    }

    fn find_page<'a>(st: &'a mut FakeState, page_id: &str) -> Option<&'a mut FakePage> {
        st.containers
            .values_mut()
            .flat_map(|pages| pages.iter_mut())
            .find(|p| p.id == page_id)
    }
}

fn not_found(what: &str) -> NotionError {
    NotionError::Status {
        status: StatusCode::NOT_FOUND,
        body: format!("{what} not found"),
    }
}

#[async_trait]
impl DocumentApi for FakeNotion {
    async fn validate_access(&self, token: &str, container_id: &str) -> NotionResult<bool> {
        let mut st = self.state.lock().await;
        st.calls.push(("validate_access".into(), token.into()));
        Ok(st.valid_containers.contains(container_id))
    }

    async fn resolve_data_source_id(&self, _token: &str, container_id: &str) -> NotionResult<String> {
        Ok(container_id.to_string())
    }

    async fn find_title_property(&self, _token: &str, _container_id: &str) -> NotionResult<String> {
        Ok("Name".into())
    }

    async fn find_page_by_date(&self, token: &str, container_id: &str, date: NaiveDate) -> NotionResult<Option<String>> {
        let mut st = self.state.lock().await;
        st.calls.push(("find_page_by_date".into(), token.into()));
        let wanted = date.format("%Y-%m-%d").to_string();
        Ok(st
            .containers
            .get(container_id)
            .and_then(|pages| pages.iter().find(|p| p.title == wanted))
            .map(|p| p.id.clone()))
    }

    async fn create_page(&self, token: &str, container_id: &str, content: &NotionContent) -> NotionResult<CreatedPage> {
        let mut st = self.state.lock().await;
        st.calls.push(("create_page".into(), token.into()));
        if st.reject_titles.contains(&content.title) {
            return Ok(CreatedPage {
                ok: false,
                page_id: None,
                raw: r#"{"object":"error","status":400}"#.into(),
            });
        }
        st.next_id += 1;
        let id = format!("page-{}", st.next_id);
        let mut properties = serde_json::Map::new();
        properties.insert("Name".into(), title_property(&content.title));
        let blocks = content.blocks(false).iter().map(|b| b.to_api()).collect();
        st.containers.entry(container_id.to_string()).or_default().push(FakePage {
            id: id.clone(),
            title: content.title.clone(),
            properties,
            blocks,
        });
        Ok(CreatedPage {
            ok: true,
            page_id: Some(id.clone()),
            raw: json!({ "id": id }).to_string(),
        })
    }

    async fn append_content(&self, token: &str, page_id: &str, content: &NotionContent) -> NotionResult<bool> {
        let mut st = self.state.lock().await;
        st.calls.push(("append_content".into(), token.into()));
        match Self::find_page(&mut st, page_id) {
            Some(page) => {
                page.blocks
                    .extend(content.blocks(true).iter().map(|b| b.to_api()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn retrieve_block_children(&self, token: &str, block_id: &str) -> NotionResult<Vec<Value>> {
        let mut st = self.state.lock().await;
        st.calls.push(("retrieve_block_children".into(), token.into()));
        Self::find_page(&mut st, block_id)
            .map(|p| p.blocks.clone())
            .ok_or_else(|| not_found(block_id))
    }

    async fn get_page_property(&self, _token: &str, page_id: &str, name: &str) -> NotionResult<String> {
        let mut st = self.state.lock().await;
        let page = Self::find_page(&mut st, page_id).ok_or_else(|| not_found(page_id))?;
        Ok(page.properties.get(name).map(codec::property_text).unwrap_or_default())
    }

    async fn update_page_property(&self, token: &str, page_id: &str, name: &str, text: &str) -> NotionResult<bool> {
        let mut st = self.state.lock().await;
        st.calls.push(("update_page_property".into(), token.into()));
        match Self::find_page(&mut st, page_id) {
            Some(page) => {
                page.properties.insert(name.to_string(), rich_text_property(text));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query_database(&self, token: &str, container_id: &str, cursor: Option<&str>) -> NotionResult<QueryPage> {
        let mut st = self.state.lock().await;
        st.calls.push(("query_database".into(), token.into()));
        if st.fail_query {
            return Err(NotionError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".into(),
            });
        }
        let pages = st.containers.get(container_id).ok_or_else(|| not_found(container_id))?;
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + st.query_page_size).min(pages.len());
        let items = pages[start..end]
            .iter()
            .map(|p| json!({ "id": p.id, "properties": Value::Object(p.properties.clone()) }))
            .collect();
        let has_more = end < pages.len();
        Ok(QueryPage {
            items,
            cursor: has_more.then(|| end.to_string()),
            has_more,
        })
    }

    async fn create_database(&self, token: &str, _parent_page_id: &str, title: &str) -> NotionResult<Option<String>> {
        let mut st = self.state.lock().await;
        st.calls.push(("create_database".into(), token.into()));
        if st.fail_create_database {
            return Ok(None);
        }
        st.next_id += 1;
        let id = format!("db-{}", st.next_id);
        st.containers.insert(id.clone(), Vec::new());
        st.created_databases.push(title.to_string());
        Ok(Some(id))
    }

    async fn update_database(&self, token: &str, container_id: &str, title: &str) -> NotionResult<bool> {
        let mut st = self.state.lock().await;
        st.calls.push(("update_database".into(), token.into()));
        st.renamed.push((container_id.to_string(), title.to_string()));
        Ok(st.containers.contains_key(container_id))
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    pub async fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, external_user_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .await
            .push((external_user_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Engines wired against one pool, fake and notifier.
pub struct Harness {
    pub pool: Pool,
    pub notion: FakeNotion,
    pub cipher: Arc<CredentialCipher>,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub async fn new() -> Self {
        Self {
            pool: setup_pool().await,
            notion: FakeNotion::default(),
            cipher: test_cipher(),
            notifier: RecordingNotifier::default(),
        }
    }

    pub fn guest() -> GuestWorkspace {
        GuestWorkspace::new(ADMIN_TOKEN, ROOT_PAGE)
    }

    fn api(&self) -> Arc<dyn DocumentApi> {
        Arc::new(self.notion.clone())
    }

    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.pool.clone(),
            self.api(),
            Arc::clone(&self.cipher),
            Self::guest(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    pub fn config_flow(&self) -> ConfigFlowEngine {
        ConfigFlowEngine::new(self.pool.clone(), self.api(), Arc::clone(&self.cipher))
    }

    pub fn migration(&self) -> Arc<MigrationEngine> {
        Arc::new(MigrationEngine::new(
            self.pool.clone(),
            self.api(),
            Arc::clone(&self.cipher),
            Self::guest(),
            Arc::new(self.notifier.clone()),
            Duration::ZERO,
            FixedOffset::east_opt(0).unwrap(),
        ))
    }

    pub fn router(&self) -> Router {
        Router::new(self.config_flow(), self.sync_engine(), self.migration())
    }

    /// Store an ACTIVE, non-guest config with an encrypted credential.
    pub async fn configure_user(&self, user: &str, token: &str, container: &str) {
        let sealed = self.cipher.encrypt(token).unwrap();
        sqlx::query(
            "INSERT INTO user_config (external_user_id, status, credential, container_id, is_guest, migration_status, updated_at) \
             VALUES (?, 'ACTIVE', ?, ?, 0, 'NONE', ?)",
        )
        .bind(user)
        .bind(sealed)
        .bind(container)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn set_column(&self, user: &str, column: &str, value: &str) {
        let sql = format!("UPDATE user_config SET {column} = ? WHERE external_user_id = ?");
        sqlx::query(&sql)
            .bind(value)
            .bind(user)
            .execute(&self.pool)
            .await
            .unwrap();
    }
}
