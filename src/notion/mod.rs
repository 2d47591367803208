use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codec::{self, Block, NotionContent};
use crate::config::Config;

pub mod error;
pub mod model;

pub use error::NotionError;
pub use model::{CreatedPage, DatabaseProperty, QueryPage, RetrieveDatabaseResp};
use model::{CreatedObject, ListResponse};

const NOTION_API_BASE: &str = "https://api.notion.com/";
/// First API version whose containers indirect to data sources.
const DATA_SOURCES_VERSION: &str = "2025-09-03";
pub const QUERY_PAGE_SIZE: u32 = 50;
/// Notion accepts at most this many children per create/append call.
pub const MAX_CHILDREN_PER_REQUEST: usize = 100;

pub type NotionResult<T> = Result<T, NotionError>;

/// Remote document API as seen by the engines.
///
/// Every call takes the bearer credential explicitly; implementations keep no
/// per-user state and never retry.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// `true` on 2xx for the container metadata, `false` otherwise.
    async fn validate_access(&self, token: &str, container_id: &str) -> NotionResult<bool>;

    async fn resolve_data_source_id(&self, token: &str, container_id: &str)
        -> NotionResult<String>;

    async fn find_title_property(&self, token: &str, container_id: &str) -> NotionResult<String>;

    /// Page whose title equals `date` in ISO form.
    async fn find_page_by_date(
        &self,
        token: &str,
        container_id: &str,
        date: NaiveDate,
    ) -> NotionResult<Option<String>>;

    async fn create_page(
        &self,
        token: &str,
        container_id: &str,
        content: &NotionContent,
    ) -> NotionResult<CreatedPage>;

    /// Append a heading for `content.title`, the body blocks and the tag line.
    async fn append_content(
        &self,
        token: &str,
        page_id: &str,
        content: &NotionContent,
    ) -> NotionResult<bool>;

    /// All child blocks of a page or block, following pagination.
    async fn retrieve_block_children(&self, token: &str, block_id: &str)
        -> NotionResult<Vec<Value>>;

    async fn get_page_property(&self, token: &str, page_id: &str, name: &str)
        -> NotionResult<String>;

    async fn update_page_property(
        &self,
        token: &str,
        page_id: &str,
        name: &str,
        text: &str,
    ) -> NotionResult<bool>;

    async fn query_database(
        &self,
        token: &str,
        container_id: &str,
        cursor: Option<&str>,
    ) -> NotionResult<QueryPage>;

    async fn create_database(
        &self,
        token: &str,
        parent_page_id: &str,
        title: &str,
    ) -> NotionResult<Option<String>>;

    async fn update_database(&self, token: &str, container_id: &str, title: &str)
        -> NotionResult<bool>;
}

/// Schema facts needed to write into a container.
#[derive(Debug, Clone)]
pub struct ContainerSchema {
    pub data_source_id: String,
    pub title_property: String,
    pub properties: BTreeMap<String, DatabaseProperty>,
}

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    version: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn new(version: impl Into<String>) -> NotionResult<Self> {
        let base_url =
            Url::parse(NOTION_API_BASE).map_err(|e| NotionError::InvalidUrl(e.to_string()))?;
        Self::with_base_url(version, base_url)
    }

    pub fn with_base_url(version: impl Into<String>, mut base_url: Url) -> NotionResult<Self> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(concat!("notebox/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url,
            version: version.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> NotionResult<Self> {
        match &cfg.notion.base_url {
            Some(url) => {
                let url = Url::parse(url).map_err(|e| NotionError::InvalidUrl(e.to_string()))?;
                Self::with_base_url(cfg.notion.version.clone(), url)
            }
            None => Self::new(cfg.notion.version.clone()),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn endpoint(&self, path: &str) -> NotionResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| NotionError::InvalidUrl(e.to_string()))
    }

    pub fn build_request(
        &self,
        method: Method,
        url: Url,
        token: &str,
        body: Option<&Value>,
    ) -> NotionResult<reqwest::Request> {
        let mut builder = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Notion-Version", &self.version);
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .json(body);
        }
        Ok(builder.build()?)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        token: &str,
        body: Option<&Value>,
    ) -> NotionResult<Response> {
        let request = self.build_request(method, url, token, body)?;
        log_request(&request, body);
        let res = self.http.execute(request).await?;
        debug!(status = %res.status(), url = %res.url(), "notion response");
        Ok(res)
    }

    async fn read_json<T: DeserializeOwned>(res: Response) -> NotionResult<T> {
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(NotionError::Status { status, body: text });
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn retrieve_database(
        &self,
        token: &str,
        database_id: &str,
    ) -> NotionResult<RetrieveDatabaseResp> {
        let url = self.endpoint(&format!("v1/databases/{}", database_id))?;
        let res = self.send(Method::GET, url, token, None).await?;
        Self::read_json(res).await
    }

    pub async fn retrieve_data_source(
        &self,
        token: &str,
        data_source_id: &str,
    ) -> NotionResult<RetrieveDatabaseResp> {
        let url = self.endpoint(&format!("v1/data_sources/{}", data_source_id))?;
        let res = self.send(Method::GET, url, token, None).await?;
        Self::read_json(res).await
    }

    /// Resolve the schema-bearing resource behind a container and its title
    /// property. Inline properties win; otherwise the first data source is
    /// fetched once.
    pub async fn resolve_schema(
        &self,
        token: &str,
        container_id: &str,
    ) -> NotionResult<ContainerSchema> {
        let meta = self.retrieve_database(token, container_id).await?;
        if !meta.properties.is_empty() {
            let title_property = meta
                .title_property()
                .map(str::to_string)
                .ok_or_else(|| NotionError::NoTitleProperty {
                    container: container_id.to_string(),
                })?;
            return Ok(ContainerSchema {
                data_source_id: container_id.to_string(),
                title_property,
                properties: meta.properties,
            });
        }

        let data_source_id = data_source_of(&meta, container_id)?;
        info!(
            container = container_id,
            data_source = %data_source_id,
            "multi-source container, using first data source"
        );
        let source = self.retrieve_data_source(token, &data_source_id).await?;
        let title_property = source
            .title_property()
            .map(str::to_string)
            .ok_or_else(|| NotionError::NoTitleProperty {
                container: container_id.to_string(),
            })?;
        Ok(ContainerSchema {
            data_source_id,
            title_property,
            properties: source.properties,
        })
    }

    /// POST a query to the data-source endpoint, retrying once against the
    /// legacy `databases/{id}/query` shape when the former is unknown (404).
    async fn post_query(
        &self,
        token: &str,
        container_id: &str,
        data_source_id: &str,
        body: &Value,
    ) -> NotionResult<Response> {
        let url = self.endpoint(&format!("v1/data_sources/{}/query", data_source_id))?;
        let res = self.send(Method::POST, url, token, Some(body)).await?;
        if res.status() != StatusCode::NOT_FOUND {
            return Ok(res);
        }
        debug!(
            container = container_id,
            "data source query returned 404, falling back to database query"
        );
        let url = self.endpoint(&format!("v1/databases/{}/query", container_id))?;
        self.send(Method::POST, url, token, Some(body)).await
    }

    async fn append_blocks(&self, token: &str, block_id: &str, blocks: &[Block]) -> NotionResult<bool> {
        for chunk in blocks.chunks(MAX_CHILDREN_PER_REQUEST) {
            let url = self.endpoint(&format!("v1/blocks/{}/children", block_id))?;
            let body = build_children_request(chunk);
            let res = self.send(Method::PATCH, url, token, Some(&body)).await?;
            if !res.status().is_success() {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                warn!(%status, block_id, body = %body, "append children failed");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl DocumentApi for NotionClient {
    async fn validate_access(&self, token: &str, container_id: &str) -> NotionResult<bool> {
        let url = self.endpoint(&format!("v1/databases/{}", container_id))?;
        let res = self.send(Method::GET, url, token, None).await?;
        if res.status().is_success() {
            return Ok(true);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        warn!(%status, container = container_id, body = %body, "notion access check failed");
        Ok(false)
    }

    async fn resolve_data_source_id(
        &self,
        token: &str,
        container_id: &str,
    ) -> NotionResult<String> {
        let meta = self.retrieve_database(token, container_id).await?;
        if !meta.properties.is_empty() {
            return Ok(container_id.to_string());
        }
        data_source_of(&meta, container_id)
    }

    async fn find_title_property(&self, token: &str, container_id: &str) -> NotionResult<String> {
        Ok(self.resolve_schema(token, container_id).await?.title_property)
    }

    async fn find_page_by_date(
        &self,
        token: &str,
        container_id: &str,
        date: NaiveDate,
    ) -> NotionResult<Option<String>> {
        let schema = self.resolve_schema(token, container_id).await?;
        let body = build_date_filter(&schema.title_property, date);
        let res = self
            .post_query(token, container_id, &schema.data_source_id, &body)
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, container = container_id, body = %body, "query for dated page failed");
            return Ok(None);
        }
        let list: ListResponse = Self::read_json(res).await?;
        Ok(list
            .results
            .first()
            .and_then(|page| page.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn create_page(
        &self,
        token: &str,
        container_id: &str,
        content: &NotionContent,
    ) -> NotionResult<CreatedPage> {
        let schema = self.resolve_schema(token, container_id).await?;
        let blocks = content.blocks(false);
        let (first, rest) = blocks.split_at(blocks.len().min(MAX_CHILDREN_PER_REQUEST));
        let body = build_page_request(container_id, &schema, &content.title, first);

        let url = self.endpoint("v1/pages")?;
        let res = self.send(Method::POST, url, token, Some(&body)).await?;
        let status = res.status();
        let raw = res.text().await?;
        if !status.is_success() {
            warn!(%status, container = container_id, body = %raw, "create page failed");
            return Ok(CreatedPage {
                ok: false,
                page_id: None,
                raw,
            });
        }

        let page_id = serde_json::from_str::<CreatedObject>(&raw)
            .ok()
            .map(|created| created.id);
        if let Some(id) = page_id.as_deref() {
            if !rest.is_empty() && !self.append_blocks(token, id, rest).await? {
                warn!(page_id = id, remaining = rest.len(), "page created but overflow blocks were not appended");
            }
        }
        info!(page_id = ?page_id, container = container_id, "created notion page");
        Ok(CreatedPage {
            ok: true,
            page_id,
            raw,
        })
    }

    async fn append_content(
        &self,
        token: &str,
        page_id: &str,
        content: &NotionContent,
    ) -> NotionResult<bool> {
        let blocks = content.blocks(true);
        if blocks.is_empty() {
            return Ok(true);
        }
        self.append_blocks(token, page_id, &blocks).await
    }

    async fn retrieve_block_children(
        &self,
        token: &str,
        block_id: &str,
    ) -> NotionResult<Vec<Value>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut url = self.endpoint(&format!("v1/blocks/{}/children", block_id))?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("page_size", "100");
                if let Some(c) = cursor.as_deref() {
                    pairs.append_pair("start_cursor", c);
                }
            }
            let res = self.send(Method::GET, url, token, None).await?;
            let list: ListResponse = Self::read_json(res).await?;
            all.extend(list.results);
            match list.next_cursor {
                Some(next) if list.has_more => cursor = Some(next),
                _ => break,
            }
        }
        Ok(all)
    }

    async fn get_page_property(
        &self,
        token: &str,
        page_id: &str,
        name: &str,
    ) -> NotionResult<String> {
        let url = self.endpoint(&format!("v1/pages/{}", page_id))?;
        let res = self.send(Method::GET, url, token, None).await?;
        let page: Value = Self::read_json(res).await?;
        Ok(page
            .get("properties")
            .and_then(|props| props.get(name))
            .map(codec::property_text)
            .unwrap_or_default())
    }

    async fn update_page_property(
        &self,
        token: &str,
        page_id: &str,
        name: &str,
        text: &str,
    ) -> NotionResult<bool> {
        let url = self.endpoint(&format!("v1/pages/{}", page_id))?;
        let body = build_rich_text_update(name, text);
        let res = self.send(Method::PATCH, url, token, Some(&body)).await?;
        if res.status().is_success() {
            return Ok(true);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        warn!(%status, page_id, property = name, body = %body, "update page property failed");
        Ok(false)
    }

    async fn query_database(
        &self,
        token: &str,
        container_id: &str,
        cursor: Option<&str>,
    ) -> NotionResult<QueryPage> {
        let data_source_id = self.resolve_data_source_id(token, container_id).await?;
        let body = build_query_request(cursor);
        let res = self
            .post_query(token, container_id, &data_source_id, &body)
            .await?;
        let list: ListResponse = Self::read_json(res).await?;
        Ok(QueryPage {
            items: list.results,
            cursor: list.next_cursor,
            has_more: list.has_more,
        })
    }

    async fn create_database(
        &self,
        token: &str,
        parent_page_id: &str,
        title: &str,
    ) -> NotionResult<Option<String>> {
        let url = self.endpoint("v1/databases")?;
        let body = build_create_database_request(&self.version, parent_page_id, title);
        let res = self.send(Method::POST, url, token, Some(&body)).await?;
        let status = res.status();
        let raw = res.text().await?;
        if !status.is_success() {
            warn!(%status, parent = parent_page_id, body = %raw, "create database failed");
            return Ok(None);
        }
        let created: CreatedObject = serde_json::from_str(&raw)?;
        info!(container = %created.id, title, "created notion database");
        Ok(Some(created.id))
    }

    async fn update_database(
        &self,
        token: &str,
        container_id: &str,
        title: &str,
    ) -> NotionResult<bool> {
        let url = self.endpoint(&format!("v1/databases/{}", container_id))?;
        let body = json!({ "title": codec::rich_text(title) });
        let res = self.send(Method::PATCH, url, token, Some(&body)).await?;
        if res.status().is_success() {
            return Ok(true);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        warn!(%status, container = container_id, body = %body, "rename database failed");
        Ok(false)
    }
}

fn data_source_of(meta: &RetrieveDatabaseResp, container_id: &str) -> NotionResult<String> {
    meta.data_sources
        .first()
        .map(|ds| ds.id.clone())
        .ok_or_else(|| NotionError::DataSourceNotFound {
            container: container_id.to_string(),
        })
}

fn log_request(request: &reqwest::Request, body: Option<&Value>) {
    debug!(method = %request.method(), url = %request.url(), "notion request");
    for (name, value) in request.headers() {
        if name.as_str().eq_ignore_ascii_case("authorization") {
            debug!("  {}: Bearer [REDACTED]", name);
        } else {
            debug!("  {}: {}", name, value.to_str().unwrap_or("[invalid]"));
        }
    }
    if let Some(body) = body {
        debug!("  payload: {}", body);
    }
}

/// Page create body. Multi-source containers are addressed through their
/// data source, single-source ones through the container id.
pub fn build_page_request(
    container_id: &str,
    schema: &ContainerSchema,
    title: &str,
    children: &[Block],
) -> Value {
    let parent = if schema.data_source_id == container_id {
        json!({ "database_id": container_id })
    } else {
        json!({ "type": "data_source_id", "data_source_id": schema.data_source_id })
    };

    let mut properties = Map::new();
    properties.insert(
        schema.title_property.clone(),
        json!({ "title": codec::rich_text(title) }),
    );

    json!({
        "parent": parent,
        "properties": Value::Object(properties),
        "children": children.iter().map(Block::to_api).collect::<Vec<_>>(),
    })
}

pub fn build_children_request(blocks: &[Block]) -> Value {
    json!({ "children": blocks.iter().map(Block::to_api).collect::<Vec<_>>() })
}

pub fn build_date_filter(title_property: &str, date: NaiveDate) -> Value {
    json!({
        "filter": {
            "property": title_property,
            "title": { "equals": date.format("%Y-%m-%d").to_string() },
        },
        "page_size": 1,
    })
}

pub fn build_query_request(cursor: Option<&str>) -> Value {
    let mut body = json!({
        "page_size": QUERY_PAGE_SIZE,
        "sorts": [ { "timestamp": "created_time", "direction": "ascending" } ],
    });
    if let Some(cursor) = cursor {
        body["start_cursor"] = Value::String(cursor.to_string());
    }
    body
}

pub fn build_rich_text_update(property: &str, text: &str) -> Value {
    let mut properties = Map::new();
    properties.insert(
        property.to_string(),
        json!({ "rich_text": codec::rich_text(text) }),
    );
    json!({ "properties": Value::Object(properties) })
}

/// Fixed schema for guest containers.
pub fn guest_schema() -> Value {
    json!({
        "Name": { "title": {} },
        "Created": { "created_time": {} },
        "Date": { "date": {} },
        "Description": { "rich_text": {} },
        "Last Edited": { "last_edited_time": {} },
        "Status": { "status": {} },
        "Title": { "rich_text": {} },
    })
}

pub fn build_create_database_request(version: &str, parent_page_id: &str, title: &str) -> Value {
    let mut body = json!({
        "parent": { "type": "page_id", "page_id": parent_page_id },
        "title": codec::rich_text(title),
    });
    if version >= DATA_SOURCES_VERSION {
        body["initial_data_source"] = json!({ "properties": guest_schema() });
    } else {
        body["properties"] = guest_schema();
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(data_source_id: &str) -> ContainerSchema {
        ContainerSchema {
            data_source_id: data_source_id.into(),
            title_property: "Name".into(),
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn build_page_request_single_source() {
        let blocks = vec![Block::Paragraph("body".into())];
        let body = build_page_request("db-1", &schema("db-1"), "2026-10-18", &blocks);
        assert_eq!(body["parent"]["database_id"], "db-1");
        assert_eq!(
            body["properties"]["Name"]["title"][0]["text"]["content"],
            "2026-10-18"
        );
        assert_eq!(body["children"][0]["type"], "paragraph");
    }

    #[test]
    fn build_page_request_multi_source_uses_data_source_parent() {
        let body = build_page_request("db-1", &schema("ds-9"), "t", &[]);
        assert_eq!(body["parent"]["type"], "data_source_id");
        assert_eq!(body["parent"]["data_source_id"], "ds-9");
        assert_eq!(body["children"], json!([]));
    }

    #[test]
    fn date_filter_and_query_bodies() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let f = build_date_filter("Name", date);
        assert_eq!(f["filter"]["property"], "Name");
        assert_eq!(f["filter"]["title"]["equals"], "2026-02-01");
        assert_eq!(f["page_size"], 1);

        let q = build_query_request(None);
        assert_eq!(q["page_size"], 50);
        assert_eq!(q["sorts"][0]["direction"], "ascending");
        assert!(q.get("start_cursor").is_none());
        assert_eq!(build_query_request(Some("c1"))["start_cursor"], "c1");
    }

    #[test]
    fn create_database_body_follows_api_version() {
        let new = build_create_database_request("2025-09-03", "root", "NoteBox_abc");
        assert_eq!(new["parent"]["page_id"], "root");
        assert_eq!(
            new["initial_data_source"]["properties"]["Name"],
            json!({ "title": {} })
        );
        assert!(new.get("properties").is_none());

        let old = build_create_database_request("2022-06-28", "root", "NoteBox_abc");
        assert_eq!(old["properties"]["Description"], json!({ "rich_text": {} }));
        assert_eq!(old["title"][0]["text"]["content"], "NoteBox_abc");
    }

    #[test]
    fn rich_text_update_body() {
        let body = build_rich_text_update("Description", "digest");
        assert_eq!(
            body["properties"]["Description"]["rich_text"][0]["text"]["content"],
            "digest"
        );
    }

    #[test]
    fn build_request_sets_headers() {
        let client = NotionClient::new("2022-06-28").unwrap();
        let url = client.endpoint("v1/pages").unwrap();
        let body = json!({ "sample": true });
        let request = client
            .build_request(Method::POST, url, "token", Some(&body))
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/v1/pages");
        let headers = request.headers();
        assert_eq!(
            headers.get("Authorization").and_then(|h| h.to_str().ok()).unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers.get("Notion-Version").and_then(|h| h.to_str().ok()).unwrap(),
            "2022-06-28"
        );
        assert_eq!(
            headers.get("Content-Type").and_then(|h| h.to_str().ok()).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn base_url_with_path_keeps_prefix() {
        let client =
            NotionClient::with_base_url("v", Url::parse("http://proxy.local/notion").unwrap())
                .unwrap();
        assert_eq!(
            client.endpoint("v1/pages").unwrap().as_str(),
            "http://proxy.local/notion/v1/pages"
        );
    }
}
