use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Deserialize, Debug, Clone)]
pub struct DatabaseProperty {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DataSourceRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Shape shared by `GET /databases/{id}` and `GET /data_sources/{id}`.
///
/// Multi-source containers come back without `properties` and list their
/// schemas under `data_sources` instead.
#[derive(Deserialize, Debug, Clone)]
pub struct RetrieveDatabaseResp {
    pub id: String,
    #[serde(default)]
    pub title: Vec<Value>,
    #[serde(default)]
    pub properties: BTreeMap<String, DatabaseProperty>,
    #[serde(default)]
    pub data_sources: Vec<DataSourceRef>,
}

impl RetrieveDatabaseResp {
    pub fn title_property(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, p)| p.typ == "title")
            .map(|(name, _)| name.as_str())
    }
}

/// Outcome of a page create. `raw` keeps the response body for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPage {
    pub ok: bool,
    pub page_id: Option<String>,
    pub raw: String,
}

/// One page of a container query, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Value>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Deserialize)]
pub(crate) struct ListResponse {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Deserialize)]
pub(crate) struct CreatedObject {
    pub id: String,
}
