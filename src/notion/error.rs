use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced by the Notion access layer.
///
/// Non-2xx answers to yes/no style calls are reported as `Ok(false)` /
/// `Ok(None)` by the client itself; only calls that must produce a value
/// turn them into [`NotionError::Status`].
#[derive(Debug, Error)]
pub enum NotionError {
    #[error("failed to reach Notion: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notion error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid Notion response JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("no title property in container {container}")]
    NoTitleProperty { container: String },
    #[error("container {container} exposes neither properties nor data sources")]
    DataSourceNotFound { container: String },
    #[error("invalid Notion URL: {0}")]
    InvalidUrl(String),
}

impl NotionError {
    pub fn is_transport(&self) -> bool {
        matches!(self, NotionError::Transport(_))
    }
}
