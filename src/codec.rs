//! Free text ↔ Notion block conversion and inline `#tag` extraction.
//!
//! The text direction is line oriented: one block per input line, no reflow.
//! The block → text direction exists to feed downstream analysis and drops
//! empty blocks, so it is not a byte-exact inverse.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

/// Notion rejects rich-text runs longer than this.
pub const MAX_RICH_TEXT: usize = 2000;

static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([\p{L}\p{N}_-]+)").expect("valid tag regex"));
static INLINE_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{3000}]+").expect("valid whitespace regex"));

/// A message turned into page material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotionContent {
    pub title: String,
    pub body: String,
    /// Distinct tag names in order of first appearance, without the `#`.
    pub tags: Vec<String>,
}

impl NotionContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            tags,
        }
    }

    /// Strip tags from a raw message, then split the first line off as title.
    pub fn from_message(raw: &str) -> Self {
        let (text, tags) = parse_tags(raw);
        let (title, body) = split_title_body(&text);
        Self { title, body, tags }
    }

    /// Blocks written for this content: an optional heading carrying the
    /// title, the body lines, then a trailing `#a #b` paragraph.
    pub fn blocks(&self, title_heading: bool) -> Vec<Block> {
        let mut blocks = Vec::new();
        if title_heading && !self.title.trim().is_empty() {
            blocks.push(Block::Heading(self.title.clone()));
        }
        blocks.extend(to_blocks(&self.body));
        if let Some(line) = tag_line(&self.tags) {
            blocks.push(Block::Paragraph(line));
        }
        blocks
    }
}

/// Remove `#tag` tokens from `text` and return the cleaned text plus the tag
/// names. Runs of spaces collapse to one and every line is trimmed; line
/// breaks between non-blank lines survive.
///
/// Tags form an ordered set: a repeated `#tag` is removed from the text but
/// listed once, at its first position.
pub fn parse_tags(text: &str) -> (String, Vec<String>) {
    let mut tags: Vec<String> = Vec::new();
    for cap in TAG.captures_iter(text) {
        let name = &cap[1];
        if !tags.iter().any(|t| t == name) {
            tags.push(name.to_string());
        }
    }
    let stripped = TAG.replace_all(text, "");
    (normalize_whitespace(&stripped), tags)
}

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| INLINE_SPACE.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// First line is the title; everything after the first `\n` (trimmed) is the body.
pub fn split_title_body(text: &str) -> (String, String) {
    match text.split_once('\n') {
        Some((title, rest)) => (title.trim().to_string(), rest.trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}

/// `#a #b` line appended under page content, or `None` without tags.
pub fn tag_line(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    Some(
        tags.iter()
            .map(|t| format!("#{}", t))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(String),
    BulletItem(String),
    Todo { text: String, checked: bool },
    Quote(String),
    Heading(String),
}

impl Block {
    pub fn text(&self) -> &str {
        match self {
            Block::Paragraph(t)
            | Block::BulletItem(t)
            | Block::Quote(t)
            | Block::Heading(t)
            | Block::Todo { text: t, .. } => t,
        }
    }

    /// Notion block type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Paragraph(_) => "paragraph",
            Block::BulletItem(_) => "bulleted_list_item",
            Block::Todo { .. } => "to_do",
            Block::Quote(_) => "quote",
            Block::Heading(_) => "heading_3",
        }
    }

    /// Render as a Notion block object.
    pub fn to_api(&self) -> Value {
        let mut inner = Map::new();
        inner.insert("rich_text".into(), rich_text(self.text()));
        if let Block::Todo { checked, .. } = self {
            inner.insert("checked".into(), Value::Bool(*checked));
        }

        let mut obj = Map::new();
        obj.insert("object".into(), json!("block"));
        obj.insert("type".into(), json!(self.kind()));
        obj.insert(self.kind().into(), Value::Object(inner));
        Value::Object(obj)
    }

    /// Decode a block object returned by the API. Kinds without a text
    /// counterpart (images, dividers, tables, ...) yield `None`.
    pub fn from_api(value: &Value) -> Option<Block> {
        let kind = value.get("type")?.as_str()?;
        let body = value.get(kind)?;
        let text = rich_text_plain(body.get("rich_text")?);
        let block = match kind {
            "paragraph" => Block::Paragraph(text),
            "heading_1" | "heading_2" | "heading_3" => Block::Heading(text),
            "bulleted_list_item" | "numbered_list_item" => Block::BulletItem(text),
            "to_do" => Block::Todo {
                text,
                checked: body.get("checked").and_then(Value::as_bool).unwrap_or(false),
            },
            "quote" => Block::Quote(text),
            _ => return None,
        };
        Some(block)
    }
}

/// One block per line, classified by its leading marker.
pub fn to_blocks(text: &str) -> Vec<Block> {
    text.lines().map(parse_line).collect()
}

fn parse_line(line: &str) -> Block {
    let line = line.trim();
    if line.is_empty() {
        return Block::Paragraph(String::new());
    }
    for (prefix, checked) in [("- [ ] ", false), ("- [] ", false), ("- [x] ", true), ("- [X] ", true)] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Block::Todo {
                text: rest.to_string(),
                checked,
            };
        }
    }
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Block::BulletItem(rest.to_string());
    }
    for (prefix, checked) in [("[ ] ", false), ("[] ", false), ("[x] ", true), ("[X] ", true)] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Block::Todo {
                text: rest.to_string(),
                checked,
            };
        }
    }
    if let Some(rest) = line.strip_prefix("> ") {
        return Block::Quote(rest.to_string());
    }
    for prefix in ["### ", "## ", "# "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Block::Heading(rest.to_string());
        }
    }
    Block::Paragraph(line.to_string())
}

/// Markdown-ish text for analysis. Empty blocks are dropped.
pub fn from_blocks(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter(|b| !b.text().trim().is_empty())
        .map(|b| match b {
            Block::Heading(t) => format!("### {}", t),
            Block::Todo { text, checked: true } => format!("- [x] {}", text),
            Block::Todo { text, checked: false } => format!("- [ ] {}", text),
            Block::BulletItem(t) => format!("- {}", t),
            Block::Quote(t) => format!("> {}", t),
            Block::Paragraph(t) => t.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rich-text array for `text`, split into runs Notion accepts.
pub fn rich_text(text: &str) -> Value {
    if text.is_empty() {
        return Value::Array(Vec::new());
    }
    let chars: Vec<char> = text.chars().collect();
    Value::Array(
        chars
            .chunks(MAX_RICH_TEXT)
            .map(|chunk| {
                let content: String = chunk.iter().collect();
                json!({ "type": "text", "text": { "content": content } })
            })
            .collect(),
    )
}

/// Concatenate the plain text of a rich-text array.
pub fn rich_text_plain(runs: &Value) -> String {
    let Some(runs) = runs.as_array() else {
        return String::new();
    };
    runs.iter()
        .filter_map(|run| {
            run.get("plain_text")
                .and_then(Value::as_str)
                .or_else(|| run.pointer("/text/content").and_then(Value::as_str))
        })
        .collect()
}

/// Plain text of any block kind that carries `rich_text`, whatever its type.
pub fn block_plain_text(block: &Value) -> Option<String> {
    let kind = block.get("type")?.as_str()?;
    let runs = block.get(kind)?.get("rich_text")?;
    Some(rich_text_plain(runs))
}

/// Text of a typed page property (`title`, `rich_text`, ...), reading the
/// array stored under the property's declared type.
pub fn property_text(property: &Value) -> String {
    let Some(kind) = property.get("type").and_then(Value::as_str) else {
        return String::new();
    };
    property
        .get(kind)
        .map(rich_text_plain)
        .unwrap_or_default()
}
