use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use notebox::codec;
use notebox::config;
use notebox::notion::{DocumentApi, NotionClient};
use serde_json::Value;

/// Print how a Notion container resolves: data sources, title property, schema.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Database (container) id to inspect
    #[arg(long)]
    db_id: String,

    /// Token to use instead of the admin token from the config
    #[arg(long, env = "NOTION_TOKEN")]
    token: Option<String>,

    /// Also list the first page of records
    #[arg(long)]
    records: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    notebox::init_tracing();
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let client = NotionClient::from_config(&cfg)?;
    let token = args.token.unwrap_or_else(|| cfg.notion.admin_token.clone());

    let db = client.retrieve_database(&token, &args.db_id).await?;
    println!("Database ID: {}", db.id);
    println!("Title: {}", codec::rich_text_plain(&Value::Array(db.title.clone())));
    for ds in &db.data_sources {
        println!("Data source: {} ({})", ds.id, ds.name);
    }

    let schema = client.resolve_schema(&token, &args.db_id).await?;
    println!("Resolved data source: {}", schema.data_source_id);
    println!("Title property: {}", schema.title_property);
    println!("Properties:");
    for (name, prop) in &schema.properties {
        println!("  {} -> {{ id: {}, type: {} }}", name, prop.id, prop.typ);
    }

    if args.records {
        let page = client.query_database(&token, &args.db_id, None).await?;
        println!("Records (has_more: {}):", page.has_more);
        for item in &page.items {
            let id = item.get("id").and_then(Value::as_str).unwrap_or("?");
            let created = item.get("created_time").and_then(Value::as_str).unwrap_or("?");
            println!("  {} created {}", id, created);
        }
    }
    Ok(())
}
