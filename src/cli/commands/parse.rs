//! Parser dry run.

use std::path::Path;
use std::sync::Arc;

use console::style;

use crate::cli::helpers::{format_amount, read_snapshot};
use crate::config::Settings;
use crate::parsers::ParseRequest;

/// Resolve and run the parser for `url`, printing the result as JSON.
pub async fn cmd_parse(settings: &Settings, url: &str, html: Option<&Path>) -> anyhow::Result<()> {
    let kind = settings.registry().resolve(url)?;
    eprintln!("{} Using {} parser", style("→").cyan(), kind);

    let snapshot = read_snapshot(html).await?;
    let browser = Arc::new(settings.browser());
    let parsers = settings.parser_set(browser.clone())?;

    let request = ParseRequest::new(url).with_snapshot(snapshot.as_deref());
    let result = parsers.parse(kind, &request).await;
    browser.shutdown().await;

    let parsed = result?;
    eprintln!(
        "{} {} items, total {}",
        style("✓").green(),
        parsed.items.len(),
        format_amount(parsed.header_info.total_amount)
    );
    println!("{}", serde_json::to_string_pretty(&parsed)?);

    Ok(())
}
