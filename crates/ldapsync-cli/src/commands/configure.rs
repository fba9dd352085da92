//! configure command - create or update the directory configuration

use super::CommandContext;
use crate::utils::print_json;
use anyhow::{Context, Result};
use colored::Colorize;
use ldapsync_core::types::DirectoryConfigUpdate;
use std::path::Path;

pub async fn execute(ctx: &CommandContext, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let update: DirectoryConfigUpdate = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let config = ctx.engine.save_config(update).await?;

    if ctx.is_json() {
        return print_json(&config);
    }

    println!("{} {}", "Saved configuration".green().bold(), config.name);
    println!("  Server:      {}", config.server_url());
    println!("  Search base: {}", config.search_base);
    match &config.user_dn_template {
        Some(template) => println!("  Resolution:  template {}", template),
        None => println!("  Resolution:  search {}", config.search_filter),
    }
    println!("  Sync:        every {}s", config.sync_interval);
    Ok(())
}
