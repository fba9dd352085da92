//! status and test-connection commands

use super::CommandContext;
use crate::utils::{format_optional_datetime, print_json};
use anyhow::{bail, Result};
use colored::Colorize;

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let status = ctx.engine.get_status().await?;

    if ctx.is_json() {
        return print_json(&status);
    }

    if !status.configured {
        println!("{}", "No directory configuration".yellow());
        println!("Create one with: ldapsync configure <file.toml>");
        return Ok(());
    }

    let flag = |on: bool| if on { "yes".green() } else { "no".red() };

    println!("{}", "Directory status".bold());
    println!();
    println!("  {}: {}", "Login enabled".cyan(), flag(status.enabled));
    println!("  {}: {}", "Sync enabled".cyan(), flag(status.sync_enabled));
    println!("  {}: {}s", "Sync interval".cyan(), status.sync_interval);
    println!(
        "  {}: {}",
        "Last sync".cyan(),
        format_optional_datetime(status.last_sync_time.as_ref())
    );
    println!("  {}: {}", "Sync status".cyan(), status.sync_status.as_str());
    println!();
    println!(
        "  {}: {} total, {} active, {} inactive",
        "Users".cyan(),
        status.user_stats.total,
        status.user_stats.active,
        status.user_stats.inactive
    );

    Ok(())
}

pub async fn test_connection(ctx: &CommandContext) -> Result<()> {
    let result = ctx.engine.test_active_connection().await?;

    if ctx.is_json() {
        print_json(&result)?;
    } else if result.success {
        println!("{} {}", "OK".green().bold(), result.message);
    } else {
        println!(
            "{} [{}] {}",
            "FAILED".red().bold(),
            result.code.as_deref().unwrap_or("Unknown"),
            result.message
        );
    }

    if !result.success {
        bail!("Connection test failed");
    }
    Ok(())
}
