//! users and set-active commands

use super::CommandContext;
use crate::utils::{format_optional_datetime, print_json, truncate};
use anyhow::Result;
use colored::Colorize;

pub async fn list(ctx: &CommandContext, all: bool) -> Result<()> {
    let users = ctx.engine.list_users(!all).await?;

    if ctx.is_json() {
        return print_json(&users);
    }

    if users.is_empty() {
        println!("No directory users");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<30}  {:<8}  {:<8}  {}",
        "ID".bold(),
        "USERNAME".bold(),
        "EMAIL".bold(),
        "ACTIVE".bold(),
        "STATUS".bold(),
        "LAST LOGIN".bold()
    );

    for user in &users {
        let active = if user.is_active {
            "yes".green()
        } else {
            "no".red()
        };
        println!(
            "{:<36}  {:<20}  {:<30}  {:<8}  {:<8}  {}",
            user.id,
            truncate(&user.username, 20),
            truncate(&user.email, 30),
            active,
            user.sync_status.as_str(),
            format_optional_datetime(user.last_login.as_ref())
        );
    }

    println!();
    println!("{} user(s)", users.len());
    Ok(())
}

pub async fn set_active(ctx: &CommandContext, id: &str, active: bool) -> Result<()> {
    ctx.engine.set_user_active(id, active).await?;

    let state = if active { "activated" } else { "deactivated" };
    println!("User {} {}", id.cyan(), state);
    Ok(())
}
