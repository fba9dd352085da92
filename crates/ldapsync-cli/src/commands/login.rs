//! login command - check credentials against the directory

use super::CommandContext;
use crate::utils::print_json;
use anyhow::{bail, Result};
use colored::Colorize;
use ldapsync_sync::LoginResponse;

pub async fn execute(ctx: &CommandContext, username: &str, password: &str) -> Result<()> {
    let response = LoginResponse::from(ctx.engine.login(username, password).await);

    if ctx.is_json() {
        print_json(&response)?;
    } else if let Some(user) = &response.user {
        println!("{} {}", "Authenticated".green().bold(), user.directory_user.dn);
        println!("  Username: {}", user.profile.username);
        println!("  Email:    {}", user.profile.email);
        println!("  Name:     {} {}", user.profile.first_name, user.profile.last_name);
        if user.created {
            println!("  {}", "Local account created".yellow());
        }
    } else {
        println!("{} {}", "Rejected".red().bold(), response.message);
    }

    if !response.success {
        bail!("Login failed");
    }
    Ok(())
}
