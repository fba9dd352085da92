//! sync command - run one pass in the foreground

use super::CommandContext;
use crate::utils::print_json;
use anyhow::{bail, Result};
use colored::Colorize;
use ldapsync_core::types::RunStatus;
use ldapsync_sync::RunOutcome;

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let report = match ctx.engine.scheduler().run_now().await? {
        RunOutcome::Finished(report) => report,
        RunOutcome::AlreadyRunning => bail!("A sync pass is already running"),
    };

    if ctx.is_json() {
        print_json(&report)?;
    } else {
        let elapsed = report.finished_at - report.started_at;
        match report.status {
            RunStatus::Completed => println!(
                "{} in {}ms",
                "Sync completed".green().bold(),
                elapsed.num_milliseconds()
            ),
            RunStatus::Error => println!("{}", "Sync failed".red().bold()),
        }
        println!("  Found:       {}", report.stats.total_found);
        println!("  Created:     {}", report.stats.created);
        println!("  Updated:     {}", report.stats.updated);
        println!("  Deactivated: {}", report.stats.deactivated);
        println!("  Errors:      {}", report.stats.errors);
    }

    if let Some(error) = report.error {
        bail!(error);
    }
    Ok(())
}
