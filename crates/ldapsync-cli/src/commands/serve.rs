//! serve command - run the background scheduler

use super::CommandContext;
use anyhow::Result;
use tracing::info;

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let scheduler = ctx.engine.scheduler();
    let handle = scheduler.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    scheduler.stop();
    handle.await?;

    Ok(())
}
