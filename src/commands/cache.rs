//! Cache command handlers.

use anyhow::Result;
use tracing::info;

use crate::client::EsoArchive;

pub async fn run_cache_clear_command(archive: &EsoArchive) -> Result<()> {
    let removed = archive.clear_cache().await?;
    if removed == 0 {
        info!("cache was already empty");
    } else {
        info!(removed, "cleared cached responses");
    }
    Ok(())
}
