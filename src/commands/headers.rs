//! Headers command handler.

use anyhow::Result;
use tracing::info;

use crate::client::EsoArchive;

pub async fn run_headers_command(
    archive: &EsoArchive,
    datasets: Vec<String>,
    no_cache: bool,
) -> Result<()> {
    let table = archive.get_headers(&datasets, !no_cache).await?;
    println!("{}", table.render());
    info!(
        rows = table.len(),
        keywords = table.columns().len(),
        "headers fetched"
    );
    Ok(())
}
