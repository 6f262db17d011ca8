//! Retrieve command handler.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::client::EsoArchive;
use crate::retrieve::RetrievalOptions;

#[allow(clippy::fn_params_excessive_bools)]
pub async fn run_retrieve_command(
    archive: &EsoArchive,
    datasets: Vec<String>,
    destination: Option<PathBuf>,
    continuation: bool,
    with_calib: Option<String>,
    no_unzip: bool,
    save_xml: bool,
) -> Result<()> {
    let with_calib = with_calib
        .as_deref()
        .map(EsoArchive::parse_calib_scope)
        .transpose()?;

    let options = RetrievalOptions {
        destination,
        continuation,
        with_calib,
        unzip: !no_unzip,
        save_xml,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("retrieving {} dataset(s)", datasets.len()));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = archive.retrieve_datasets(&datasets, &options).await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    for file in &outcome.files {
        println!("{}", file.display());
    }
    info!(
        downloaded = outcome.downloaded,
        skipped = outcome.skipped,
        failed = outcome.failed,
        "retrieval finished"
    );
    if outcome.failed > 0 {
        anyhow::bail!("{} dataset(s) could not be retrieved", outcome.failed);
    }
    Ok(())
}
