//! CLI entry point for the esoarc tool.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use esoarc_core::cli::{Args, Command};
use esoarc_core::commands::{
    run_cache_clear_command, run_headers_command, run_list_command, run_login_command,
    run_logout_command, run_query_command, run_retrieve_command,
};
use esoarc_core::{ArchiveConfig, EsoArchive};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = ArchiveConfig::from_env();
    let archive = EsoArchive::new(config)?;
    // A persisted, still-valid session lets authenticated commands work
    // without a fresh login.
    archive.restore_session().await;

    match args.command {
        Command::Query { target } => run_query_command(&archive, target).await,
        Command::List { what } => run_list_command(&archive, what).await,
        Command::Headers { datasets, no_cache } => {
            run_headers_command(&archive, datasets, no_cache).await
        }
        Command::Retrieve {
            datasets,
            destination,
            continuation,
            with_calib,
            no_unzip,
            save_xml,
        } => {
            run_retrieve_command(
                &archive,
                datasets,
                destination,
                continuation,
                with_calib,
                no_unzip,
                save_xml,
            )
            .await
        }
        Command::Login {
            username,
            store_password,
        } => run_login_command(&archive, username, store_password).await,
        Command::Logout { forget } => run_logout_command(&archive, forget).await,
        Command::Cache {
            action: esoarc_core::cli::CacheCommand::Clear,
        } => run_cache_clear_command(&archive).await,
    }
}
