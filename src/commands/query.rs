//! Query and list command handlers.

use anyhow::{Result, bail};
use tracing::info;

use crate::cli::{ListCommand, QueryArgs, QueryCommand};
use crate::client::{EsoArchive, QuerySpec};
use crate::adql::split_column_list;

/// Converts CLI query arguments into a [`QuerySpec`].
///
/// # Errors
///
/// Fails on a `--filter` argument without a `=` separator.
pub(crate) fn spec_from_args(args: &QueryArgs) -> Result<QuerySpec> {
    let mut filters = Vec::with_capacity(args.filters.len());
    for raw in &args.filters {
        let Some((column, predicate)) = raw.split_once('=') else {
            bail!("invalid --filter '{raw}': expected COLUMN=PREDICATE");
        };
        filters.push((column.trim().to_string(), predicate.trim().to_string()));
    }

    Ok(QuerySpec {
        filters,
        columns: args
            .columns
            .as_deref()
            .map(split_column_list)
            .unwrap_or_default(),
        cone_ra: args.cone_ra,
        cone_dec: args.cone_dec,
        cone_radius: args.cone_radius,
        start_time: args.start_time.clone(),
        end_time: args.end_time.clone(),
        order_by: args.order_by.clone(),
        order_desc: args.desc,
        maxrec: args.maxrec,
        cache: !args.no_cache,
        help: args.show_columns,
    })
}

pub async fn run_query_command(archive: &EsoArchive, target: QueryCommand) -> Result<()> {
    let table = match target {
        QueryCommand::Instrument { instruments, query } => {
            let spec = spec_from_args(&query)?;
            archive.query_instrument(&instruments, &spec).await?
        }
        QueryCommand::Collections { collections, query } => {
            let spec = spec_from_args(&query)?;
            archive.query_collections(&collections, &spec).await?
        }
        QueryCommand::Main { query } => {
            let spec = spec_from_args(&query)?;
            archive.query_main(&spec).await?
        }
        QueryCommand::Adql { query, no_cache } => {
            archive.query_tap(&query, !no_cache).await?
        }
    };

    if table.is_empty() {
        info!("query returned no results");
    } else {
        println!("{}", table.render());
        info!(rows = table.len(), "query complete");
    }
    Ok(())
}

pub async fn run_list_command(archive: &EsoArchive, what: ListCommand) -> Result<()> {
    let names = match what {
        ListCommand::Instruments { no_cache } => archive.list_instruments(!no_cache).await?,
        ListCommand::Collections { no_cache } => archive.list_collections(!no_cache).await?,
    };
    for name in &names {
        println!("{name}");
    }
    info!(count = names.len(), "listing complete");
    Ok(())
}
