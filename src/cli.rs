//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Query and retrieve data products from the ESO science archive.
#[derive(Parser, Debug)]
#[command(name = "esoarc")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Query the archive catalogue
    Query {
        #[command(subcommand)]
        target: QueryCommand,
    },

    /// List queryable instruments or collections
    List {
        #[command(subcommand)]
        what: ListCommand,
    },

    /// Fetch the full FITS headers for dataset ids
    Headers {
        /// Dataset ids to fetch headers for
        #[arg(required = true)]
        datasets: Vec<String>,

        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Download datasets from the archive
    Retrieve {
        /// Dataset ids to retrieve
        #[arg(required = true)]
        datasets: Vec<String>,

        /// Directory to place the files in (defaults to the cache dir)
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Re-download files already present at the destination
        #[arg(long)]
        continuation: bool,

        /// Also retrieve associated calibrations: raw or processed
        #[arg(long, value_name = "SCOPE")]
        with_calib: Option<String>,

        /// Keep compressed products compressed
        #[arg(long)]
        no_unzip: bool,

        /// Save the calibration association trees next to the data
        #[arg(long)]
        save_xml: bool,
    },

    /// Log into the archive user portal
    Login {
        /// Username (falls back to the configured default)
        username: Option<String>,

        /// Store the password in the system keychain after a successful
        /// login
        #[arg(long)]
        store_password: bool,
    },

    /// End the current session
    Logout {
        /// Also remove the stored password from the keychain
        #[arg(long)]
        forget: bool,
    },

    /// Manage the local response cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum QueryCommand {
    /// Query raw data for one or more instruments
    Instrument {
        /// Instrument names (e.g. naco, uves)
        #[arg(required = true)]
        instruments: Vec<String>,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Query processed data for one or more phase-3 collections
    Collections {
        /// Collection names (e.g. VVV, GAIAESO)
        #[arg(required = true)]
        collections: Vec<String>,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Query the whole raw-data table
    Main {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Run a free-form ADQL query
    Adql {
        /// The ADQL query string
        query: String,

        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ListCommand {
    /// List instruments with dedicated raw-data tables
    Instruments {
        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },

    /// List phase-3 collections
    Collections {
        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },
}

/// Shared catalogue query options.
#[derive(clap::Args, Debug, Default)]
pub struct QueryArgs {
    /// Column filter as COLUMN=PREDICATE; repeatable. A predicate starting
    /// with an SQL operator is used verbatim, otherwise equality.
    #[arg(short, long = "filter", value_name = "COL=PRED")]
    pub filters: Vec<String>,

    /// Comma-separated list of columns to return
    #[arg(short, long)]
    pub columns: Option<String>,

    /// Cone search centre right ascension, degrees
    #[arg(long, requires = "cone_dec", requires = "cone_radius")]
    pub cone_ra: Option<f64>,

    /// Cone search centre declination, degrees
    #[arg(long, requires = "cone_ra", requires = "cone_radius")]
    pub cone_dec: Option<f64>,

    /// Cone search radius, degrees
    #[arg(long, requires = "cone_ra", requires = "cone_dec")]
    pub cone_radius: Option<f64>,

    /// Lower exposure-time bound (YYYY-MM-DD hh:mm:ss)
    #[arg(long, value_name = "TIMESTAMP")]
    pub start_time: Option<String>,

    /// Upper exposure-time bound (YYYY-MM-DD hh:mm:ss)
    #[arg(long, value_name = "TIMESTAMP")]
    pub end_time: Option<String>,

    /// Column to order the result by
    #[arg(long)]
    pub order_by: Option<String>,

    /// Order descending instead of ascending
    #[arg(long)]
    pub desc: bool,

    /// Row cap; -1 disables capping (default: configured limit)
    #[arg(short, long, allow_negative_numbers = true)]
    pub maxrec: Option<i64>,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Print the table's queryable columns instead of querying
    #[arg(long)]
    pub show_columns: bool,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Remove all cached query and metadata responses
    Clear,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_query_instrument_parses() {
        let args = Args::try_parse_from([
            "esoarc",
            "query",
            "instrument",
            "naco",
            "--filter",
            "dp_cat=SCIENCE",
            "--maxrec",
            "10",
        ])
        .unwrap();
        match args.command {
            Command::Query {
                target: QueryCommand::Instrument { instruments, query },
            } => {
                assert_eq!(instruments, vec!["naco"]);
                assert_eq!(query.filters, vec!["dp_cat=SCIENCE"]);
                assert_eq!(query.maxrec, Some(10));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_maxrec_accepts_negative_one() {
        let args =
            Args::try_parse_from(["esoarc", "query", "main", "--maxrec", "-1"]).unwrap();
        match args.command {
            Command::Query {
                target: QueryCommand::Main { query },
            } => assert_eq!(query.maxrec, Some(-1)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_cone_requires_all_three() {
        let result = Args::try_parse_from([
            "esoarc",
            "query",
            "main",
            "--cone-ra",
            "150.0",
        ]);
        assert!(result.is_err());

        let args = Args::try_parse_from([
            "esoarc",
            "query",
            "main",
            "--cone-ra",
            "150.0",
            "--cone-dec",
            "2.2",
            "--cone-radius",
            "0.1",
        ])
        .unwrap();
        match args.command {
            Command::Query {
                target: QueryCommand::Main { query },
            } => {
                assert_eq!(query.cone_ra, Some(150.0));
                assert_eq!(query.cone_dec, Some(2.2));
                assert_eq!(query.cone_radius, Some(0.1));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_retrieve_flags() {
        let args = Args::try_parse_from([
            "esoarc",
            "retrieve",
            "ADP.2021-07-16T10:21:46.394",
            "--continuation",
            "--with-calib",
            "raw",
            "--no-unzip",
        ])
        .unwrap();
        match args.command {
            Command::Retrieve {
                datasets,
                continuation,
                with_calib,
                no_unzip,
                ..
            } => {
                assert_eq!(datasets, vec!["ADP.2021-07-16T10:21:46.394"]);
                assert!(continuation);
                assert_eq!(with_calib.as_deref(), Some("raw"));
                assert!(no_unzip);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_retrieve_requires_datasets() {
        let result = Args::try_parse_from(["esoarc", "retrieve"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_login_and_logout() {
        let args =
            Args::try_parse_from(["esoarc", "login", "kimble", "--store-password"]).unwrap();
        match args.command {
            Command::Login {
                username,
                store_password,
            } => {
                assert_eq!(username.as_deref(), Some("kimble"));
                assert!(store_password);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let args = Args::try_parse_from(["esoarc", "logout", "--forget"]).unwrap();
        assert!(matches!(args.command, Command::Logout { forget: true }));
    }

    #[test]
    fn test_cli_cache_clear() {
        let args = Args::try_parse_from(["esoarc", "cache", "clear"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Cache {
                action: CacheCommand::Clear
            }
        ));
    }

    #[test]
    fn test_cli_adql_query() {
        let args = Args::try_parse_from([
            "esoarc",
            "query",
            "adql",
            "select * from ivoa.ObsCore",
            "--no-cache",
        ])
        .unwrap();
        match args.command {
            Command::Query {
                target: QueryCommand::Adql { query, no_cache },
            } => {
                assert_eq!(query, "select * from ivoa.ObsCore");
                assert!(no_cache);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_verbose_flag_is_global() {
        let args = Args::try_parse_from(["esoarc", "cache", "clear", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["esoarc", "--help"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
