//! Archive client facade.
//!
//! [`EsoArchive`] ties the subsystems together: cache-aware TAP queries,
//! instrument/collection catalogue queries, FITS header retrieval, APEX
//! quicklook listings, the SSO session, and dataset retrieval.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::adql::{QueryBuildError, QueryBuilder, reject_legacy_keys, sanitize_value};
use crate::auth::{AuthError, AuthSession, CredentialError, CredentialStore};
use crate::cache::{CacheError, ResponseCache};
use crate::config::{ArchiveConfig, ConfigError};
use crate::retrieve::{
    RetrievalEngine, RetrievalOptions, RetrievalOutcome, RetrieveError,
};
use crate::table::{
    Column, LEAD_COLUMNS_PHASE3, LEAD_COLUMNS_RAW, Table, TableError, Value,
};
use crate::tap::{TapClient, TapError, TapService};
use crate::user_agent;

/// A catalogue query target: the service table plus the column the primary
/// filter applies to.
#[derive(Debug, Clone, Copy)]
pub struct QueryTarget {
    /// Fully qualified service table name.
    pub table_name: &'static str,
    /// Column the primary filter constrains.
    pub column_name: &'static str,
}

/// Raw (instrument) data lives in `dbo.raw`.
pub const QUERY_ON_INSTRUMENT: QueryTarget = QueryTarget {
    table_name: "dbo.raw",
    column_name: "instrument",
};

/// Processed (phase-3) data lives in `ivoa.ObsCore`.
pub const QUERY_ON_COLLECTION: QueryTarget = QueryTarget {
    table_name: "ivoa.ObsCore",
    column_name: "obs_collection",
};

/// Errors surfaced by the archive facade.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Query construction failed validation.
    #[error(transparent)]
    QueryBuild(#[from] QueryBuildError),

    /// The TAP service rejected or failed the query.
    #[error(transparent)]
    Tap(#[from] TapError),

    /// Tabular result handling failed.
    #[error(transparent)]
    Table(#[from] TableError),

    /// Response cache I/O failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The system credential store failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Dataset retrieval failed.
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),

    /// A plain HTTP request failed.
    #[error("request to {url} failed: {source}")]
    Http {
        /// The URL involved.
        url: String,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The header endpoint returned no header block for a dataset.
    #[error("no header found for dataset '{dataset}'")]
    HeaderNotFound {
        /// The dataset id without a header.
        dataset: String,
    },

    /// No password given and none stored for the user.
    #[error("no password available for '{username}'; pass one or store it first")]
    PasswordRequired {
        /// The username lacking a password.
        username: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build archive HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Parameters shared by the catalogue query operations.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Column filters: `(column, predicate)`. A predicate starting with an
    /// SQL operator is used verbatim; anything else is an equality match.
    pub filters: Vec<(String, String)>,
    /// Columns to return; empty selects all.
    pub columns: Vec<String>,
    /// Cone search centre right ascension, degrees.
    pub cone_ra: Option<f64>,
    /// Cone search centre declination, degrees.
    pub cone_dec: Option<f64>,
    /// Cone search radius, degrees.
    pub cone_radius: Option<f64>,
    /// Lower exposure-time bound, `YYYY-MM-DD hh:mm:ss`.
    pub start_time: Option<String>,
    /// Upper exposure-time bound, `YYYY-MM-DD hh:mm:ss`.
    pub end_time: Option<String>,
    /// Column to order by.
    pub order_by: Option<String>,
    /// Order descending instead of ascending.
    pub order_desc: bool,
    /// Row cap override; `-1` disables capping, `None` uses the configured
    /// limit.
    pub maxrec: Option<i64>,
    /// Whether the response cache may serve and store this query.
    pub cache: bool,
    /// Return the table's column schema instead of querying.
    pub help: bool,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            columns: Vec::new(),
            cone_ra: None,
            cone_dec: None,
            cone_radius: None,
            start_time: None,
            end_time: None,
            order_by: None,
            order_desc: false,
            maxrec: None,
            cache: true,
            help: false,
        }
    }
}

/// SQL operators accepted at the start of a filter predicate.
const PREDICATE_PREFIXES: &[&str] = &[
    "<", ">", "=", "!=", "like ", "not ", "in ", "between ", "is ",
];

/// Renders one column filter as an ADQL constraint.
fn render_filter(column: &str, predicate: &str) -> String {
    let trimmed = predicate.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if PREDICATE_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        format!("{column} {trimmed}")
    } else {
        format!("{column} = {}", sanitize_value(trimmed))
    }
}

/// Client for the science archive.
pub struct EsoArchive {
    config: ArchiveConfig,
    tap: Box<dyn TapService>,
    cache: ResponseCache,
    session: AuthSession,
    credentials: CredentialStore,
    engine: RetrievalEngine,
    http: Client,
    instruments: RwLock<Option<Vec<String>>>,
    collections: RwLock<Option<Vec<String>>>,
}

impl std::fmt::Debug for EsoArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsoArchive")
            .field("tap_url", &self.config.tap_url)
            .field("cache_dir", &self.cache.dir())
            .finish_non_exhaustive()
    }
}

impl EsoArchive {
    /// Creates a client from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when the cache directory cannot be resolved
    /// or an HTTP client fails to build.
    pub fn new(config: ArchiveConfig) -> Result<Self, ArchiveError> {
        let cache_dir = config.resolve_cache_dir()?;
        let cache = ResponseCache::new(&cache_dir);
        let tap = TapClient::with_timeouts(
            config.tap_sync_url(),
            config.connect_timeout_secs,
            config.read_timeout_secs,
        )?;
        let session = AuthSession::new(&config.auth_url)?;
        let service_host = url::Url::parse(&config.auth_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "archive".to_string());
        let credentials = CredentialStore::new(&service_host);
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(config.read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(ArchiveError::ClientBuild)?;
        let engine = RetrievalEngine::new(
            http.clone(),
            config.download_url.clone(),
            config.calselector_url.clone(),
            &cache_dir,
        );

        Ok(Self {
            config,
            tap: Box::new(tap),
            cache,
            session,
            credentials,
            engine,
            http,
            instruments: RwLock::new(None),
            collections: RwLock::new(None),
        })
    }

    /// Replaces the TAP transport (test seam).
    #[must_use]
    pub fn with_tap(mut self, tap: Box<dyn TapService>) -> Self {
        self.tap = tap;
        self
    }

    /// Disables session persistence at rest (test environments).
    #[must_use]
    pub fn without_session_persistence(mut self) -> Self {
        self.session = match AuthSession::new(&self.config.auth_url) {
            Ok(session) => session.with_persistence(false),
            Err(_) => return self,
        };
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    // ---------------------------------------------------------------- query

    /// Executes a raw ADQL query.
    ///
    /// An empty result is returned as an empty table with a warning logged,
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] on transport or service failures.
    #[instrument(skip(self))]
    pub async fn query_tap(&self, query: &str, cache: bool) -> Result<Table, ArchiveError> {
        self.run_query(query, cache, None).await
    }

    /// Lists the instrument-specific tables offered by the archive.
    ///
    /// The list is memoized for the lifetime of the client.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] on transport or service failures.
    pub async fn list_instruments(&self, cache: bool) -> Result<Vec<String>, ArchiveError> {
        if let Some(instruments) = self.instruments.read().await.clone() {
            return Ok(instruments);
        }
        let query = "select table_name from TAP_SCHEMA.tables \
                     where schema_name='ist' order by table_name";
        let table = self.run_query(query, cache, None).await?;
        let instruments: Vec<String> = table
            .text_column("table_name")?
            .into_iter()
            .map(|name| {
                name.split_once('.')
                    .map_or(name.clone(), |(_, instrument)| instrument.to_string())
            })
            .collect();
        *self.instruments.write().await = Some(instruments.clone());
        Ok(instruments)
    }

    /// Lists the phase-3 collections available in the archive.
    ///
    /// The list is memoized for the lifetime of the client.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] on transport or service failures.
    pub async fn list_collections(&self, cache: bool) -> Result<Vec<String>, ArchiveError> {
        if let Some(collections) = self.collections.read().await.clone() {
            return Ok(collections);
        }
        let query = format!(
            "select distinct {} from {}",
            QUERY_ON_COLLECTION.column_name, QUERY_ON_COLLECTION.table_name
        );
        let table = self.run_query(&query, cache, None).await?;
        let collections = table.text_column(QUERY_ON_COLLECTION.column_name)?;
        *self.collections.write().await = Some(collections.clone());
        Ok(collections)
    }

    /// Queries raw data for one or more instruments.
    ///
    /// With `spec.help` set, returns the queryable column schema instead.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] on validation, transport, or service
    /// failures.
    #[instrument(skip(self, spec))]
    pub async fn query_instrument(
        &self,
        instruments: &[String],
        spec: &QuerySpec,
    ) -> Result<Table, ArchiveError> {
        self.query_target(QUERY_ON_INSTRUMENT, instruments, spec, LEAD_COLUMNS_RAW)
            .await
    }

    /// Queries processed (phase-3) data for one or more collections.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] on validation, transport, or service
    /// failures.
    #[instrument(skip(self, spec))]
    pub async fn query_collections(
        &self,
        collections: &[String],
        spec: &QuerySpec,
    ) -> Result<Table, ArchiveError> {
        self.query_target(QUERY_ON_COLLECTION, collections, spec, LEAD_COLUMNS_PHASE3)
            .await
    }

    /// Queries the whole raw-data table without an instrument filter.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] on validation, transport, or service
    /// failures.
    #[instrument(skip(self, spec))]
    pub async fn query_main(&self, spec: &QuerySpec) -> Result<Table, ArchiveError> {
        self.query_target(QUERY_ON_INSTRUMENT, &[], spec, LEAD_COLUMNS_RAW)
            .await
    }

    async fn query_target(
        &self,
        target: QueryTarget,
        primary: &[String],
        spec: &QuerySpec,
        lead_columns: &[&str],
    ) -> Result<Table, ArchiveError> {
        if spec.help {
            return self.column_schema(target.table_name, spec.cache).await;
        }
        reject_legacy_keys(spec.filters.iter().map(|(key, _)| key.as_str()))?;

        let mut builder = QueryBuilder::new(target.table_name)
            .columns(&spec.columns)
            .cone(spec.cone_ra, spec.cone_dec, spec.cone_radius)
            .time_interval(spec.start_time.clone(), spec.end_time.clone());
        if !primary.is_empty() {
            let quoted: Vec<String> = primary
                .iter()
                .map(|name| format!("'{}'", name.trim()))
                .collect();
            builder = builder.constraint(format!(
                "{} in ({})",
                target.column_name,
                quoted.join(", ")
            ));
        }
        for (column, predicate) in &spec.filters {
            builder = builder.constraint(render_filter(column, predicate));
        }
        if let Some(order_by) = &spec.order_by {
            builder = builder.order_by(order_by.clone(), spec.order_desc);
        }
        let cap = self.effective_cap(spec);
        if let Some(cap) = cap {
            builder = builder.top(cap);
        }

        let query = builder.build()?;
        let mut table = self.run_query(&query, spec.cache, cap).await?;
        if let Some(cap) = cap {
            // The service honors `top`, but an over-returning service must
            // not leak past the requested cap.
            table.truncate(cap.max(0) as usize);
        }
        table.reorder_leading(lead_columns);
        Ok(table)
    }

    /// The queryable columns of a service table (name + datatype).
    async fn column_schema(&self, table_name: &str, cache: bool) -> Result<Table, ArchiveError> {
        let query = format!(
            "select column_name, datatype from TAP_SCHEMA.columns \
             where table_name = '{table_name}'"
        );
        let schema = self.run_query(&query, cache, None).await?;
        info!(table = table_name, "columns accepted in filters:\n{}", schema.render());
        Ok(schema)
    }

    fn effective_cap(&self, spec: &QuerySpec) -> Option<i64> {
        let cap = spec.maxrec.unwrap_or(self.config.row_limit);
        (cap >= 0).then_some(cap)
    }

    async fn run_query(
        &self,
        query: &str,
        use_cache: bool,
        maxrec: Option<i64>,
    ) -> Result<Table, ArchiveError> {
        let fingerprint = ResponseCache::fingerprint(&self.config.tap_sync_url(), query);
        if use_cache && let Some(table) = self.cache.get(&fingerprint) {
            debug!(query, "serving query from cache");
            return Ok(table);
        }

        let table = self.tap.query(query, maxrec).await?;
        if use_cache && let Err(error) = self.cache.put(&fingerprint, &table) {
            // A failing cache write degrades to uncached operation.
            warn!(%error, "failed to cache query response");
        }
        if table.is_empty() {
            warn!(query, "query returned no results");
        }
        Ok(table)
    }

    // -------------------------------------------------------------- headers

    /// Retrieves the full FITS headers for the given dataset ids, one row
    /// per id. The leading `DP.ID` column carries the requested id.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::HeaderNotFound`] when an id yields no header
    /// block, or transport errors.
    #[instrument(skip(self, dataset_ids), fields(count = dataset_ids.len()))]
    pub async fn get_headers(
        &self,
        dataset_ids: &[String],
        cache: bool,
    ) -> Result<Table, ArchiveError> {
        let fingerprint =
            ResponseCache::fingerprint(&self.config.hdr_url, &dataset_ids.join("\n"));
        if cache && let Some(table) = self.cache.get(&fingerprint) {
            return Ok(table);
        }

        let mut records = Vec::with_capacity(dataset_ids.len());
        for dataset in dataset_ids {
            let url = self.config.header_url(dataset);
            debug!(%url, "fetching FITS header");
            let response =
                self.http.get(&url).send().await.map_err(|e| ArchiveError::Http {
                    url: url.clone(),
                    source: e,
                })?;
            let body = response.text().await.map_err(|e| ArchiveError::Http {
                url: url.clone(),
                source: e,
            })?;
            let block = header_block(&body).ok_or_else(|| ArchiveError::HeaderNotFound {
                dataset: dataset.clone(),
            })?;
            let mut record = vec![("DP.ID".to_string(), Value::Text(dataset.clone()))];
            record.extend(parse_header_cards(&block));
            records.push(record);
        }

        let table = Table::from_records(&records);
        if cache && let Err(error) = self.cache.put(&fingerprint, &table) {
            warn!(%error, "failed to cache header response");
        }
        Ok(table)
    }

    // ----------------------------------------------------------------- apex

    /// Queries APEX quicklook products by project id and free-form filters.
    ///
    /// The listing endpoint answers CSV with a throwaway first line.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] on transport failures or an unreadable
    /// listing.
    #[instrument(skip(self, extra_filters))]
    pub async fn query_apex_quicklooks(
        &self,
        project_id: Option<&str>,
        extra_filters: &[(String, String)],
        cache: bool,
    ) -> Result<Table, ArchiveError> {
        let mut form: Vec<(String, String)> =
            vec![("wdbo".to_string(), "csv/download".to_string())];
        if let Some(project_id) = project_id {
            form.push(("prog_id".to_string(), project_id.to_string()));
        }
        form.extend(extra_filters.iter().cloned());

        let form_fingerprint: Vec<String> =
            form.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let fingerprint =
            ResponseCache::fingerprint(&self.config.apex_url, &form_fingerprint.join("&"));
        if cache && let Some(table) = self.cache.get(&fingerprint) {
            return Ok(table);
        }

        let response = self
            .http
            .post(&self.config.apex_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ArchiveError::Http {
                url: self.config.apex_url.clone(),
                source: e,
            })?;
        let body = response.text().await.map_err(|e| ArchiveError::Http {
            url: self.config.apex_url.clone(),
            source: e,
        })?;

        // The first line of the listing is boilerplate, not CSV.
        let csv_part = body.split_once('\n').map_or("", |(_, rest)| rest);
        let table = parse_csv_listing(csv_part)?;
        if table.is_empty() {
            warn!("quicklook query returned no results");
        }
        if cache && let Err(error) = self.cache.put(&fingerprint, &table) {
            warn!(%error, "failed to cache quicklook listing");
        }
        Ok(table)
    }

    // ---------------------------------------------------------------- cache

    /// Removes every cached query and metadata response, and forgets the
    /// memoized instrument/collection lists.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Cache`] when an entry cannot be deleted.
    pub async fn clear_cache(&self) -> Result<usize, ArchiveError> {
        *self.instruments.write().await = None;
        *self.collections.write().await = None;
        Ok(self.cache.clear()?)
    }

    // ----------------------------------------------------------------- auth

    /// Restores a persisted, still-valid session token if one exists.
    pub async fn restore_session(&self) -> bool {
        self.session.restore().await
    }

    /// Logs into the archive.
    ///
    /// The username falls back to the configured default; the password
    /// falls back to the credential store. With `store_password`, the
    /// password is persisted, and only after the service accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Auth`] for rejected credentials,
    /// [`ArchiveError::PasswordRequired`] when no password is available.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        store_password: bool,
    ) -> Result<(), ArchiveError> {
        let username = username
            .map(str::to_string)
            .or_else(|| self.config.username.clone())
            .ok_or(AuthError::NoUsername)?;

        let stored;
        let password = match password {
            Some(password) => password,
            None => {
                stored = self.credentials.lookup(&username)?;
                stored.as_deref().ok_or_else(|| ArchiveError::PasswordRequired {
                    username: username.clone(),
                })?
            }
        };

        self.session.login(&username, password).await?;
        if store_password {
            // Reached only on success: rejected credentials never persist.
            self.credentials.store(&username, password)?;
            info!(username = %username, "stored credential");
        }
        Ok(())
    }

    /// Ends the session. With `forget_credential`, the stored password is
    /// removed as well.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Credential`] when the stored password cannot
    /// be removed.
    pub async fn logout(&self, forget_credential: bool) -> Result<(), ArchiveError> {
        let username = self.session.username().await;
        self.session.logout().await;
        if forget_credential && let Some(username) = username {
            self.credentials.delete(&username)?;
            info!(username = %username, "removed stored credential");
        }
        Ok(())
    }

    /// Whether an authenticated session is active.
    pub async fn authenticated(&self) -> bool {
        self.session.logged_in().await
    }

    // ------------------------------------------------------------- retrieve

    /// Retrieves datasets from the dataportal. See
    /// [`RetrievalEngine::retrieve`] for the per-file semantics.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Retrieve`] when the destination is unusable.
    #[instrument(skip(self, datasets, options), fields(count = datasets.len()))]
    pub async fn retrieve_datasets(
        &self,
        datasets: &[String],
        options: &RetrievalOptions,
    ) -> Result<RetrievalOutcome, ArchiveError> {
        let auth_header = self.session.auth_header().await;
        if auth_header.is_none() {
            debug!("no authenticated session; retrieving anonymously");
        }
        Ok(self.engine.retrieve(datasets, options, auth_header).await?)
    }

    /// Parses a calibration scope argument (`raw`/`processed`).
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Retrieve`] for any other spelling.
    pub fn parse_calib_scope(value: &str) -> Result<crate::retrieve::CalibScope, ArchiveError> {
        Ok(crate::retrieve::CalibScope::from_str(value)?)
    }
}

/// Extracts the text of the `<pre>` block carrying the header cards.
fn header_block(html: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<pre[^>]*>(.*?)</pre>").unwrap_or_else(|_| unreachable!())
    });
    let inner = pattern.captures(html)?.get(1)?.as_str();
    Some(
        inner
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

/// Parses FITS header cards (`KEY = value / comment`) into typed values.
///
/// `COMMENT`/`HISTORY` cards are dropped, parsing stops at `END`, `T`/`F`
/// logicals become booleans, quoted strings lose their quotes, and numeric
/// values become floats or integers.
fn parse_header_cards(block: &str) -> Vec<(String, Value)> {
    let mut cards = Vec::new();
    for line in block.lines() {
        if line.starts_with("END") {
            break;
        }
        let Some((key, rest)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.starts_with("COMMENT") || key.starts_with("HISTORY") || key.is_empty() {
            continue;
        }
        let value_text = rest.split('/').next().unwrap_or("").trim();
        cards.push((key.to_string(), parse_card_value(value_text)));
    }
    cards
}

fn parse_card_value(text: &str) -> Value {
    match text {
        "T" => Value::Bool(true),
        "F" => Value::Bool(false),
        _ if text.starts_with('\'') => {
            Value::Text(text.trim_matches('\'').trim().to_string())
        }
        _ if text.contains('.') => text
            .parse::<f64>()
            .map_or_else(|_| Value::Text(text.to_string()), Value::Float),
        _ => text
            .parse::<i64>()
            .map_or_else(|_| Value::Text(text.to_string()), Value::Integer),
    }
}

/// Parses a headed CSV listing into a table, inferring cell types.
fn parse_csv_listing(csv_text: &str) -> Result<Table, ArchiveError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let columns: Vec<Column> = reader
        .headers()
        .map_err(|e| {
            ArchiveError::Table(TableError::Malformed {
                reason: e.to_string(),
            })
        })?
        .iter()
        .map(|name| Column::named(name.trim()))
        .collect();

    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record.map_err(|e| {
            ArchiveError::Table(TableError::Malformed {
                reason: e.to_string(),
            })
        })?;
        let mut row: Vec<Value> = record
            .iter()
            .map(|cell| {
                let cell = cell.trim();
                if cell.is_empty() {
                    Value::Null
                } else if let Ok(integer) = cell.parse::<i64>() {
                    Value::Integer(integer)
                } else if let Ok(float) = cell.parse::<f64>() {
                    Value::Float(float)
                } else {
                    Value::Text(cell.to_string())
                }
            })
            .collect();
        // Flexible CSV rows are padded or trimmed to the header width.
        row.resize(table.columns().len(), Value::Null);
        table.push_row(row)?;
    }
    Ok(table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_render_filter_equality_sanitizes() {
        assert_eq!(
            render_filter("dp_cat", "SCIENCE"),
            "dp_cat = 'SCIENCE'"
        );
        assert_eq!(render_filter("exptime", "300"), "exptime = 300");
    }

    #[test]
    fn test_render_filter_passes_predicates_through() {
        assert_eq!(render_filter("exptime", "< 60"), "exptime < 60");
        assert_eq!(
            render_filter("object", "like '%Orion%'"),
            "object like '%Orion%'"
        );
        assert_eq!(
            render_filter("exptime", "between 60 and 300"),
            "exptime between 60 and 300"
        );
    }

    #[test]
    fn test_header_block_extraction() {
        let html = "<html><body><PRE>SIMPLE  = T\nEND\n</PRE></body></html>";
        let block = header_block(html).unwrap();
        assert!(block.contains("SIMPLE"));
        assert!(header_block("<html>no header</html>").is_none());
    }

    #[test]
    fn test_parse_header_cards_types() {
        let block = "SIMPLE  =                    T / conforms to FITS\n\
                     BITPIX  =                   16\n\
                     EXPTIME =               12.345 / exposure\n\
                     OBJECT  = 'HD 209458'          / target\n\
                     EXTEND  =                    F\n\
                     COMMENT this line is dropped\n\
                     END\n\
                     IGNORED = 'after end'";
        let cards = parse_header_cards(block);
        let lookup: std::collections::HashMap<_, _> = cards.into_iter().collect();
        assert_eq!(lookup["SIMPLE"], Value::Bool(true));
        assert_eq!(lookup["EXTEND"], Value::Bool(false));
        assert_eq!(lookup["BITPIX"], Value::Integer(16));
        assert_eq!(lookup["EXPTIME"], Value::Float(12.345));
        assert_eq!(lookup["OBJECT"], Value::Text("HD 209458".to_string()));
        assert!(!lookup.contains_key("IGNORED"));
        assert!(!lookup.keys().any(|k| k.starts_with("COMMENT")));
    }

    #[test]
    fn test_parse_csv_listing_types_cells() {
        let csv_text = "Project ID,Product ID,Exposure\n\
                        093.C-0144,QL.APEX.2014-05-01,30\n\
                        093.C-0144,QL.APEX.2014-05-02,12.5\n";
        let table = parse_csv_listing(csv_text).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.column_names(),
            vec!["Project ID", "Product ID", "Exposure"]
        );
        assert_eq!(table.rows()[0][2], Value::Integer(30));
        assert_eq!(table.rows()[1][2], Value::Float(12.5));
    }

    #[test]
    fn test_parse_csv_listing_pads_short_rows() {
        let csv_text = "a,b,c\n1,2\n";
        let table = parse_csv_listing(csv_text).unwrap();
        assert_eq!(table.rows()[0][2], Value::Null);
    }

    #[test]
    fn test_parse_calib_scope_rejects_unknown() {
        assert!(EsoArchive::parse_calib_scope("raw").is_ok());
        assert!(EsoArchive::parse_calib_scope("processed").is_ok());
        assert!(EsoArchive::parse_calib_scope("master").is_err());
    }
}
