//! TAP transport: executes ADQL queries against the archive metadata service.
//!
//! [`TapService`] is the seam the rest of the crate talks through;
//! [`TapClient`] is the HTTP implementation, posting synchronous queries to
//! `{tap}/sync` and parsing the JSON result document.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::table::{Table, TableError};
use crate::user_agent;

/// Errors raised by the TAP transport.
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    /// Network-level failure reaching the service.
    #[error("network error executing TAP query: {source}\n  query: {query}")]
    Network {
        /// The query that was being executed.
        query: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The service rejected the query (bad ADQL, unknown columns, ...).
    #[error("TAP query failed ({status}): {message}\n  query: {query}")]
    QueryFailed {
        /// The offending query.
        query: String,
        /// HTTP status returned by the service.
        status: u16,
        /// Service-reported message, when one was readable.
        message: String,
    },

    /// The result document did not parse as a table.
    #[error("unreadable TAP response for query: {query}")]
    BadResponse {
        /// The query whose response failed to parse.
        query: String,
        /// The parse failure.
        #[source]
        source: TableError,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build TAP HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Executes ADQL queries and returns tables.
///
/// Object-safe so the archive facade can hold `Box<dyn TapService>` and
/// tests can substitute canned responses.
#[async_trait]
pub trait TapService: Send + Sync {
    /// Executes `query`, capping the service-side row count at `maxrec`
    /// when given.
    async fn query(&self, query: &str, maxrec: Option<i64>) -> Result<Table, TapError>;
}

/// HTTP implementation of [`TapService`].
#[derive(Debug, Clone)]
pub struct TapClient {
    client: Client,
    sync_url: String,
}

impl TapClient {
    /// Creates a client for the given synchronous query endpoint
    /// (`{tap}/sync`).
    ///
    /// # Errors
    ///
    /// Returns [`TapError::ClientBuild`] if HTTP client construction fails.
    pub fn new(sync_url: impl Into<String>) -> Result<Self, TapError> {
        Self::with_timeouts(sync_url, CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::ClientBuild`] if HTTP client construction fails.
    pub fn with_timeouts(
        sync_url: impl Into<String>,
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, TapError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(TapError::ClientBuild)?;
        Ok(Self {
            client,
            sync_url: sync_url.into(),
        })
    }
}

#[async_trait]
impl TapService for TapClient {
    async fn query(&self, query: &str, maxrec: Option<i64>) -> Result<Table, TapError> {
        let mut form: Vec<(&str, String)> = vec![
            ("REQUEST", "doQuery".to_string()),
            ("LANG", "ADQL".to_string()),
            ("FORMAT", "json".to_string()),
            ("QUERY", query.to_string()),
        ];
        if let Some(maxrec) = maxrec.filter(|m| *m >= 0) {
            form.push(("MAXREC", maxrec.to_string()));
        }

        debug!(url = %self.sync_url, query, "executing TAP query");
        let response = self
            .client
            .post(&self.sync_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TapError::Network {
                query: query.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .ok()
                .map(|body| service_error_message(&body))
                .unwrap_or_default();
            warn!(status = status.as_u16(), %message, "TAP query rejected");
            return Err(TapError::QueryFailed {
                query: query.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(|e| TapError::Network {
            query: query.to_string(),
            source: e,
        })?;
        Table::from_tap_json(&body).map_err(|e| TapError::BadResponse {
            query: query.to_string(),
            source: e,
        })
    }
}

/// Pulls a short human-readable message out of a service error body.
///
/// Error bodies are either a JSON object with an `error`/`message` field or
/// a VOTable/HTML blob; in the latter case the first non-markup line wins.
fn service_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(message) = json.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('<'))
        .unwrap_or("")
        .chars()
        .take(300)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULT_DOC: &str = r#"{
        "metadata": [{"name": "table_name", "datatype": "char"}],
        "data": [["ist.midi"], ["ist.naco"]]
    }"#;

    #[tokio::test]
    async fn test_query_posts_adql_form_and_parses_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync"))
            .and(body_string_contains("REQUEST=doQuery"))
            .and(body_string_contains("LANG=ADQL"))
            .and(body_string_contains("FORMAT=json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_DOC))
            .mount(&server)
            .await;

        let client = TapClient::new(format!("{}/sync", server.uri())).unwrap();
        let table = client
            .query("select table_name from TAP_SCHEMA.tables", None)
            .await
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.text_column("table_name").unwrap(),
            vec!["ist.midi", "ist.naco"]
        );
    }

    #[tokio::test]
    async fn test_query_forwards_maxrec_when_capped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync"))
            .and(body_string_contains("MAXREC=25"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_DOC))
            .expect(1)
            .mount(&server)
            .await;

        let client = TapClient::new(format!("{}/sync", server.uri())).unwrap();
        let result = client.query("select * from dbo.raw", Some(25)).await;
        assert!(result.is_ok(), "expected Ok, got: {result:?}");
    }

    #[tokio::test]
    async fn test_query_omits_maxrec_when_uncapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync"))
            .and(body_string_contains("MAXREC"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_DOC))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_DOC))
            .mount(&server)
            .await;

        let client = TapClient::new(format!("{}/sync", server.uri())).unwrap();
        let result = client.query("select * from dbo.raw", Some(-1)).await;
        assert!(result.is_ok(), "expected Ok, got: {result:?}");
    }

    #[tokio::test]
    async fn test_rejected_query_carries_service_message_and_query_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error": "Unknown column 'pi_coi'"}"#),
            )
            .mount(&server)
            .await;

        let client = TapClient::new(format!("{}/sync", server.uri())).unwrap();
        let result = client
            .query("select pi_coi from ivoa.ObsCore", None)
            .await;
        match result {
            Err(TapError::QueryFailed {
                query,
                status,
                message,
            }) => {
                assert_eq!(status, 400);
                assert!(message.contains("pi_coi"), "message: {message}");
                assert!(query.contains("ivoa.ObsCore"));
            }
            other => panic!("expected QueryFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_body_is_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<votable/>"))
            .mount(&server)
            .await;

        let client = TapClient::new(format!("{}/sync", server.uri())).unwrap();
        let result = client.query("select * from dbo.raw", None).await;
        assert!(matches!(result, Err(TapError::BadResponse { .. })));
    }

    #[test]
    fn test_service_error_message_from_json() {
        assert_eq!(
            service_error_message(r#"{"error": "boom"}"#),
            "boom".to_string()
        );
        assert_eq!(
            service_error_message(r#"{"message": "bad column"}"#),
            "bad column".to_string()
        );
    }

    #[test]
    fn test_service_error_message_from_markup() {
        let body = "<html>\n<body>\nUnknown table dbo.rawww\n</body>";
        assert_eq!(service_error_message(body), "Unknown table dbo.rawww");
    }
}
