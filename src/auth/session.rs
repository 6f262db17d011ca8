//! Single-sign-on session management.
//!
//! [`AuthSession`] performs the password grant against the SSO token
//! endpoint, hands out bearer headers for authenticated requests, and
//! re-authenticates transparently when the token has expired and the
//! password is still in memory.

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::storage::{self, StoredSession};
use super::token::{AuthInfo, TokenError};
use crate::config::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::user_agent;

/// Errors raised by session management.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The service rejected the credentials.
    #[error("authentication failed for '{username}' (HTTP {status})")]
    LoginFailed {
        /// The username that failed to authenticate.
        username: String,
        /// HTTP status returned by the token endpoint.
        status: u16,
    },

    /// No username was passed and none is configured.
    #[error("no username given; pass one explicitly or configure a default")]
    NoUsername,

    /// Network-level failure reaching the token endpoint.
    #[error("network error reaching the authentication service: {0}")]
    Network(#[source] reqwest::Error),

    /// The token endpoint answered 200 with an unreadable body.
    #[error("unreadable token response from the authentication service")]
    BadTokenResponse,

    /// The issued token could not be decoded.
    #[error("unusable token issued by the authentication service: {0}")]
    Token(#[from] TokenError),

    /// The HTTP client could not be constructed.
    #[error("failed to build auth HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
}

/// An SSO session against the archive's token endpoint.
#[derive(Debug)]
pub struct AuthSession {
    client: Client,
    auth_url: String,
    persist: bool,
    info: RwLock<Option<AuthInfo>>,
}

impl AuthSession {
    /// Creates a session for the given token endpoint. Token persistence
    /// at rest is enabled by default.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ClientBuild`] if HTTP client construction
    /// fails.
    pub fn new(auth_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(READ_TIMEOUT_SECS))
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(AuthError::ClientBuild)?;
        Ok(Self {
            client,
            auth_url: auth_url.into(),
            persist: true,
            info: RwLock::new(None),
        })
    }

    /// Enables or disables persisting the token at rest.
    #[must_use]
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Restores a previously persisted, still-valid session token.
    ///
    /// Returns `true` when a usable token was restored. Failures read as
    /// "no session" rather than errors: a broken session file only means
    /// the user has to log in again.
    pub async fn restore(&self) -> bool {
        let stored = match storage::load_persisted_session() {
            Ok(Some(stored)) => stored,
            Ok(None) => return false,
            Err(error) => {
                debug!(%error, "ignoring unreadable persisted session");
                return false;
            }
        };
        match AuthInfo::new(stored.username.clone(), None, stored.token) {
            Ok(info) if !info.expired() => {
                info!(username = %stored.username, "restored archive session");
                *self.info.write().await = Some(info);
                true
            }
            Ok(_) => {
                debug!("persisted session token has expired");
                false
            }
            Err(error) => {
                debug!(%error, "persisted session token is unusable");
                false
            }
        }
    }

    /// Authenticates `username` with the SSO provider.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::LoginFailed`] on rejected credentials, or
    /// transport/decoding errors.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        info!(username, url = %self.auth_url, "authenticating with the archive");
        let info = self.authenticate(username, password).await?;
        self.install(info).await;
        info!("authentication successful");
        Ok(())
    }

    /// Returns the `Authorization` header value for the current session,
    /// re-authenticating first when the token has expired and the password
    /// is still held. `None` when there is no usable session.
    pub async fn auth_header(&self) -> Option<String> {
        {
            let guard = self.info.read().await;
            match guard.as_ref() {
                Some(info) if !info.expired() => {
                    return Some(format!("Bearer {}", info.token));
                }
                Some(_) | None => {}
            }
        }

        // Token missing or expired: try a transparent re-authentication.
        let (username, password) = {
            let guard = self.info.read().await;
            match guard.as_ref() {
                Some(info) if info.expired() => {
                    let password = info.password.clone()?;
                    (info.username.clone(), password)
                }
                _ => return None,
            }
        };

        info!("authentication token has expired, re-authenticating");
        match self.authenticate(&username, &password).await {
            Ok(info) => {
                let header = format!("Bearer {}", info.token);
                self.install(info).await;
                Some(header)
            }
            Err(error) => {
                warn!(%error, "re-authentication failed");
                None
            }
        }
    }

    /// Whether a usable session is present.
    pub async fn logged_in(&self) -> bool {
        self.info
            .read()
            .await
            .as_ref()
            .is_some_and(|info| !info.expired())
    }

    /// Username of the current session, if any.
    pub async fn username(&self) -> Option<String> {
        self.info.read().await.as_ref().map(|i| i.username.clone())
    }

    /// Drops the in-memory session and any persisted token.
    pub async fn logout(&self) {
        *self.info.write().await = None;
        if !self.persist {
            return;
        }
        match storage::clear_persisted_session() {
            Ok(true) => info!("removed persisted session"),
            Ok(false) => {}
            Err(error) => warn!(%error, "failed to remove persisted session"),
        }
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthInfo, AuthError> {
        let params = [
            ("response_type", "id_token token"),
            ("grant_type", "password"),
            ("client_id", "clientid"),
            ("client_secret", "clientSecret"),
            ("username", username),
            ("password", password),
        ];
        let response = self
            .client
            .get(&self.auth_url)
            .query(&params)
            .send()
            .await
            .map_err(AuthError::Network)?;

        let status = response.status();
        if !status.is_success() {
            warn!(username, status = status.as_u16(), "authentication failed");
            return Err(AuthError::LoginFailed {
                username: username.to_string(),
                status: status.as_u16(),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|_| AuthError::BadTokenResponse)?;
        Ok(AuthInfo::new(
            username,
            Some(password.to_string()),
            body.id_token,
        )?)
    }

    async fn install(&self, info: AuthInfo) {
        if self.persist {
            let stored = StoredSession {
                username: info.username.clone(),
                token: info.token.clone(),
            };
            if let Err(error) = storage::store_persisted_session(&stored) {
                warn!(%error, "could not persist session token");
            }
        }
        *self.info.write().await = Some(info);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::token::fake_jwt;

    fn epoch_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    async fn session_for(server: &MockServer) -> AuthSession {
        AuthSession::new(format!("{}/sso/oidc/token", server.uri()))
            .unwrap()
            .with_persistence(false)
    }

    #[tokio::test]
    async fn test_login_success_installs_bearer_token() {
        let server = MockServer::start().await;
        let token = fake_jwt(epoch_now() + 3600);
        Mock::given(method("GET"))
            .and(path("/sso/oidc/token"))
            .and(query_param("grant_type", "password"))
            .and(query_param("username", "kimble"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"id_token": "{token}"}}"#)),
            )
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        session.login("kimble", "hunter2").await.unwrap();

        assert!(session.logged_in().await);
        assert_eq!(session.username().await.as_deref(), Some("kimble"));
        let header = session.auth_header().await.unwrap();
        assert_eq!(header, format!("Bearer {token}"));
    }

    #[tokio::test]
    async fn test_login_failure_reports_status_and_leaves_no_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sso/oidc/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        let result = session.login("kimble", "wrong").await;
        match result {
            Err(AuthError::LoginFailed { username, status }) => {
                assert_eq!(username, "kimble");
                assert_eq!(status, 401);
            }
            other => panic!("expected LoginFailed, got: {other:?}"),
        }
        assert!(!session.logged_in().await);
        assert!(session.auth_header().await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_token_body_is_bad_token_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sso/oidc/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        let result = session.login("kimble", "hunter2").await;
        assert!(matches!(result, Err(AuthError::BadTokenResponse)));
    }

    #[tokio::test]
    async fn test_expired_token_triggers_reauthentication() {
        let server = MockServer::start().await;
        // First login yields an already-stale token, the retry a fresh one.
        let stale = fake_jwt(epoch_now());
        let fresh = fake_jwt(epoch_now() + 3600);
        Mock::given(method("GET"))
            .and(path("/sso/oidc/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"id_token": "{stale}"}}"#)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sso/oidc/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"id_token": "{fresh}"}}"#)),
            )
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        session.login("kimble", "hunter2").await.unwrap();
        assert!(!session.logged_in().await, "stale token must read as expired");

        let header = session.auth_header().await.unwrap();
        assert_eq!(header, format!("Bearer {fresh}"));
        assert!(session.logged_in().await);
    }

    #[tokio::test]
    async fn test_logout_drops_session() {
        let server = MockServer::start().await;
        let token = fake_jwt(epoch_now() + 3600);
        Mock::given(method("GET"))
            .and(path("/sso/oidc/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"id_token": "{token}"}}"#)),
            )
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        session.login("kimble", "hunter2").await.unwrap();
        session.logout().await;
        assert!(!session.logged_in().await);
        assert!(session.auth_header().await.is_none());
    }
}
