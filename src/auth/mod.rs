//! Authentication: SSO session handling and credential persistence.
//!
//! [`AuthSession`] owns the password grant and bearer-token lifecycle;
//! [`CredentialStore`] keeps passwords in the platform keychain; the
//! storage submodule persists a still-valid token encrypted at rest so a
//! new process can resume the session.

mod credentials;
mod session;
mod storage;
mod token;

pub use credentials::{CredentialError, CredentialStore};
pub use session::{AuthError, AuthSession};
pub use storage::{
    StorageError, StoredSession, clear_persisted_session, load_persisted_session,
    persisted_session_path, store_persisted_session,
};
pub use token::{AuthInfo, TokenError};
