//! System credential store access for archive passwords.
//!
//! Passwords are kept in the platform keychain, keyed by service identity
//! plus username. Keyring backends can panic on broken desktop sessions, so
//! every call is unwind-guarded.

use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tracing::debug;

/// Service identity prefix for keychain entries.
const SERVICE_PREFIX: &str = "esoarc";

/// Errors raised by the credential store.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The platform keychain could not be reached.
    #[error("unable to access the system credential store")]
    StoreUnavailable,
}

/// Keychain-backed password store for one archive service.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
}

impl CredentialStore {
    /// Creates a store keyed by `{prefix}:{service_host}`.
    #[must_use]
    pub fn new(service_host: &str) -> Self {
        Self {
            service: format!("{SERVICE_PREFIX}:{service_host}"),
        }
    }

    /// The full service identity used for keychain entries.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Looks up the stored password for `username`. A missing entry reads
    /// as `None`; an unreachable keychain is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::StoreUnavailable`] when the keychain
    /// cannot be reached.
    pub fn lookup(&self, username: &str) -> Result<Option<String>, CredentialError> {
        let entry = self.entry(username)?;
        match guarded(|| entry.get_password()) {
            Ok(Ok(password)) => Ok(Some(password)),
            Ok(Err(keyring::Error::NoEntry)) => Ok(None),
            Ok(Err(_)) | Err(()) => Err(CredentialError::StoreUnavailable),
        }
    }

    /// Persists `password` for `username`, replacing any stored value.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::StoreUnavailable`] when the keychain
    /// cannot be reached or refuses the write.
    pub fn store(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        let entry = self.entry(username)?;
        guarded(|| entry.set_password(password))
            .map_err(|()| CredentialError::StoreUnavailable)?
            .map_err(|_| CredentialError::StoreUnavailable)?;
        debug!(service = %self.service, username, "stored credential");
        Ok(())
    }

    /// Removes the stored password for `username`. Removing a missing entry
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::StoreUnavailable`] when the keychain
    /// cannot be reached.
    pub fn delete(&self, username: &str) -> Result<(), CredentialError> {
        let entry = self.entry(username)?;
        match guarded(|| entry.delete_credential()) {
            Ok(Ok(())) | Ok(Err(keyring::Error::NoEntry)) => Ok(()),
            Ok(Err(_)) | Err(()) => Err(CredentialError::StoreUnavailable),
        }
    }

    fn entry(&self, username: &str) -> Result<keyring::Entry, CredentialError> {
        guarded(|| keyring::Entry::new(&self.service, username))
            .map_err(|()| CredentialError::StoreUnavailable)?
            .map_err(|_| CredentialError::StoreUnavailable)
    }
}

fn guarded<T>(operation: impl FnOnce() -> T) -> Result<T, ()> {
    catch_unwind(AssertUnwindSafe(operation)).map_err(|_| ())
}
