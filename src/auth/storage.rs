//! Encrypted-at-rest persistence for the SSO session token.
//!
//! A still-valid token survives process restarts so a fresh invocation can
//! download proprietary files without prompting for a password again. The
//! token is written to `~/.config/esoarc/session.enc` (or
//! `$XDG_CONFIG_HOME/esoarc/session.enc`), encrypted with a master key held
//! in the system keychain (`ESOARC_MASTER_KEY` overrides it).

use std::env;
use std::ffi::OsString;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

const SESSION_FILE_NAME: &str = "session.enc";
const KEYRING_SERVICE: &str = "esoarc";
const KEYRING_ENTRY_NAME: &str = "session-master-key-v1";
const MAGIC: &[u8; 4] = b"ESA1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Errors for persisted session storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No suitable user config directory is available.
    #[error("unable to determine config directory (set XDG_CONFIG_HOME or HOME)")]
    ConfigDirUnavailable,
    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Could not access keychain and no env fallback key was provided.
    #[error(
        "unable to access system keychain for the session encryption key; \
         set ESOARC_MASTER_KEY or configure keychain access"
    )]
    KeychainUnavailable,
    /// Stored encrypted payload is malformed.
    #[error("persisted session payload is invalid")]
    InvalidPayload,
    /// Encryption failed.
    #[error("failed to encrypt persisted session")]
    EncryptionFailed,
    /// Decryption failed.
    #[error("failed to decrypt persisted session")]
    DecryptionFailed,
}

/// The persisted half of an authenticated session. The password never
/// touches disk; only the bearer token does.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoredSession {
    /// Authenticated username.
    pub username: String,
    /// Bearer token (carries its own expiry).
    pub token: String,
}

/// Returns the default persisted session path
/// (`~/.config/esoarc/session.enc`).
///
/// # Errors
///
/// Returns [`StorageError::ConfigDirUnavailable`] if no usable config dir
/// is found.
pub fn persisted_session_path() -> Result<PathBuf, StorageError> {
    Ok(default_config_dir()?.join(SESSION_FILE_NAME))
}

/// Stores the session encrypted at rest in the default location.
///
/// # Errors
///
/// Returns [`StorageError`] when key retrieval, encryption, or file writing
/// fails.
pub fn store_persisted_session(session: &StoredSession) -> Result<PathBuf, StorageError> {
    let path = persisted_session_path()?;
    let key = load_or_create_key()?;
    store_persisted_session_with_key(session, &path, &key)?;
    Ok(path)
}

/// Loads and decrypts the persisted session from disk.
///
/// Returns `Ok(None)` when no persisted session file exists.
///
/// # Errors
///
/// Returns [`StorageError`] when key retrieval, decryption, or parsing
/// fails.
pub fn load_persisted_session() -> Result<Option<StoredSession>, StorageError> {
    let path = persisted_session_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let key = load_or_create_key()?;
    let session = load_persisted_session_with_key(&path, &key)?;
    Ok(Some(session))
}

/// Removes the persisted session and best-effort clears the keychain key.
///
/// Returns `true` when the session file existed and was deleted.
///
/// # Errors
///
/// Returns [`StorageError`] when file removal fails.
pub fn clear_persisted_session() -> Result<bool, StorageError> {
    let path = persisted_session_path()?;
    let removed = if path.exists() {
        fs::remove_file(&path)?;
        true
    } else {
        false
    };

    if env::var_os("ESOARC_MASTER_KEY").is_none() {
        let _ = delete_keychain_key();
    }

    Ok(removed)
}

fn default_config_dir() -> Result<PathBuf, StorageError> {
    resolve_config_dir(
        sanitize_env_path(env::var_os("XDG_CONFIG_HOME")),
        sanitize_env_path(env::var_os("HOME")),
    )
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(value))
}

fn resolve_config_dir(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf, StorageError> {
    if let Some(xdg) = xdg_config_home {
        return Ok(xdg.join("esoarc"));
    }
    if let Some(home) = home {
        return Ok(home.join(".config").join("esoarc"));
    }
    Err(StorageError::ConfigDirUnavailable)
}

fn load_or_create_key() -> Result<String, StorageError> {
    if let Some(from_env) = env::var_os("ESOARC_MASTER_KEY") {
        let key = from_env.to_string_lossy().trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }

    let entry = safe_keyring_entry()?;
    match safe_keyring_get_password(&entry) {
        Ok(existing) if !existing.trim().is_empty() => Ok(existing),
        _ => {
            let generated = generate_key_material();
            safe_keyring_set_password(&entry, &generated)?;
            Ok(generated)
        }
    }
}

fn delete_keychain_key() -> Result<(), StorageError> {
    let entry = safe_keyring_entry()?;
    let _ = safe_keyring_delete_credential(&entry);
    Ok(())
}

fn safe_keyring_entry() -> Result<keyring::Entry, StorageError> {
    catch_unwind(|| keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY_NAME))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn safe_keyring_get_password(entry: &keyring::Entry) -> Result<String, StorageError> {
    catch_unwind(AssertUnwindSafe(|| entry.get_password()))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn safe_keyring_set_password(entry: &keyring::Entry, password: &str) -> Result<(), StorageError> {
    catch_unwind(AssertUnwindSafe(|| entry.set_password(password)))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn safe_keyring_delete_credential(entry: &keyring::Entry) -> Result<(), StorageError> {
    catch_unwind(AssertUnwindSafe(|| entry.delete_credential()))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn generate_key_material() -> String {
    let mut bytes = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn derive_key_bytes(key_material: &str) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(key_material.as_bytes());
    let mut key = [0_u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

fn store_persisted_session_with_key(
    session: &StoredSession,
    path: &Path,
    key_material: &str,
) -> Result<(), StorageError> {
    let plaintext = serde_json::to_vec(session)?;
    let encrypted = encrypt_bytes(&plaintext, key_material)?;
    write_encrypted_payload(path, &encrypted)?;
    Ok(())
}

fn write_encrypted_payload(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, payload)?;
    set_owner_only_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn load_persisted_session_with_key(
    path: &Path,
    key_material: &str,
) -> Result<StoredSession, StorageError> {
    let bytes = fs::read(path)?;
    let plaintext = decrypt_bytes(&bytes, key_material)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

fn encrypt_bytes(plaintext: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));

    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let nonce_ref = XNonce::from_slice(&nonce);

    let ciphertext = cipher
        .encrypt(nonce_ref, plaintext)
        .map_err(|_| StorageError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(MAGIC);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt_bytes(payload: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    if payload.len() < MAGIC.len() + NONCE_LEN || &payload[..MAGIC.len()] != MAGIC {
        return Err(StorageError::InvalidPayload);
    }

    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    let nonce_start = MAGIC.len();
    let nonce_end = nonce_start + NONCE_LEN;
    let nonce = XNonce::from_slice(&payload[nonce_start..nonce_end]);
    let ciphertext = &payload[nonce_end..];

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| StorageError::DecryptionFailed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::ffi::OsString;

    use tempfile::TempDir;

    use super::*;

    fn sample_session() -> StoredSession {
        StoredSession {
            username: "kimble".to_string(),
            token: "aaa.bbb.ccc".to_string(),
        }
    }

    #[test]
    fn test_store_and_load_round_trip_with_explicit_key() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");

        store_persisted_session_with_key(&sample_session(), &path, "test-key").unwrap();
        let loaded = load_persisted_session_with_key(&path, "test-key").unwrap();
        assert_eq!(loaded, sample_session());
    }

    #[test]
    fn test_load_with_wrong_key_fails() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");
        store_persisted_session_with_key(&sample_session(), &path, "key-a").unwrap();

        let result = load_persisted_session_with_key(&path, "key-b");
        assert!(matches!(result, Err(StorageError::DecryptionFailed)));
    }

    #[test]
    fn test_invalid_payload_fails() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");
        fs::write(&path, b"not-encrypted-data").unwrap();

        let result = load_persisted_session_with_key(&path, "test-key");
        assert!(matches!(result, Err(StorageError::InvalidPayload)));
    }

    #[test]
    fn test_sanitize_env_path_rejects_blank_values() {
        assert!(sanitize_env_path(Some(OsString::from(""))).is_none());
        assert!(sanitize_env_path(Some(OsString::from("   "))).is_none());
    }

    #[test]
    fn test_resolve_config_dir_prefers_xdg_over_home() {
        let resolved = resolve_config_dir(
            Some(PathBuf::from("/tmp/xdg")),
            Some(PathBuf::from("/tmp/home")),
        )
        .unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/xdg/esoarc"));
    }

    #[test]
    fn test_resolve_config_dir_errors_when_all_sources_missing() {
        let result = resolve_config_dir(None, None);
        assert!(matches!(result, Err(StorageError::ConfigDirUnavailable)));
    }

    #[cfg(unix)]
    #[test]
    fn test_store_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("session.enc");
        store_persisted_session_with_key(&sample_session(), &path, "test-key").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
