//! Database encryption key management using the system keyring
use calsync_domain::{CalSyncError, DatabaseConfig, Result};
use keyring::Entry;
use rand::RngCore;
use tracing::{info, warn};

use crate::errors::InfraError;

const SERVICE_NAME: &str = "calsync";
const KEY_NAME: &str = "database_encryption_key";

/// Manages the SQLCipher key in the OS keychain
pub struct KeyManager {
    service: String,
    account: String,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(SERVICE_NAME, KEY_NAME)
    }
}

impl KeyManager {
    /// Key stored under `service`/`account` in the OS keychain.
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self { service: service.into(), account: account.into() }
    }

    /// The key from `config` when set, otherwise the keychain key.
    pub fn resolve(&self, config: &DatabaseConfig) -> Result<String> {
        match config.encryption_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Ok(key.to_owned()),
            None => self.get_or_create_key(),
        }
    }

    /// Read the stored key, generating and storing one on first use.
    pub fn get_or_create_key(&self) -> Result<String> {
        let entry = self.entry()?;

        match entry.get_password() {
            Ok(key) => Ok(key),
            Err(keyring::Error::NoEntry) => {
                let key = generate_key();
                entry.set_password(&key).map_err(InfraError::from)?;
                info!(service = %self.service, "generated database encryption key");
                Ok(key)
            }
            Err(e) => {
                warn!(service = %self.service, error = %e, "keychain read failed");
                Err(InfraError::from(e).into())
            }
        }
    }

    /// Delete the stored key. The database becomes unreadable without it.
    pub fn delete_key(&self) -> Result<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(InfraError::from(e).into()),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account)
            .map_err(|e| CalSyncError::Security(format!("Failed to access keyring: {e}")))
    }
}

/// 32 random bytes, hex encoded.
fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_64_hex_chars_and_unique() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn configured_key_wins_over_keychain() {
        let config = DatabaseConfig {
            encryption_key: Some("configured-key".into()),
            ..DatabaseConfig::default()
        };
        let manager = KeyManager::new("calsync-test-unused", "unused");
        assert_eq!(manager.resolve(&config).unwrap(), "configured-key");
    }
}
