use std::sync::Mutex;
use thiserror::Error;

use crate::types::TokenPair;

/// Both tokens live in a single entry so they are written and cleared together.
pub const KEYRING_USER_SESSION_TOKENS: &str = "session_tokens";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("OS keychain/secret service is unavailable")]
    Unavailable,
    #[error("secret storage failed: {0}")]
    Platform(String),
    #[error("stored session tokens are unreadable")]
    Corrupt,
}

/// Persistence port for the token pair.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenPair>, StoreError>;
    fn save(&self, pair: &TokenPair) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, KEYRING_USER_SESSION_TOKENS).map_err(map_keyring_error)
    }

    pub fn is_available(&self) -> bool {
        let Ok(entry) = self.entry() else {
            return false;
        };

        match entry.get_password() {
            Ok(_) => true,
            Err(keyring::Error::NoEntry) => true,
            Err(keyring::Error::BadEncoding(_)) => true,
            Err(keyring::Error::Ambiguous(_)) => true,
            Err(keyring::Error::NoStorageAccess(_)) => false,
            Err(keyring::Error::PlatformFailure(_)) => false,
            Err(_) => false,
        }
    }
}

fn map_keyring_error(err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoStorageAccess(_) => StoreError::Unavailable,
        keyring::Error::BadEncoding(_) => StoreError::Corrupt,
        other => StoreError::Platform(other.to_string()),
    }
}

fn parse_pair(raw: &str) -> Result<Option<TokenPair>, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let pair: TokenPair = serde_json::from_str(raw).map_err(|_| StoreError::Corrupt)?;
    if pair.refresh_token.trim().is_empty() && pair.access_token.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(pair))
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<TokenPair>, StoreError> {
        match self.entry()?.get_password() {
            Ok(raw) => parse_pair(&raw),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(map_keyring_error(err)),
        }
    }

    fn save(&self, pair: &TokenPair) -> Result<(), StoreError> {
        let raw = serde_json::to_string(pair).map_err(|e| StoreError::Platform(e.to_string()))?;
        self.entry()?.set_password(&raw).map_err(map_keyring_error)
    }

    fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(map_keyring_error(err)),
        }
    }
}

/// Process-lifetime store, used when the user opts out of remembering the
/// session or the keychain is missing, and in tests.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            slot: Mutex::new(Some(pair)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<TokenPair>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenPair>, StoreError> {
        Ok(self.slot().clone())
    }

    fn save(&self, pair: &TokenPair) -> Result<(), StoreError> {
        *self.slot() = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    #[test]
    fn parse_pair_handles_blank_and_corrupt_values() {
        assert_eq!(parse_pair("  "), Ok(None));
        assert_eq!(parse_pair("not json"), Err(StoreError::Corrupt));
        assert_eq!(
            parse_pair(r#"{"accessToken":"","refreshToken":""}"#),
            Ok(None)
        );
        assert_eq!(
            parse_pair(r#"{"accessToken":"a","refreshToken":"r"}"#),
            Ok(Some(pair("a", "r")))
        );
    }

    #[test]
    fn memory_store_replaces_both_tokens() {
        let store = MemoryTokenStore::with_pair(pair("a1", "r1"));
        store.save(&pair("a2", "r2")).unwrap();
        assert_eq!(store.load().unwrap(), Some(pair("a2", "r2")));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
