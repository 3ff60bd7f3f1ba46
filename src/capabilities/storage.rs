//! Durable document storage backed by the shell.
//!
//! The core keeps the whole application state as a single JSON document and
//! asks the shell to load, save, or clear it under a validated key. The shell
//! maps these operations onto whatever it has available (web `localStorage`,
//! iOS `UserDefaults`, a file on disk). Every failure is reported back so the
//! core can degrade to in-memory operation instead of crashing.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::STORE_KEY;

/// Longest key the shell is expected to accept.
pub const MAX_KEY_LENGTH: usize = 128;

/// Largest document we will hand to the shell. Web storage backends start
/// failing well above this, so oversized documents are rejected in the core
/// where the failure can carry a precise reason.
pub const MAX_DOCUMENT_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn new(key: impl Into<String>) -> Result<Self, StorageError> {
        let key = key.into();

        if key.is_empty() {
            return Err(StorageError::InvalidKey {
                reason: "key must not be empty".into(),
            });
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(StorageError::InvalidKey {
                reason: format!("key exceeds {MAX_KEY_LENGTH} bytes"),
            });
        }
        if key.chars().any(char::is_control) {
            return Err(StorageError::InvalidKey {
                reason: "key must not contain control characters".into(),
            });
        }
        if key.starts_with(char::is_whitespace) || key.ends_with(char::is_whitespace) {
            return Err(StorageError::InvalidKey {
                reason: "key must not have surrounding whitespace".into(),
            });
        }

        Ok(Self(key))
    }

    /// Key under which the single application state document lives.
    #[must_use]
    pub fn app_state() -> Self {
        Self(STORE_KEY.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageOperation {
    Load { key: StoreKey },
    Save { key: StoreKey, document: String },
    Clear { key: StoreKey },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageOutput {
    Loaded { document: Option<String> },
    Saved,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage access denied by the platform")]
    AccessDenied,
    #[error("invalid store key: {reason}")]
    InvalidKey { reason: String },
    #[error("document of {size} bytes exceeds the {max} byte limit")]
    DocumentTooLarge { size: usize, max: usize },
}

impl StorageError {
    /// Whether retrying the same operation later could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type StorageResult = Result<StorageOutput, StorageError>;

impl Operation for StorageOperation {
    type Output = StorageResult;
}

pub struct Storage<E> {
    context: CapabilityContext<StorageOperation, E>,
}

impl<E> Storage<E>
where
    E: Send + 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<StorageOperation, E>) -> Self {
        Self { context }
    }

    /// Loads the document stored under `key`, if any.
    pub fn load<F>(&self, key: StoreKey, make_event: F)
    where
        F: FnOnce(StorageResult) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(StorageOperation::Load { key }).await;
            context.update_app(make_event(result));
        });
    }

    /// Saves `document` under `key`, replacing any previous document.
    ///
    /// Oversized documents are rejected without ever reaching the shell; the
    /// rejection is delivered through the same callback as shell failures.
    pub fn save<F>(&self, key: StoreKey, document: String, make_event: F)
    where
        F: FnOnce(StorageResult) -> E + Send + 'static,
    {
        if document.len() > MAX_DOCUMENT_BYTES {
            let oversized = StorageError::DocumentTooLarge {
                size: document.len(),
                max: MAX_DOCUMENT_BYTES,
            };
            let context = self.context.clone();
            self.context.spawn(async move {
                context.update_app(make_event(Err(oversized)));
            });
            return;
        }

        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(StorageOperation::Save { key, document })
                .await;
            context.update_app(make_event(result));
        });
    }

    /// Removes the document stored under `key`.
    pub fn clear<F>(&self, key: StoreKey, make_event: F)
    where
        F: FnOnce(StorageResult) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(StorageOperation::Clear { key }).await;
            context.update_app(make_event(result));
        });
    }
}

impl<E> Capability<E> for Storage<E> {
    type Operation = StorageOperation;
    type MappedSelf<MappedEv> = Storage<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> E + Send + Sync + 'static,
        E: 'static,
        NewEv: 'static + Send,
    {
        Storage::new(self.context.map_event(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_key_is_valid() {
        assert_eq!(StoreKey::app_state().as_str(), STORE_KEY);
        assert!(StoreKey::new(STORE_KEY).is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            StoreKey::new(""),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_oversized_key_rejected() {
        let key = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(
            StoreKey::new(key),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_key_with_control_characters_rejected() {
        assert!(StoreKey::new("app\0state").is_err());
        assert!(StoreKey::new("app\nstate").is_err());
    }

    #[test]
    fn test_key_with_surrounding_whitespace_rejected() {
        assert!(StoreKey::new(" padded").is_err());
        assert!(StoreKey::new("padded ").is_err());
        assert!(StoreKey::new("inner space").is_ok());
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(StorageError::Unavailable {
            reason: "detached".into()
        }
        .is_retryable());
        assert!(!StorageError::QuotaExceeded.is_retryable());
        assert!(!StorageError::AccessDenied.is_retryable());
        assert!(!StorageError::DocumentTooLarge { size: 1, max: 0 }.is_retryable());
    }
}
