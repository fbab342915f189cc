//! Pluggable storage for the session's bearer token.
//!
//! The host application owns the token. [`ApiClient`](crate::ApiClient) only
//! reads it before each request and clears it after a 401; writing a token is
//! the job of the host's login flow.
//!
//! # Implementing a Custom Store
//!
//! ```rust
//! use async_trait::async_trait;
//! use arena_client::token::{TokenStorage, TokenStorageError};
//!
//! struct KeychainStorage;
//!
//! #[async_trait]
//! impl TokenStorage for KeychainStorage {
//!     async fn get_token(&self) -> Result<Option<String>, TokenStorageError> {
//!         Ok(None)
//!     }
//!
//!     async fn set_token(&self, _token: String) -> Result<(), TokenStorageError> {
//!         Ok(())
//!     }
//!
//!     async fn clear_token(&self) -> Result<(), TokenStorageError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Failure reported by a [`TokenStorage`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("token storage error: {0}")]
pub struct TokenStorageError(pub String);

impl TokenStorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Asynchronous, fallible access to the session token.
///
/// Implementations must be shareable across tasks; the client calls
/// [`get_token`](TokenStorage::get_token) concurrently from every in-flight
/// request.
#[async_trait]
pub trait TokenStorage: Send + Sync + 'static {
    /// Read the current token. `Ok(None)` means signed out.
    async fn get_token(&self) -> Result<Option<String>, TokenStorageError>;

    /// Persist a new token.
    async fn set_token(&self, token: String) -> Result<(), TokenStorageError>;

    /// Forget the current token.
    async fn clear_token(&self) -> Result<(), TokenStorageError>;
}

/// In-process [`TokenStorage`] holding the token in memory.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that starts out signed in.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn get_token(&self) -> Result<Option<String>, TokenStorageError> {
        Ok(self.token.read().await.clone())
    }

    async fn set_token(&self, token: String) -> Result<(), TokenStorageError> {
        *self.token.write().await = Some(token);
        Ok(())
    }

    async fn clear_token(&self) -> Result<(), TokenStorageError> {
        *self.token.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_lifecycle() {
        let storage = MemoryTokenStorage::new();
        assert_eq!(storage.get_token().await.unwrap(), None);

        storage.set_token("abc".into()).await.unwrap();
        assert_eq!(storage.get_token().await.unwrap().as_deref(), Some("abc"));

        storage.clear_token().await.unwrap();
        assert_eq!(storage.get_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn with_token_starts_signed_in() {
        let storage = MemoryTokenStorage::with_token("seed");
        assert_eq!(storage.get_token().await.unwrap().as_deref(), Some("seed"));
    }

    #[test]
    fn storage_is_object_safe() {
        fn assert_object_safe(_: &dyn TokenStorage) {}
        assert_object_safe(&MemoryTokenStorage::new());
    }
}
