//! Repository traits and error types for document persistence.
//!
//! The core only depends on these interfaces; concrete persistence (SQLite,
//! Postgres, ...) lives behind them. The crate ships the in-memory
//! [`super::local::LocalRepository`] used for tests and single-node setups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),
    /// The persisted blob fails structural validation; nothing is applied.
    #[error("Data validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// A persisted schedule document blob with its last-write timestamp.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub data: String,
    pub updated_at: DateTime<Utc>,
}

/// One schedule document blob per owner.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn load_state(&self, owner: &str) -> RepositoryResult<Option<StoredDocument>>;
    /// Persist the blob and return the new `updated_at`.
    async fn save_state(&self, owner: &str, data: &str) -> RepositoryResult<DateTime<Utc>>;
    async fn delete_state(&self, owner: &str) -> RepositoryResult<()>;
}

/// Public feed token for one owner.
#[derive(Debug, Clone)]
pub struct WebPublication {
    pub owner: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PublicationRepository: Send + Sync {
    async fn publication_for_owner(&self, owner: &str)
        -> RepositoryResult<Option<WebPublication>>;
    async fn publication_for_token(&self, token: &str)
        -> RepositoryResult<Option<WebPublication>>;
    /// Create a publication for the owner, or touch the existing one.
    async fn publish(&self, owner: &str) -> RepositoryResult<WebPublication>;
    /// Replace the owner's token; `NotFound` when nothing is published.
    async fn rotate(&self, owner: &str) -> RepositoryResult<WebPublication>;
    async fn unpublish(&self, owner: &str) -> RepositoryResult<()>;
}

/// Convenience super-trait for handles that serve both concerns.
pub trait FullRepository: StateRepository + PublicationRepository {}

impl<T: StateRepository + PublicationRepository> FullRepository for T {}
