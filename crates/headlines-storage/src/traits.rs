//! The system-of-record contract.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{Entity, EntityId, WindowQuery};

/// Authoritative store for one entity type.
///
/// Implementations must be thread-safe (`Send + Sync`). The cache layer only
/// ever reads through `find_by_id`/`query_window` and writes through `save`.
///
/// # Example
///
/// ```ignore
/// use headlines_storage::{Article, SystemOfRecord, StorageError};
///
/// async fn load(store: &dyn SystemOfRecord<Article>, id: i64) -> Result<Article, StorageError> {
///     store
///         .find_by_id(id)
///         .await?
///         .ok_or_else(|| StorageError::not_found("article", id))
/// }
/// ```
#[async_trait]
pub trait SystemOfRecord<E: Entity>: Send + Sync {
    /// Reads an entity by ID.
    ///
    /// Returns `None` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing entities.
    async fn find_by_id(&self, id: EntityId) -> Result<Option<E>, StorageError>;

    /// Returns the entities inside `window`, newest first.
    async fn query_window(&self, window: &WindowQuery) -> Result<Vec<E>, StorageError>;

    /// Creates (`id == 0`) or replaces an entity and returns the stored copy.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` when replacing an entity that does not exist.
    async fn save(&self, entity: E) -> Result<E, StorageError>;

    /// Deletes an entity. Returns `false` if it did not exist.
    async fn delete(&self, id: EntityId) -> Result<bool, StorageError>;
}
