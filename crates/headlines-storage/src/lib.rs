//! # headlines-storage
//!
//! System-of-record abstraction for the Headlines services.
//!
//! This crate defines the entity types and the [`SystemOfRecord`] trait the
//! cache layer reads through. Relational backends live outside this crate;
//! [`MemoryStore`] is the in-process reference implementation.
//!
//! ## Example
//!
//! ```ignore
//! use headlines_storage::{Article, MemoryStore, SystemOfRecord, WindowQuery};
//!
//! let store = MemoryStore::<Article>::new();
//! let saved = store.save(Article::new("Hello", "World")).await?;
//! let latest = store.query_window(&WindowQuery::top(5)).await?;
//! ```

mod error;
mod memory;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use memory::MemoryStore;
pub use traits::SystemOfRecord;
pub use types::{Article, Comment, Entity, EntityId, WindowQuery};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared system-of-record trait object.
pub type DynSource<E> = std::sync::Arc<dyn SystemOfRecord<E>>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use headlines_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::memory::MemoryStore;
    pub use crate::traits::SystemOfRecord;
    pub use crate::types::{Article, Comment, Entity, EntityId, WindowQuery};
    pub use crate::{DynSource, StorageResult};
}
