//! In-memory system of record.
//!
//! Used by tests and by the server when no external database is wired in.
//! Supports switching itself offline so callers can exercise their
//! `SourceUnavailable` paths.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::traits::SystemOfRecord;
use crate::types::{Entity, EntityId, WindowQuery};

/// In-memory store for a single entity type.
#[derive(Debug)]
pub struct MemoryStore<E> {
    rows: RwLock<BTreeMap<EntityId, E>>,
    next_id: AtomicI64,
    online: AtomicBool,
    reads: AtomicU64,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> MemoryStore<E> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            online: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            _entity: PhantomData,
        }
    }

    /// Creates a store pre-populated with `entities`, assigning IDs to those
    /// that have none.
    pub async fn with_entities(entities: impl IntoIterator<Item = E>) -> Self {
        let store = Self::new();
        for entity in entities {
            // Store starts online, so save cannot fail here.
            let _ = store.save(entity).await;
        }
        store
    }

    /// Simulates the backend going down (`false`) or coming back (`true`).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of read operations served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn ensure_online(&self) -> Result<(), StorageError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::connection_error(format!(
                "{} store is offline",
                E::COLLECTION
            )))
        }
    }
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> SystemOfRecord<E> for MemoryStore<E> {
    async fn find_by_id(&self, id: EntityId) -> Result<Option<E>, StorageError> {
        self.ensure_online()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn query_window(&self, window: &WindowQuery) -> Result<Vec<E>, StorageError> {
        self.ensure_online()?;
        self.reads.fetch_add(1, Ordering::SeqCst);

        let now = OffsetDateTime::now_utc();
        let rows = self.rows.read().await;
        let mut matching: Vec<E> = rows
            .values()
            .filter(|entity| window.matches(*entity, now))
            .cloned()
            .collect();
        // Newest first; ties fall back to the higher ID so the order is total.
        matching.sort_by(|a, b| {
            b.timestamp()
                .cmp(&a.timestamp())
                .then_with(|| b.id().cmp(&a.id()))
        });
        if let Some(top) = window.top {
            matching.truncate(top);
        }
        Ok(matching)
    }

    async fn save(&self, mut entity: E) -> Result<E, StorageError> {
        self.ensure_online()?;
        let mut rows = self.rows.write().await;

        if entity.id() == 0 {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            entity.set_id(id);
        } else if !rows.contains_key(&entity.id()) {
            return Err(StorageError::not_found(E::KIND, entity.id()));
        }

        rows.insert(entity.id(), entity.clone());
        tracing::debug!(kind = E::KIND, id = entity.id(), "entity saved");
        Ok(entity)
    }

    async fn delete(&self, id: EntityId) -> Result<bool, StorageError> {
        self.ensure_online()?;
        Ok(self.rows.write().await.remove(&id).is_some())
    }
}
