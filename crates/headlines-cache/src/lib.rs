//! Caching layer for the Headlines services.
//!
//! ## Architecture
//!
//! - **[`KvStore`]**: the shared key-value contract (values with TTL plus
//!   scored sets), backed by DashMap locally or Redis across instances
//! - **[`CacheAside`]**: read-through / write-through access to one entity
//!   type and its list windows
//! - **[`RecencyIndex`]**: bounded LRU index per namespace, evicting cache
//!   entries beyond a soft capacity
//! - **[`CacheWarmer`]**: background task refreshing popular windows
//!
//! ## Cache Hierarchy
//!
//! ```text
//! request → CacheAside → KvStore ──hit──→ value
//!                           │ miss
//!                           ↓
//!                     SystemOfRecord → KvStore.set → RecencyIndex.touch/trim
//!
//! CacheWarmer ──timer──→ SystemOfRecord → KvStore.set   (untracked)
//! ```

pub mod accessor;
pub mod backend;
pub mod counters;
pub mod error;
pub mod keys;
pub mod kv;
pub mod recency;
pub mod warmer;

pub use accessor::{CacheAside, CachePolicy, ReadSource, WriteOutcome};
pub use backend::{CacheBackend, CacheStats, CachedEntry, LocalKv, RedisKv};
pub use counters::{Counters, InMemoryCounters, MetricsCounters, NoopCounters};
pub use error::{CacheError, CacheResult, KvError, KvResult};
pub use kv::{DynKv, KvStore};
pub use recency::{DEFAULT_CAPACITY, RecencyIndex, TrimReport};
pub use warmer::{CacheWarmer, PrefillConfig, WarmError, WarmReport, WarmerConfig, WarmerHandle};
