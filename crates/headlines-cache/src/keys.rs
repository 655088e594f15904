//! Cache key derivation.
//!
//! ## Key Formats
//!
//! | What | Format | Example |
//! |------|--------|---------|
//! | Single entity | `{kind}:{id}` | `article:5` |
//! | Most recent N | `{collection}:latest:{n}` | `articles:latest:10` |
//! | Children of a parent | `{collection}:by-parent:{id}:{n or all}` | `comments:by-parent:7:all` |
//! | Lookback suffix | `…:since:{seconds}` | `articles:latest:all:since:1209600` |
//! | Recency index | `lru:{collection}` | `lru:comments` |
//! | Stale shadow | `stale:{key}` | `stale:article:5` |
//!
//! Every field of a [`WindowQuery`] appears in its key, so two different
//! window shapes never share an entry.

use headlines_storage::{Entity, EntityId, WindowQuery};

/// Key of a single cached entity.
#[inline]
pub fn entity_key<E: Entity>(id: EntityId) -> String {
    format!("{}:{id}", E::KIND)
}

/// Key of a cached list for the given window shape.
pub fn window_key<E: Entity>(window: &WindowQuery) -> String {
    let mut key = match window.parent_id {
        Some(parent) => format!("{}:by-parent:{parent}", E::COLLECTION),
        None => format!("{}:latest", E::COLLECTION),
    };
    match window.top {
        Some(n) => key.push_str(&format!(":{n}")),
        None => key.push_str(":all"),
    }
    if let Some(lookback) = window.since {
        key.push_str(&format!(":since:{}", lookback.whole_seconds()));
    }
    key
}

/// Common prefix of every "most recent" list key of `E`, whatever its size
/// or lookback.
pub fn latest_prefix<E: Entity>() -> String {
    format!("{}:latest:", E::COLLECTION)
}

/// Name of the scored set tracking recently used keys of a namespace.
#[inline]
pub fn recency_set(namespace: &str) -> String {
    format!("lru:{namespace}")
}

/// Key of the long-lived copy served when the source is unreachable.
#[inline]
pub fn stale_key(key: &str) -> String {
    format!("stale:{key}")
}
