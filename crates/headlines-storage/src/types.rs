//! Entity and query types shared by the system of record and the cache layer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Numeric identity of a stored entity. `0` means "not yet assigned".
pub type EntityId = i64;

/// A persistent entity that can be cached.
///
/// `KIND` names a single entity (`article`), `COLLECTION` names lists of them
/// (`articles`). Both feed cache key derivation, so they must be stable.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Singular name used in per-entity keys.
    const KIND: &'static str;

    /// Plural name used for list keys and the recency namespace.
    const COLLECTION: &'static str;

    fn id(&self) -> EntityId;

    fn set_id(&mut self, id: EntityId);

    /// Timestamp that orders query windows, newest first.
    fn timestamp(&self) -> OffsetDateTime;

    /// Owning entity, if any (a comment's article).
    fn parent_id(&self) -> Option<EntityId> {
        None
    }
}

/// A news article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_continent")]
    pub continent: String,
    #[serde(default = "OffsetDateTime::now_utc", with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

fn default_continent() -> String {
    "Global".to_string()
}

impl Article {
    /// Creates an unsaved article published now.
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            content: content.into(),
            continent: default_continent(),
            published_at: OffsetDateTime::now_utc(),
        }
    }

    /// Sets the publication timestamp.
    #[must_use]
    pub fn published(mut self, at: OffsetDateTime) -> Self {
        self.published_at = at;
        self
    }
}

impl Entity for Article {
    const KIND: &'static str = "article";
    const COLLECTION: &'static str = "articles";

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn timestamp(&self) -> OffsetDateTime {
        self.published_at
    }
}

/// A reader comment attached to an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub id: EntityId,
    pub article_id: EntityId,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default = "OffsetDateTime::now_utc", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

fn default_user_name() -> String {
    "anonymous".to_string()
}

impl Comment {
    /// Creates an unsaved anonymous comment on `article_id`.
    #[must_use]
    pub fn new(article_id: EntityId, text: impl Into<String>) -> Self {
        Self {
            id: 0,
            article_id,
            user_name: default_user_name(),
            text: text.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

impl Entity for Comment {
    const KIND: &'static str = "comment";
    const COLLECTION: &'static str = "comments";

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn timestamp(&self) -> OffsetDateTime {
        self.created_at
    }

    fn parent_id(&self) -> Option<EntityId> {
        Some(self.article_id)
    }
}

/// Shape of a list query against the system of record.
///
/// Results are always ordered newest first. Every field narrows the result;
/// the default query returns everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WindowQuery {
    /// Keep at most this many entities.
    pub top: Option<usize>,
    /// Only entities whose timestamp falls within this lookback from now.
    pub since: Option<time::Duration>,
    /// Only entities owned by this parent.
    pub parent_id: Option<EntityId>,
}

impl WindowQuery {
    /// Creates an unrestricted window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n` most recent entities.
    #[must_use]
    pub fn top(n: usize) -> Self {
        Self {
            top: Some(n),
            ..Self::default()
        }
    }

    /// All children of `parent_id`.
    #[must_use]
    pub fn children_of(parent_id: EntityId) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    /// Restricts the window to the given lookback.
    #[must_use]
    pub fn with_since(mut self, lookback: time::Duration) -> Self {
        self.since = Some(lookback);
        self
    }

    /// Caps the window size.
    #[must_use]
    pub fn with_top(mut self, n: usize) -> Self {
        self.top = Some(n);
        self
    }

    /// Returns `true` if `entity` falls inside this window's filters
    /// (ignoring `top`), evaluated at `now`.
    pub fn matches<E: Entity>(&self, entity: &E, now: OffsetDateTime) -> bool {
        if let Some(parent) = self.parent_id {
            if entity.parent_id() != Some(parent) {
                return false;
            }
        }
        // A lookback reaching before the representable range has no lower bound.
        if let Some(cutoff) = self.since.and_then(|lookback| now.checked_sub(lookback)) {
            if entity.timestamp() < cutoff {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_article_json_shape() {
        let article = Article::new("Title", "Body").published(datetime!(2024-01-02 03:04:05 UTC));
        let json = serde_json::to_value(&article).unwrap();
        assert_eq!(json["title"], "Title");
        assert_eq!(json["continent"], "Global");
        assert_eq!(json["publishedAt"], "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_comment_defaults() {
        let comment: Comment = serde_json::from_str(r#"{"articleId": 7, "text": "hi"}"#).unwrap();
        assert_eq!(comment.article_id, 7);
        assert_eq!(comment.user_name, "anonymous");
        assert_eq!(comment.parent_id(), Some(7));
    }

    #[test]
    fn test_huge_lookback_has_no_lower_bound() {
        let now = datetime!(2024-06-01 00:00 UTC);
        let ancient = Article::new("old", "").published(datetime!(1970-01-01 00:00 UTC));
        let window = WindowQuery::top(5).with_since(time::Duration::days(5_000_000));
        assert!(window.matches(&ancient, now));
    }

    #[test]
    fn test_window_matches() {
        let now = datetime!(2024-06-01 00:00 UTC);
        let fresh = Comment {
            created_at: now - time::Duration::days(1),
            ..Comment::new(1, "a")
        };
        let old = Comment {
            created_at: now - time::Duration::days(30),
            ..Comment::new(1, "b")
        };

        let window = WindowQuery::children_of(1).with_since(time::Duration::days(14));
        assert!(window.matches(&fresh, now));
        assert!(!window.matches(&old, now));
        assert!(!WindowQuery::children_of(2).matches(&fresh, now));
    }
}
