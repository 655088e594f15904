//! Client for the profanity check service.
//!
//! Calls `GET {base}/api/profanity/check?text=...` through a
//! [`ResilientCaller`]. When the service is unavailable (breaker open, retries
//! exhausted) the configured [`FallbackPolicy`] decides the verdict.

use std::collections::HashSet;
use std::sync::Arc;

use headlines_resilience::{CallError, CircuitBreaker, ResilientCaller, is_transient_status};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::config::{FallbackPolicy, ProfanityConfig};

/// Name of the profanity dependency in the breaker registry and metrics.
pub const DEPENDENCY: &str = "profanity";

/// Characters that separate words in checked text.
const DELIMITERS: &[char] = &[' ', '.', ',', '!', '?', ';', ':', '\'', '"'];

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProfanityError {
    #[error("profanity service returned HTTP {0}")]
    Status(u16),

    #[error("profanity service connection failed: {0}")]
    Connect(String),

    #[error("profanity request timed out")]
    Timeout,

    #[error("invalid profanity response: {0}")]
    InvalidResponse(String),

    #[error("profanity service unavailable: {0}")]
    Unavailable(String),
}

impl ProfanityError {
    /// Failures that say the service is unhealthy rather than that the
    /// request was wrong.
    pub fn is_transient(&self) -> bool {
        match self {
            ProfanityError::Status(status) => is_transient_status(*status),
            ProfanityError::Connect(_) | ProfanityError::Timeout => true,
            ProfanityError::InvalidResponse(_) | ProfanityError::Unavailable(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProfanityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProfanityError::Timeout
        } else if let Some(status) = e.status() {
            ProfanityError::Status(status.as_u16())
        } else if e.is_decode() {
            ProfanityError::InvalidResponse(e.to_string())
        } else {
            ProfanityError::Connect(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    contains: bool,
    #[serde(default)]
    words: Vec<String>,
}

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Service,
    LocalList,
    Allowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub contains: bool,
    pub words: Vec<String>,
    pub source: VerdictSource,
}

pub struct ProfanityClient {
    http: reqwest::Client,
    base_url: String,
    caller: ResilientCaller<ProfanityError>,
    fallback: FallbackPolicy,
    /// Last known word list, lowercased.
    words: RwLock<HashSet<String>>,
}

impl ProfanityClient {
    pub fn new(config: &ProfanityConfig, breaker: Arc<CircuitBreaker>) -> Result<Self, ProfanityError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.attempt_timeout())
            .build()
            .map_err(|e| ProfanityError::Connect(e.to_string()))?;

        let caller = ResilientCaller::new(breaker)
            .with_retry(config.retry_policy())
            .with_attempt_timeout(config.attempt_timeout())
            .with_classifier(|e: &ProfanityError| e.is_transient());

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            caller,
            fallback: config.fallback,
            words: RwLock::new(
                config
                    .seed_words()
                    .into_iter()
                    .map(|w| w.to_lowercase())
                    .collect(),
            ),
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.caller.breaker()
    }

    /// Snapshot of the last known word list, sorted.
    pub fn known_words(&self) -> Vec<String> {
        let mut words: Vec<_> = self.words.read().iter().cloned().collect();
        words.sort();
        words
    }

    pub async fn contains_profanity(&self, text: &str) -> Result<bool, ProfanityError> {
        self.check(text).await.map(|verdict| verdict.contains)
    }

    /// Checks `text`, falling back per policy when the service is unavailable.
    pub async fn check(&self, text: &str) -> Result<Verdict, ProfanityError> {
        match self.caller.call(|| self.request(text)).await {
            Ok(response) => {
                self.learn(&response.words);
                Ok(Verdict {
                    contains: response.contains,
                    words: response.words,
                    source: VerdictSource::Service,
                })
            }
            Err(CallError::Rejected(e)) => Err(e),
            Err(err @ CallError::DependencyUnavailable { .. }) => {
                tracing::warn!(error = %err, fallback = ?self.fallback, "profanity check degraded");
                match self.fallback {
                    FallbackPolicy::LocalList => {
                        let words = find_words(text, &self.words.read());
                        Ok(Verdict {
                            contains: !words.is_empty(),
                            words,
                            source: VerdictSource::LocalList,
                        })
                    }
                    FallbackPolicy::Allow => Ok(Verdict {
                        contains: false,
                        words: Vec::new(),
                        source: VerdictSource::Allowed,
                    }),
                    FallbackPolicy::Reject => Err(ProfanityError::Unavailable(err.to_string())),
                }
            }
        }
    }

    async fn request(&self, text: &str) -> Result<CheckResponse, ProfanityError> {
        let response = self
            .http
            .get(format!("{}/api/profanity/check", self.base_url))
            .query(&[("text", text)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProfanityError::Status(status.as_u16()));
        }
        Ok(response.json::<CheckResponse>().await?)
    }

    /// Adds words reported by the service to the local list.
    fn learn(&self, words: &[String]) {
        if words.is_empty() {
            return;
        }
        let mut known = self.words.write();
        for word in words {
            known.insert(word.to_lowercase());
        }
    }
}

impl std::fmt::Debug for ProfanityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfanityClient")
            .field("base_url", &self.base_url)
            .field("fallback", &self.fallback)
            .field("caller", &self.caller)
            .finish()
    }
}

/// Words of `text` found in `list` (lowercased entries), in text order.
pub fn find_words(text: &str, list: &HashSet<String>) -> Vec<String> {
    text.split(DELIMITERS)
        .filter(|token| !token.is_empty())
        .filter(|token| list.contains(&token.to_lowercase()))
        .map(str::to_string)
        .collect()
}
