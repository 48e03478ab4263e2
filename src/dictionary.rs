//! Entity dictionary cache
//!
//! Holds the known hotel names and their derived keywords. Rebuilt wholesale
//! from the data store on a TTL; refreshes are single-flighted so concurrent
//! classification calls never issue duplicate loads, and the last good
//! snapshot keeps serving while a refresh is in flight or failing.

use crate::error::Result;
use crate::store::DataStore;
use itertools::Itertools;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Immutable snapshot of the dictionary, cheap to clone per classification.
#[derive(Debug, Clone, Default)]
pub struct EntityDictionary {
    /// Canonical names, lower-cased, in store order.
    names: Vec<String>,
    /// Keywords derived from the names, first-seen order, deduplicated.
    keywords: Vec<String>,
    keyword_set: HashSet<String>,
}

impl EntityDictionary {
    pub fn from_names(raw_names: &[String]) -> Self {
        let names: Vec<String> = raw_names.iter().map(|n| normalize_name(n)).collect();

        let mut keywords = Vec::new();
        let mut keyword_set = HashSet::new();
        for name in &names {
            for token in tokenize(name) {
                if keyword_set.insert(token.clone()) {
                    keywords.push(token);
                }
            }
        }

        Self {
            names,
            keywords,
            keyword_set,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True if any derived keyword occurs in the lower-cased message.
    pub fn keyword_hit(&self, lowered_message: &str) -> bool {
        self.keyword_set.iter().any(|k| lowered_message.contains(k))
    }

    /// Canonical names ordered most-specific-first (longest first), so a
    /// generic alias never shadows a specific one during substring detection.
    pub fn names_by_specificity(&self) -> Vec<String> {
        self.names
            .iter()
            .cloned()
            .sorted_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)))
            .collect()
    }
}

/// Canonical form of a store name: lower-cased, hyphen/underscore folded to
/// single spaces. Users type hotel names with spaces, so a hyphenated store
/// spelling must still exact-match their messages.
fn normalize_name(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive keywords: split on whitespace/hyphen/underscore, drop tokens of
/// length <= 2.
fn tokenize(name: &str) -> Vec<String> {
    name.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}

struct CacheState {
    dictionary: EntityDictionary,
    last_refresh: Option<Instant>,
}

pub struct EntityDictionaryCache {
    store: Arc<dyn DataStore>,
    ttl: Duration,
    state: RwLock<CacheState>,
    /// Serialises refreshes; waiters re-check freshness after acquiring it.
    refresh_gate: Mutex<()>,
}

impl EntityDictionaryCache {
    pub fn new(store: Arc<dyn DataStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            state: RwLock::new(CacheState {
                dictionary: EntityDictionary::default(),
                last_refresh: None,
            }),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Refresh the dictionary if the TTL has elapsed. No-op while fresh.
    ///
    /// Store failures are logged and swallowed: classification degrades to the
    /// last good snapshot instead of failing outright.
    pub async fn refresh(&self, now: Instant) -> Result<()> {
        if self.is_fresh(now).await {
            return Ok(());
        }

        let _gate = self.refresh_gate.lock().await;
        // Another caller may have finished the refresh while we waited.
        if self.is_fresh(now).await {
            debug!("Dictionary refresh already completed by concurrent caller");
            return Ok(());
        }

        match self.store.list_entity_names().await {
            Ok(names) => {
                let dictionary = EntityDictionary::from_names(&names);
                info!(
                    "Refreshed entity dictionary: {} names, {} keywords",
                    dictionary.names().len(),
                    dictionary.keywords().len()
                );
                let mut state = self.state.write().await;
                state.dictionary = dictionary;
                state.last_refresh = Some(now);
            }
            Err(e) => {
                warn!("Entity dictionary refresh failed, serving stale data: {}", e);
            }
        }
        Ok(())
    }

    async fn is_fresh(&self, now: Instant) -> bool {
        let state = self.state.read().await;
        match state.last_refresh {
            Some(at) => now.saturating_duration_since(at) < self.ttl,
            None => false,
        }
    }

    pub async fn snapshot(&self) -> EntityDictionary {
        self.state.read().await.dictionary.clone()
    }
}
