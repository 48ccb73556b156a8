//! Response cache keyed by normalized input and a context token

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CacheConfig;

struct CacheEntry {
    value: String,
    inserted_at: Instant,
    /// Access tick; the smallest is least recently used
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_one(&mut self) {
        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());

        if let Some(key) = lru {
            tracing::debug!("Evicting cache entry {}", &key[..12]);
            self.entries.remove(&key);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage, rounded to two decimals
    pub hit_rate: f64,
    pub ttl_seconds: u64,
}

/// TTL + LRU cache of final responses
///
/// Expiry is lazy: an entry older than the TTL is dropped when it is read.
pub struct ResponseCache {
    config: CacheConfig,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_seconds),
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Trim, collapse whitespace, lowercase
    pub fn normalize(input: &str) -> String {
        input
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// SHA-256 hex of the normalized input and the context token
    pub fn cache_key(input: &str, context: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Self::normalize(input).as_bytes());
        hasher.update([0u8]);
        hasher.update(context.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, input: &str, context: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let key = Self::cache_key(input, context);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let tick = state.next_tick();

        let expired = match state.entries.get_mut(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                entry.last_used = tick;
                let value = entry.value.clone();
                state.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(&key);
        }
        state.misses += 1;
        None
    }

    pub async fn set(&self, input: &str, context: &str, value: impl Into<String>) {
        if !self.config.enabled || self.config.max_size == 0 {
            return;
        }

        let key = Self::cache_key(input, context);
        let mut state = self.state.lock().await;
        let tick = state.next_tick();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_size {
            state.evict_one();
        }

        state.entries.insert(
            key,
            CacheEntry {
                value: value.into(),
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    /// Drop every entry and reset the hit/miss counters
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        *state = CacheState::default();
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let lookups = state.hits + state.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (state.hits as f64 / lookups as f64 * 10_000.0).round() / 100.0
        };

        CacheStats {
            enabled: self.config.enabled,
            size: state.entries.len(),
            max_size: self.config.max_size,
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            ttl_seconds: self.config.ttl_seconds,
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
