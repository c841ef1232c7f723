//! InMemoryCache - 開発・テスト用のキーバリューストア
//!
//! 期限は `tokio::time::Instant` で管理するので、paused time のテストでも動きます。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::ports::{Cache, CacheError, SetCondition, SetOptions};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    unavailable: bool,
}

impl CacheState {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable {
            return Err(CacheError::Unavailable("in-memory cache marked down".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, down: bool) {
        self.state().unavailable = down;
    }

    fn add(&self, key: &str, amount: i64) -> Result<i64, CacheError> {
        let mut state = self.state();
        state.check()?;
        let next = match state.live(key) {
            Some(entry) => {
                let current: i64 = entry
                    .value
                    .parse()
                    .map_err(|_| CacheError::NotAnInteger(key.to_string()))?;
                let next = current
                    .checked_add(amount)
                    .ok_or_else(|| CacheError::Overflow(key.to_string()))?;
                entry.value = next.to_string();
                next
            }
            None => {
                state.entries.insert(
                    key.to_string(),
                    Entry {
                        value: amount.to_string(),
                        expires_at: None,
                    },
                );
                amount
            }
        };
        Ok(next)
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut state = self.state();
        state.check()?;
        Ok(state.live(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, CacheError> {
        let mut state = self.state();
        state.check()?;
        let exists = state.live(key).is_some();
        let allowed = match options.condition {
            SetCondition::Always => true,
            SetCondition::IfNotExists => !exists,
            SetCondition::IfExists => exists,
        };
        if !allowed {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: options.expire.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<i64, CacheError> {
        self.add(key, amount)
    }

    async fn decr(&self, key: &str, amount: i64) -> Result<i64, CacheError> {
        let amount = amount
            .checked_neg()
            .ok_or_else(|| CacheError::Overflow(key.to_string()))?;
        self.add(key, amount)
    }
}
