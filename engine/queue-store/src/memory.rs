//! In-process queue store
//!
//! Mirrors the Redis list/TTL semantics exactly, including
//! `rename_if_absent` and expiring marker keys. Used by unit tests and the
//! integration driver so the pipeline can run without external services.

use crate::error::{Result, StoreError};
use crate::store::QueueStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Default)]
struct MemoryState {
    /// List keys; the front of each deque is index 0 (the newest entry)
    lists: HashMap<String, VecDeque<String>>,
    /// Plain values with an optional expiry deadline
    values: HashMap<String, (String, Option<Instant>)>,
}

impl MemoryState {
    fn drop_expired(&mut self, key: &str) {
        if let Some((_, Some(deadline))) = self.values.get(key) {
            if Instant::now() >= *deadline {
                self.values.remove(key);
            }
        }
    }
}

/// Queue store implementation held entirely in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Translate a possibly negative list index into a concrete offset.
/// Out-of-range indices clamp the way Redis clamps them.
fn resolve_index(index: i64, len: usize) -> i64 {
    if index < 0 {
        len as i64 + index
    } else {
        index
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push_front(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.lists.entry(key.to_string()).or_default().push_front(value.to_string());
        Ok(())
    }

    async fn push_front_many(&self, key: &str, values: &[String]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        for value in values {
            list.push_front(value.clone());
        }
        Ok(values.len())
    }

    async fn pop_back(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        let value = match state.lists.get_mut(key) {
            Some(list) => list.pop_back(),
            None => None,
        };
        if state.lists.get(key).is_some_and(|list| list.is_empty()) {
            state.lists.remove(key);
        }
        Ok(value)
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };

        let len = list.len();
        let start = resolve_index(start, len).max(0);
        let stop = resolve_index(stop, len).min(len as i64 - 1);
        if start > stop {
            return Ok(Vec::new());
        }

        Ok(list.iter().skip(start as usize).take((stop - start + 1) as usize).cloned().collect())
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let retained: VecDeque<String> = match state.lists.get(key) {
            Some(list) => {
                let len = list.len();
                let start = resolve_index(start, len).max(0);
                let stop = resolve_index(stop, len).min(len as i64 - 1);
                if start > stop {
                    VecDeque::new()
                } else {
                    list.iter()
                        .skip(start as usize)
                        .take((stop - start + 1) as usize)
                        .cloned()
                        .collect()
                }
            }
            None => return Ok(()),
        };

        if retained.is_empty() {
            state.lists.remove(key);
        } else {
            state.lists.insert(key.to_string(), retained);
        }
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.lists.get(key).map_or(0, |list| list.len()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.drop_expired(key);
        Ok(state.lists.contains_key(key) || state.values.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let had_list = state.lists.remove(key).is_some();
        let had_value = state.values.remove(key).is_some();
        Ok(had_list || had_value)
    }

    async fn rename_if_absent(&self, src: &str, dst: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.lists.contains_key(dst) {
            return Ok(false);
        }
        if state.values.contains_key(src) {
            return Err(StoreError::WrongType(src.to_string()));
        }
        match state.lists.remove(src) {
            Some(list) => {
                state.lists.insert(dst.to_string(), list);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        state.values.insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_range_order() {
        let store = MemoryStore::new();
        store.push_front("list", "a").await.unwrap();
        store.push_front("list", "b").await.unwrap();
        store.push_front("list", "c").await.unwrap();

        // Index 0 is the newest entry, -1 the oldest
        let all = store.range("list", 0, -1).await.unwrap();
        assert_eq!(all, vec!["c", "b", "a"]);

        // Tail window keeps list order, ending with the oldest
        let tail = store.range("list", -2, -1).await.unwrap();
        assert_eq!(tail, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_trim_drops_tail() {
        let store = MemoryStore::new();
        for value in ["a", "b", "c", "d"] {
            store.push_front("list", value).await.unwrap();
        }

        // Keep everything but the two oldest entries
        store.trim("list", 0, -3).await.unwrap();
        let remaining = store.range("list", 0, -1).await.unwrap();
        assert_eq!(remaining, vec!["d", "c"]);

        // Trimming to an inverted range empties the list
        store.trim("list", 0, -5).await.unwrap();
        assert_eq!(store.len("list").await.unwrap(), 0);
        assert!(!store.exists("list").await.unwrap());
    }

    #[tokio::test]
    async fn test_pop_back_returns_oldest() {
        let store = MemoryStore::new();
        store.push_front("list", "first").await.unwrap();
        store.push_front("list", "second").await.unwrap();

        assert_eq!(store.pop_back("list").await.unwrap(), Some("first".to_string()));
        assert_eq!(store.pop_back("list").await.unwrap(), Some("second".to_string()));
        assert_eq!(store.pop_back("list").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rename_if_absent() {
        let store = MemoryStore::new();
        store.push_front("src", "x").await.unwrap();

        assert!(store.rename_if_absent("src", "dst").await.unwrap());
        assert!(!store.exists("src").await.unwrap());
        assert_eq!(store.len("dst").await.unwrap(), 1);

        // Target taken: rename refused
        store.push_front("src", "y").await.unwrap();
        assert!(!store.rename_if_absent("src", "dst").await.unwrap());
        assert_eq!(store.len("src").await.unwrap(), 1);

        // Missing source is not an error
        assert!(!store.rename_if_absent("missing", "elsewhere").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_expiry() {
        let store = MemoryStore::new();
        store.set_with_expiry("marker", "1", 5).await.unwrap();
        assert!(store.exists("marker").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!store.exists("marker").await.unwrap());
    }
}
