//! In-memory [`KeyValueStore`] for tests.
//!
//! Mimics the Redis semantics the bot relies on: TTL expiry on read and a
//! paged cursor scan where an intermediate page may match nothing while the
//! cursor is still nonzero.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{KeyValueStore, StorageError};

/// Number of raw keys inspected per scan page. Deliberately tiny so tests
/// exercise multi-page iteration and empty intermediate pages.
const SCAN_PAGE_SIZE: usize = 3;

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, (String, Option<Instant>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(entry: &(String, Option<Instant>)) -> Option<String> {
        match entry.1 {
            Some(expires_at) if Instant::now() >= expires_at => None,
            _ => Some(entry.0.clone()),
        }
    }

    fn matches(pattern: &str, key: &str) -> bool {
        // Only the `prefix*` glob form is used in this codebase.
        match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut entries = self.entries.lock();
        match entries.get(key).map(Self::live_value) {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|key| entries.get(key).and_then(Self::live_value))
            .collect())
    }

    async fn mset(
        &self,
        pairs: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.lock();
        for (key, value) in pairs {
            entries.insert(key.clone(), (value.clone(), expires_at));
        }
        Ok(())
    }

    async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
    ) -> Result<(u64, Vec<String>), StorageError> {
        let entries = self.entries.lock();
        let all_keys: Vec<&String> = entries.keys().collect();

        let offset = cursor as usize;
        let page: Vec<String> = all_keys
            .iter()
            .skip(offset)
            .take(SCAN_PAGE_SIZE)
            .filter(|key| Self::matches(pattern, key))
            .map(|key| key.to_string())
            .collect();

        let consumed = offset + SCAN_PAGE_SIZE;
        let next = if consumed >= all_keys.len() {
            0
        } else {
            consumed as u64
        };
        Ok((next, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires() {
        let store = MemoryStore::new();
        store
            .set("gone", "1", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("gone").await.unwrap(), None);
        assert_eq!(store.mget(&["gone".into()]).await.unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn scan_pages_through_everything() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.set(&format!("p:{i}"), "x", None).await.unwrap();
        }
        store.set("other", "x", None).await.unwrap();

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, page) = store.scan_page(cursor, "p:*").await.unwrap();
            found.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(found.len(), 10);
        assert!(!found.contains(&"other".to_string()));
    }
}
