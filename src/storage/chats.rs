//! Registry of chats the bot lives in.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use moka::sync::Cache;
use tracing::{debug, warn};

use super::{KeyValueStore, all_matching_keys};

/// How long a chat id stays in the local write-suppression cache before the
/// next message re-asserts the Redis entry.
const SEEN_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Durable set of every chat the bot has seen, keyed per chat id.
///
/// Every handled message passes through [`ChatRegistry::remember`], so a hot
/// in-process cache suppresses the redundant Redis writes.
#[derive(Clone)]
pub struct ChatRegistry {
    store: Arc<dyn KeyValueStore>,
    bot_id: u64,
    seen: Cache<i64, ()>,
}

impl ChatRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, bot_id: u64) -> Self {
        let seen = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(SEEN_CACHE_TTL)
            .build();
        Self { store, bot_id, seen }
    }

    fn prefix(&self) -> String {
        format!("{}:chats:", self.bot_id)
    }

    fn key(&self, chat_id: i64) -> String {
        format!("{}{chat_id}", self.prefix())
    }

    fn chat_id_from_key(key: &str) -> Option<i64> {
        key.rsplit(':').next()?.parse().ok()
    }

    /// Record that the bot sees this chat.
    pub async fn remember(&self, chat_id: i64) -> Result<()> {
        if self.seen.contains_key(&chat_id) {
            return Ok(());
        }
        self.store
            .set(&self.key(chat_id), &chat_id.to_string(), None)
            .await?;
        self.seen.insert(chat_id, ());
        debug!(chat_id, "remembered chat");
        Ok(())
    }

    /// Drop a chat, e.g. after the bot was removed from it.
    pub async fn forget(&self, chat_id: i64) -> Result<()> {
        self.store.delete(&self.key(chat_id)).await?;
        self.seen.invalidate(&chat_id);
        debug!(chat_id, "forgot chat");
        Ok(())
    }

    /// All unique chat ids currently registered.
    pub async fn all_chat_ids(&self) -> Result<HashSet<i64>> {
        let pattern = format!("{}*", self.prefix());
        let keys = all_matching_keys(self.store.as_ref(), &pattern).await?;

        let mut chat_ids = HashSet::new();
        for key in keys {
            match Self::chat_id_from_key(&key) {
                Some(chat_id) => {
                    chat_ids.insert(chat_id);
                }
                None => warn!(%key, "unparseable chat registry key"),
            }
        }
        Ok(chat_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::*;

    #[tokio::test]
    async fn remember_and_enumerate() {
        let store = Arc::new(MemoryStore::new());
        let registry = ChatRegistry::new(store.clone(), 42);

        registry.remember(-100123).await.unwrap();
        registry.remember(555).await.unwrap();
        // Repeat writes are suppressed by the cache.
        registry.remember(555).await.unwrap();
        assert_eq!(store.len(), 2);

        let ids = registry.all_chat_ids().await.unwrap();
        assert_eq!(ids, HashSet::from([-100123, 555]));
    }

    #[tokio::test]
    async fn forget_removes_chat() {
        let store = Arc::new(MemoryStore::new());
        let registry = ChatRegistry::new(store, 42);

        registry.remember(1).await.unwrap();
        registry.forget(1).await.unwrap();
        assert!(registry.all_chat_ids().await.unwrap().is_empty());

        // The cache entry must not mask the delete.
        registry.remember(1).await.unwrap();
        assert_eq!(registry.all_chat_ids().await.unwrap().len(), 1);
    }

    #[test]
    fn parses_negative_chat_ids() {
        assert_eq!(ChatRegistry::chat_id_from_key("42:chats:-1001"), Some(-1001));
        assert_eq!(ChatRegistry::chat_id_from_key("42:chats:junk"), None);
    }
}
