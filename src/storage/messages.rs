//! Short-lived cache of chat messages for dialog context.
//!
//! Telegram only hands the bot the directly replied-to message, so deeper
//! reply chains are reconstructed from this cache. Entries share one TTL;
//! a chain link that expired simply ends the walk early.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use super::KeyValueStore;

/// One cached message: enough to rebuild a provider dialog turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub text: String,
    pub sender_id: u64,
    pub reply_to: Option<i32>,
}

#[derive(Clone)]
pub struct MessageCache {
    store: Arc<dyn KeyValueStore>,
    bot_id: u64,
    ttl: Duration,
}

impl MessageCache {
    pub fn new(store: Arc<dyn KeyValueStore>, bot_id: u64, ttl: Duration) -> Self {
        Self { store, bot_id, ttl }
    }

    fn key_text(&self, chat_id: i64, message_id: i32) -> String {
        format!("{}:messages:{chat_id}:{message_id}:text", self.bot_id)
    }

    fn key_sender(&self, chat_id: i64, message_id: i32) -> String {
        format!("{}:messages:{chat_id}:{message_id}:sender", self.bot_id)
    }

    fn key_reply_to(&self, chat_id: i64, message_id: i32) -> String {
        format!("{}:messages:{chat_id}:{message_id}:reply_to", self.bot_id)
    }

    /// Store one message. All fields go out in a single pipelined write.
    pub async fn remember(
        &self,
        chat_id: i64,
        message_id: i32,
        message: &CachedMessage,
    ) -> Result<()> {
        let mut pairs = vec![
            (self.key_text(chat_id, message_id), message.text.clone()),
            (
                self.key_sender(chat_id, message_id),
                message.sender_id.to_string(),
            ),
        ];
        if let Some(reply_to) = message.reply_to {
            pairs.push((self.key_reply_to(chat_id, message_id), reply_to.to_string()));
        }
        self.store.mset(&pairs, Some(self.ttl)).await?;
        Ok(())
    }

    /// Fetch one message, or `None` if it never existed or has expired.
    pub async fn get(&self, chat_id: i64, message_id: i32) -> Result<Option<CachedMessage>> {
        let keys = vec![
            self.key_text(chat_id, message_id),
            self.key_sender(chat_id, message_id),
            self.key_reply_to(chat_id, message_id),
        ];
        let mut values = self.store.mget(&keys).await?.into_iter();

        let text = values.next().flatten();
        let sender = values.next().flatten();
        let reply_to = values.next().flatten();

        let (Some(text), Some(sender)) = (text, sender) else {
            return Ok(None);
        };
        let Ok(sender_id) = sender.parse() else {
            return Ok(None);
        };
        Ok(Some(CachedMessage {
            text,
            sender_id,
            reply_to: reply_to.and_then(|id| id.parse().ok()),
        }))
    }

    /// Walk the reply chain upwards, oldest message first.
    ///
    /// Starts from the message the incoming one replies to and follows each
    /// cached `reply_to` link, up to `depth` messages. Missing links end the
    /// walk.
    pub async fn dialog_context(
        &self,
        chat_id: i64,
        reply_to: Option<i32>,
        depth: usize,
    ) -> Result<Vec<CachedMessage>> {
        let mut chain = Vec::new();
        let mut next = reply_to;
        let mut remaining = depth;

        while let Some(message_id) = next {
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            match self.get(chat_id, message_id).await? {
                Some(message) => {
                    next = message.reply_to;
                    chain.push(message);
                }
                None => break,
            }
        }

        debug!(chat_id, found = chain.len(), "rebuilt dialog context");
        chain.reverse();
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::*;

    fn cache() -> MessageCache {
        MessageCache::new(Arc::new(MemoryStore::new()), 7, Duration::from_secs(600))
    }

    fn msg(text: &str, sender_id: u64, reply_to: Option<i32>) -> CachedMessage {
        CachedMessage {
            text: text.to_string(),
            sender_id,
            reply_to,
        }
    }

    #[tokio::test]
    async fn roundtrip() {
        let cache = cache();
        let original = msg("hello", 100, Some(5));
        cache.remember(-1, 10, &original).await.unwrap();
        assert_eq!(cache.get(-1, 10).await.unwrap(), Some(original));
        assert_eq!(cache.get(-1, 11).await.unwrap(), None);
    }

    #[tokio::test]
    async fn context_is_oldest_first_and_depth_bounded() {
        let cache = cache();
        cache.remember(-1, 1, &msg("first", 100, None)).await.unwrap();
        cache.remember(-1, 2, &msg("second", 7, Some(1))).await.unwrap();
        cache.remember(-1, 3, &msg("third", 100, Some(2))).await.unwrap();

        let chain = cache.dialog_context(-1, Some(3), 10).await.unwrap();
        let texts: Vec<&str> = chain.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);

        let shallow = cache.dialog_context(-1, Some(3), 2).await.unwrap();
        let texts: Vec<&str> = shallow.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn broken_link_ends_walk() {
        let cache = cache();
        // Message 2 replies to message 1 which was never cached.
        cache.remember(-1, 2, &msg("tail", 7, Some(1))).await.unwrap();

        let chain = cache.dialog_context(-1, Some(2), 10).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].text, "tail");
    }
}
