//! Per-chat AI discussion mode selection.

use std::sync::Arc;

use anyhow::Result;

use super::KeyValueStore;

/// Which provider answers in a chat. OpenAI is the implicit default when no
/// mode was ever selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscussionMode {
    #[default]
    OpenAi,
    Perplexity,
}

impl DiscussionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Perplexity => "perplexity",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Self::OpenAi),
            "perplexity" => Some(Self::Perplexity),
            _ => None,
        }
    }

    /// Human-readable name for bot replies.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Perplexity => "Perplexity",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::OpenAi => Self::Perplexity,
            Self::Perplexity => Self::OpenAi,
        }
    }
}

/// Stores the selected mode per chat, and per chat+contributor for
/// contributor-driven chats.
#[derive(Clone)]
pub struct DiscussionModeStorage {
    store: Arc<dyn KeyValueStore>,
    bot_id: u64,
}

impl DiscussionModeStorage {
    pub fn new(store: Arc<dyn KeyValueStore>, bot_id: u64) -> Self {
        Self { store, bot_id }
    }

    fn key_chat(&self, chat_id: i64) -> String {
        format!("{}:discussion:{chat_id}", self.bot_id)
    }

    fn key_contributor(&self, chat_id: i64, user_id: u64) -> String {
        format!("{}:discussion:{chat_id}:{user_id}", self.bot_id)
    }

    pub async fn chat_mode(&self, chat_id: i64) -> Result<Option<DiscussionMode>> {
        let value = self.store.get(&self.key_chat(chat_id)).await?;
        Ok(value.as_deref().and_then(DiscussionMode::parse))
    }

    pub async fn set_chat_mode(&self, chat_id: i64, mode: DiscussionMode) -> Result<()> {
        self.store
            .set(&self.key_chat(chat_id), mode.as_str(), None)
            .await?;
        Ok(())
    }

    pub async fn contributor_mode(
        &self,
        chat_id: i64,
        user_id: u64,
    ) -> Result<Option<DiscussionMode>> {
        let value = self.store.get(&self.key_contributor(chat_id, user_id)).await?;
        Ok(value.as_deref().and_then(DiscussionMode::parse))
    }

    pub async fn set_contributor_mode(
        &self,
        chat_id: i64,
        user_id: u64,
        mode: DiscussionMode,
    ) -> Result<()> {
        self.store
            .set(&self.key_contributor(chat_id, user_id), mode.as_str(), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::*;

    #[tokio::test]
    async fn chat_mode_roundtrip() {
        let storage = DiscussionModeStorage::new(Arc::new(MemoryStore::new()), 7);
        assert_eq!(storage.chat_mode(-1).await.unwrap(), None);

        storage
            .set_chat_mode(-1, DiscussionMode::Perplexity)
            .await
            .unwrap();
        assert_eq!(
            storage.chat_mode(-1).await.unwrap(),
            Some(DiscussionMode::Perplexity)
        );
    }

    #[tokio::test]
    async fn contributor_mode_is_scoped() {
        let storage = DiscussionModeStorage::new(Arc::new(MemoryStore::new()), 7);
        storage
            .set_contributor_mode(-1, 10, DiscussionMode::Perplexity)
            .await
            .unwrap();

        assert_eq!(
            storage.contributor_mode(-1, 10).await.unwrap(),
            Some(DiscussionMode::Perplexity)
        );
        assert_eq!(storage.contributor_mode(-1, 11).await.unwrap(), None);
        assert_eq!(storage.chat_mode(-1).await.unwrap(), None);
    }

    #[test]
    fn toggling_flips_between_providers() {
        assert_eq!(DiscussionMode::OpenAi.toggled(), DiscussionMode::Perplexity);
        assert_eq!(DiscussionMode::Perplexity.toggled(), DiscussionMode::OpenAi);
        assert_eq!(DiscussionMode::parse("perplexity"), Some(DiscussionMode::Perplexity));
        assert_eq!(DiscussionMode::parse("unknown"), None);
    }
}
