//! Per-user, per-chat contributed provider tokens.
//!
//! A user who hands the bot their own OpenAI or Perplexity key activates the
//! completion feature for themselves in the chats they name. Tokens are
//! ciphered at rest when a [`Crypto`] engine is configured.
//!
//! This storage is intentionally separate from the rotation pool: the pool
//! may evict a token from its own scope while the contributor entry here
//! keeps living until the contributor flow itself deletes it.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::crypto::Crypto;

use super::KeyValueStore;

/// Both provider tokens a contributor may have supplied for one chat.
#[derive(Debug, Default, Clone)]
pub struct ContributorTokens {
    pub openai: Option<String>,
    pub perplexity: Option<String>,
}

#[derive(Clone)]
pub struct ContributorTokenStorage {
    store: Arc<dyn KeyValueStore>,
    bot_id: u64,
    crypto: Option<Crypto>,
}

impl ContributorTokenStorage {
    pub fn new(store: Arc<dyn KeyValueStore>, bot_id: u64, crypto: Option<Crypto>) -> Self {
        Self { store, bot_id, crypto }
    }

    fn key_openai(&self, user_id: u64, chat_id: i64) -> String {
        format!("{}:contributors:{user_id}:{chat_id}:openai", self.bot_id)
    }

    fn key_perplexity(&self, user_id: u64, chat_id: i64) -> String {
        format!("{}:contributors:{user_id}:{chat_id}:perplexity", self.bot_id)
    }

    fn cipher(&self, token: &str) -> Result<String> {
        match &self.crypto {
            Some(crypto) => Ok(crypto.encrypt_str(token)?),
            None => Ok(token.to_string()),
        }
    }

    /// Decipher a stored value; an undecipherable entry is dropped with a
    /// warning instead of poisoning the whole lookup.
    fn decipher(&self, stored: String) -> Option<String> {
        match &self.crypto {
            Some(crypto) => match crypto.decrypt_str(&stored) {
                Ok(token) => Some(token),
                Err(error) => {
                    warn!(%error, "skipping undecipherable contributor token");
                    None
                }
            },
            None => Some(stored),
        }
    }

    /// Both tokens for a user in a chat, fetched in one pipelined read.
    pub async fn get(&self, user_id: u64, chat_id: i64) -> Result<ContributorTokens> {
        let keys = vec![
            self.key_openai(user_id, chat_id),
            self.key_perplexity(user_id, chat_id),
        ];
        let mut values = self.store.mget(&keys).await?.into_iter();
        Ok(ContributorTokens {
            openai: values.next().flatten().and_then(|v| self.decipher(v)),
            perplexity: values.next().flatten().and_then(|v| self.decipher(v)),
        })
    }

    /// Whether the user contributed any token for this chat.
    pub async fn has_any(&self, user_id: u64, chat_id: i64) -> Result<bool> {
        let tokens = self.get(user_id, chat_id).await?;
        Ok(tokens.openai.is_some() || tokens.perplexity.is_some())
    }

    pub async fn set_openai_token(&self, user_id: u64, chat_id: i64, token: &str) -> Result<()> {
        let value = self.cipher(token)?;
        self.store
            .set(&self.key_openai(user_id, chat_id), &value, None)
            .await?;
        Ok(())
    }

    pub async fn set_perplexity_token(
        &self,
        user_id: u64,
        chat_id: i64,
        token: &str,
    ) -> Result<()> {
        let value = self.cipher(token)?;
        self.store
            .set(&self.key_perplexity(user_id, chat_id), &value, None)
            .await?;
        Ok(())
    }

    /// Returns whether a token was actually stored.
    pub async fn delete_openai_token(&self, user_id: u64, chat_id: i64) -> Result<bool> {
        Ok(self.store.delete(&self.key_openai(user_id, chat_id)).await?)
    }

    pub async fn delete_perplexity_token(&self, user_id: u64, chat_id: i64) -> Result<bool> {
        Ok(self
            .store
            .delete(&self.key_perplexity(user_id, chat_id))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;

    use super::super::memory::MemoryStore;
    use super::*;
    use crate::crypto::KEY_LEN;

    fn storage(crypto: Option<Crypto>) -> (Arc<MemoryStore>, ContributorTokenStorage) {
        let store = Arc::new(MemoryStore::new());
        let storage = ContributorTokenStorage::new(store.clone(), 7, crypto);
        (store, storage)
    }

    fn test_crypto() -> Crypto {
        Crypto::from_base64_key(&BASE64.encode([3u8; KEY_LEN])).unwrap()
    }

    #[tokio::test]
    async fn plaintext_roundtrip_without_crypto() {
        let (_, storage) = storage(None);
        storage.set_openai_token(1, -5, "sk-test").await.unwrap();

        let tokens = storage.get(1, -5).await.unwrap();
        assert_eq!(tokens.openai.as_deref(), Some("sk-test"));
        assert_eq!(tokens.perplexity, None);
        assert!(storage.has_any(1, -5).await.unwrap());
        assert!(!storage.has_any(1, -6).await.unwrap());
    }

    #[tokio::test]
    async fn tokens_are_ciphered_at_rest() {
        let (store, storage) = storage(Some(test_crypto()));
        storage.set_perplexity_token(1, -5, "pplx-key").await.unwrap();

        let raw = store
            .get("7:contributors:1:-5:perplexity")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(raw, "pplx-key");

        let tokens = storage.get(1, -5).await.unwrap();
        assert_eq!(tokens.perplexity.as_deref(), Some("pplx-key"));
    }

    #[tokio::test]
    async fn undecipherable_token_is_skipped() {
        let (store, storage) = storage(Some(test_crypto()));
        store
            .set("7:contributors:1:-5:openai", "garbage", None)
            .await
            .unwrap();

        let tokens = storage.get(1, -5).await.unwrap();
        assert_eq!(tokens.openai, None);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let (_, storage) = storage(None);
        storage.set_openai_token(1, -5, "sk-test").await.unwrap();
        assert!(storage.delete_openai_token(1, -5).await.unwrap());
        assert!(!storage.delete_openai_token(1, -5).await.unwrap());
        assert!(!storage.has_any(1, -5).await.unwrap());
    }
}
