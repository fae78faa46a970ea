//! Key-value storage layer.
//!
//! Everything the bot persists (remembered chats, cached dialog messages,
//! contributed provider tokens, discussion modes and the rotation pool's
//! durable half) lives in one shared Redis database behind the
//! [`KeyValueStore`] trait. The trait keeps the token-rotation core testable
//! against an in-memory double and keeps Redis specifics out of the domain
//! modules.

mod chats;
mod contributors;
mod discussion;
#[cfg(test)]
pub mod memory;
mod messages;
mod redis_store;
mod scan;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use chats::ChatRegistry;
pub use contributors::{ContributorTokenStorage, ContributorTokens};
pub use discussion::{DiscussionMode, DiscussionModeStorage};
pub use messages::{CachedMessage, MessageCache};
pub use redis_store::RedisStore;
pub use scan::{all_matching_keys, first_matching_keys};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Async key-value store with TTL, pipelined bulk access and cursor scans.
///
/// Semantics follow Redis: `delete` of an absent key is not an error,
/// `scan_page` pages through the keyspace with `MATCH`-filtered pages that
/// may legitimately be empty while the cursor is still nonzero, and callers
/// iterate until the returned cursor is 0.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Set a value, with an optional time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<(), StorageError>;

    /// Delete a key. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Pipelined multi-get, one result slot per requested key.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError>;

    /// Pipelined multi-set with a shared optional TTL.
    async fn mset(
        &self,
        pairs: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// One page of a cursor scan. Returns `(next_cursor, matched_keys)`;
    /// a zero next-cursor means the iteration is complete.
    async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
    ) -> Result<(u64, Vec<String>), StorageError>;
}
