//! Redis-backed [`KeyValueStore`].

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use super::{KeyValueStore, StorageError};

/// Shared Redis handle.
///
/// Wraps a multiplexed [`ConnectionManager`], so cloning is cheap and every
/// caller talks over the same reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)?;
        let mut manager = client.get_connection_manager().await?;

        redis::cmd("PING").query_async::<()>(&mut manager).await?;
        info!("Successfully connected to Redis");

        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => conn.set_ex(key, value, ttl.as_secs().max(1)).await?,
            None => conn.set(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.get(key);
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        Ok(values)
    }

    async fn mset(
        &self,
        pairs: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in pairs {
            match ttl {
                Some(ttl) => {
                    pipe.set_ex(key, value, ttl.as_secs().max(1)).ignore();
                }
                None => {
                    pipe.set(key, value).ignore();
                }
            }
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
    ) -> Result<(u64, Vec<String>), StorageError> {
        let mut conn = self.conn();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(100)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }
}
