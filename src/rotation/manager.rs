//! The rotating token pool and its request loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::crypto::Crypto;
use crate::storage::{KeyValueStore, StorageError, first_matching_keys};

use super::{ApiRequestManager, RotationError, RotationRules, TokenRequestResponse};

/// TTL applied to newly contributed tokens: two months.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600 * 24 * 60);

const DEFAULT_MAX_TOKENS_TO_LOAD: usize = 100;
const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(500);

/// Where a pooled token came from, and therefore how eviction treats it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PoolSlot {
    /// The operator-supplied token. Has no storage entry; eviction flags it
    /// failed for the rest of the process lifetime instead of deleting
    /// anything.
    Main,
    /// A contributed token, with its storage key for eviction.
    Stored(String),
}

/// Pool-backed request manager.
///
/// The pool maps token value to its storage key and is refreshed from the
/// store when empty, or when the reload interval elapsed while the pool sits
/// below its batch cap. Reload merges into the pool rather than replacing
/// it: a token the store has since expired stays usable until a provider
/// response actually rejects it. Selection is uniform-random; there is no
/// fairness or LRU guarantee.
///
/// The pool lock is never held across an await point. Two in-flight requests
/// can still interleave a reload with an eviction and briefly resurrect a
/// removed contributed token; the next rejection evicts it again, so this
/// stays accepted rather than locked away.
pub struct TokenManager {
    main_token: Option<String>,
    main_token_failed: AtomicBool,
    pool: RwLock<HashMap<String, PoolSlot>>,
    last_reload: Mutex<Option<Instant>>,
    rng: Mutex<StdRng>,
    store: Arc<dyn KeyValueStore>,
    crypto: Option<Crypto>,
    salt: String,
    max_tokens_to_load: usize,
    reload_interval: Duration,
    http: Client,
}

impl TokenManager {
    /// A manager may run with no main token at all, purely off contributed
    /// ones. `salt` namespaces this manager's keys inside the shared store.
    pub fn new(
        main_token: Option<String>,
        store: Arc<dyn KeyValueStore>,
        crypto: Option<Crypto>,
        salt: impl Into<String>,
    ) -> Self {
        let mut pool = HashMap::new();
        if let Some(token) = &main_token {
            pool.insert(token.clone(), PoolSlot::Main);
        }
        Self {
            main_token,
            main_token_failed: AtomicBool::new(false),
            pool: RwLock::new(pool),
            last_reload: Mutex::new(None),
            rng: Mutex::new(StdRng::from_rng(&mut rand::rng())),
            store,
            crypto,
            salt: salt.into(),
            max_tokens_to_load: DEFAULT_MAX_TOKENS_TO_LOAD,
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            http: Client::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_max_tokens_to_load(mut self, max_tokens_to_load: usize) -> Self {
        self.max_tokens_to_load = max_tokens_to_load;
        self
    }

    #[allow(dead_code)]
    pub fn with_reload_interval(mut self, reload_interval: Duration) -> Self {
        self.reload_interval = reload_interval;
        self
    }

    #[cfg(test)]
    fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn store_prefix(&self) -> String {
        format!("rotation:{}:", self.salt)
    }

    /// Number of tokens currently usable.
    pub fn pool_size(&self) -> usize {
        self.pool.read().len()
    }

    #[cfg(test)]
    fn pool_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.pool.read().keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Persist a contributed token and make it usable right away, with no
    /// reload round-trip in between.
    pub async fn add_token(
        &self,
        token: &str,
        key_salt: &str,
        ttl: Duration,
    ) -> Result<(), RotationError> {
        let key = format!("{}{key_salt}", self.store_prefix());
        let stored = match &self.crypto {
            Some(crypto) => crypto.encrypt_str(token)?,
            None => token.to_string(),
        };
        self.store.set(&key, &stored, Some(ttl)).await?;
        self.pool
            .write()
            .insert(token.to_string(), PoolSlot::Stored(key));
        info!(salt = %self.salt, "added contributed token to the pool");
        Ok(())
    }

    /// Evict a token from the pool.
    ///
    /// The main token is flagged failed and never used again for the life of
    /// the process. A contributed token is also deleted from the store,
    /// best-effort: a failed delete means the entry is already gone and is
    /// logged, not surfaced.
    pub async fn remove_token(&self, token: &str) {
        let slot = self.pool.write().remove(token);
        match slot {
            Some(PoolSlot::Main) => {
                self.main_token_failed.store(true, Ordering::SeqCst);
                warn!("main token flagged failed; it stays out until restart");
            }
            Some(PoolSlot::Stored(key)) => {
                info!(salt = %self.salt, "evicting contributed token");
                if let Err(error) = self.store.delete(&key).await {
                    warn!(%error, "could not delete stored token, assuming already gone");
                }
            }
            None => debug!("token already absent from the pool"),
        }
    }

    fn reload_due(&self) -> bool {
        match *self.last_reload.lock() {
            Some(at) => at.elapsed() >= self.reload_interval,
            None => true,
        }
    }

    /// Merge up to `max_tokens_to_load` stored tokens into the pool.
    ///
    /// Single batch, best effort: with more stored tokens than the cap this
    /// picks whatever the scan returned first. Bad tokens get deleted on
    /// rejection, so later reloads converge onto the live ones. Entries that
    /// expired between scan and fetch, or that no longer decipher, are
    /// skipped. A token equal to the main one is never reclassified, so a
    /// failed main token cannot sneak back in through storage.
    async fn reload(&self) -> Result<(), StorageError> {
        *self.last_reload.lock() = Some(Instant::now());
        info!(salt = %self.salt, "reloading token pool from storage");

        let pattern = format!("{}*", self.store_prefix());
        let keys =
            first_matching_keys(self.store.as_ref(), &pattern, self.max_tokens_to_load).await?;
        if keys.is_empty() {
            debug!("no stored tokens; hoping the main token still works");
            return Ok(());
        }

        let values = self.store.mget(&keys).await?;
        let mut loaded = Vec::new();
        for (key, value) in keys.into_iter().zip(values) {
            let Some(raw) = value else {
                continue;
            };
            let token = match &self.crypto {
                Some(crypto) => match crypto.decrypt_str(&raw) {
                    Ok(token) => token,
                    Err(error) => {
                        warn!(%error, %key, "skipping undecipherable stored token");
                        continue;
                    }
                },
                None => raw,
            };
            loaded.push((token, key));
        }

        let mut pool = self.pool.write();
        for (token, key) in loaded {
            if self.main_token.as_deref() == Some(token.as_str()) {
                continue;
            }
            pool.insert(token, PoolSlot::Stored(key));
        }
        debug!(pool_size = pool.len(), "pool reloaded");
        Ok(())
    }

    /// Pick a token, uniformly at random, reloading from storage first when
    /// the pool is empty or stale-below-cap.
    pub async fn current_token(&self) -> Result<String, RotationError> {
        let needs_reload = {
            let pool = self.pool.read();
            pool.is_empty()
                || (self.reload_due() && pool.len() < self.max_tokens_to_load)
        };
        if needs_reload {
            self.reload().await?;
        }

        let pool = self.pool.read();
        let mut tokens: Vec<&String> = pool.keys().collect();
        tokens.sort();
        let mut rng = self.rng.lock();
        tokens
            .choose(&mut *rng)
            .map(|token| (*token).clone())
            .ok_or(RotationError::NoWorkableTokens)
    }

    /// The main token, for a forced attempt. Refuses once it was flagged
    /// failed or when none was configured.
    fn forced_main_token(&self) -> Result<String, RotationError> {
        if self.main_token_failed.load(Ordering::SeqCst) {
            return Err(RotationError::NoWorkableTokens);
        }
        self.main_token
            .clone()
            .ok_or(RotationError::NoWorkableTokens)
    }
}

#[async_trait]
impl ApiRequestManager for TokenManager {
    /// Execute one logical request under the given rotation rules.
    ///
    /// An explicit loop rather than recursion: each pass selects a token
    /// (or the forced main one), issues a single POST and classifies the
    /// status. A rotating status evicts the token (irreversibly for this
    /// call) and retries; a force-main status retries on the main token
    /// without evicting anything; anything else is returned to the caller
    /// together with every token removed along the way.
    ///
    /// `max_rotations` bounds the retries: with a budget of N the loop makes
    /// at most N + 1 attempts before failing with `MaxRotationsExceeded`.
    /// Transport errors abort immediately and propagate untouched.
    async fn make_request(
        &self,
        url: &str,
        payload: &Value,
        rules: &RotationRules,
    ) -> Result<TokenRequestResponse, RotationError> {
        let started = Instant::now();
        let mut removed_tokens = Vec::new();
        let mut remaining = rules.max_rotations;
        let mut force_main = false;
        let mut attempts: u32 = 0;

        loop {
            if let Some(deadline) = rules.deadline {
                if started.elapsed() >= deadline {
                    return Err(RotationError::DeadlineExceeded);
                }
            }

            // A force-main status forces exactly the next attempt.
            let token = if std::mem::take(&mut force_main) {
                self.forced_main_token()?
            } else {
                self.current_token().await?
            };

            attempts += 1;
            let mut request = self.http.post(url).bearer_auth(&token).json(payload);
            for (name, value) in &rules.extra_headers {
                request = request.header(name.as_str(), value.as_str());
            }
            let response = request.send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            debug!(status, attempts, url, "provider response");

            if rules.rotate_statuses.contains(&status) {
                info!(status, "rotating the current token out of the pool");
                self.remove_token(&token).await;
                removed_tokens.push(token);
                if remaining == 0 {
                    return Err(RotationError::MaxRotationsExceeded { attempts });
                }
                remaining -= 1;
                continue;
            }

            if rules.force_main_statuses.contains(&status) {
                info!(status, "retrying on the main token");
                if remaining == 0 {
                    return Err(RotationError::MaxRotationsExceeded { attempts });
                }
                remaining -= 1;
                force_main = true;
                continue;
            }

            return Ok(TokenRequestResponse {
                status,
                body: serde_json::from_str(&text)?,
                removed_tokens,
            });
        }
    }
}
