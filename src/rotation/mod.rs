//! Token-rotation request manager.
//!
//! Fronts outbound HTTP POSTs to an AI provider behind a pool of bearer
//! tokens: one privileged "main" token from the operator plus any number of
//! user-contributed tokens persisted in the key-value store. Provider status
//! codes drive the policy: rotate to another token, fall back to the main
//! token, or give up. Which codes mean what is configured per call, so the
//! manager itself knows nothing about any particular provider.

mod manager;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::storage::StorageError;

pub use manager::{DEFAULT_TOKEN_TTL, TokenManager};

/// Rotation budget applied when the caller does not override it. Large on
/// purpose: it only exists to stop pathological status-code flapping from
/// looping forever.
pub const DEFAULT_MAX_ROTATIONS: u32 = 100;

#[derive(Debug, Error)]
pub enum RotationError {
    /// The pool is empty even after a storage reload. Fatal for the call.
    #[error("no workable tokens left in the pool")]
    NoWorkableTokens,

    /// The rotation budget ran out mid-chain. Either the status-code sets
    /// are misconfigured or the provider is down across all tokens.
    #[error("rotation budget exhausted after {attempts} attempts")]
    MaxRotationsExceeded { attempts: u32 },

    /// The wall-clock deadline for the whole rotation chain passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Transport-level failure, passed through undecorated. The caller owns
    /// retry policy for these; rotation decisions are made on HTTP status
    /// only.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("provider response is not valid JSON: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

/// Per-call retry policy: which statuses evict the current token, which
/// force the next attempt onto the main token, and how long the whole chain
/// may run. Rotation wins when a status appears in both sets.
#[derive(Debug, Clone)]
pub struct RotationRules {
    pub rotate_statuses: HashSet<u16>,
    pub force_main_statuses: HashSet<u16>,
    /// How many rotations are allowed beyond the first attempt.
    pub max_rotations: u32,
    /// Wall-clock bound across all attempts of one logical request. The
    /// per-attempt bound stays with the HTTP client; without this a flapping
    /// provider could stretch one request to `max_rotations` timeouts.
    pub deadline: Option<Duration>,
    pub extra_headers: Vec<(String, String)>,
}

impl Default for RotationRules {
    fn default() -> Self {
        Self {
            rotate_statuses: HashSet::new(),
            force_main_statuses: HashSet::new(),
            max_rotations: DEFAULT_MAX_ROTATIONS,
            deadline: None,
            extra_headers: Vec::new(),
        }
    }
}

impl RotationRules {
    pub fn rotate_on(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.rotate_statuses.extend(statuses);
        self
    }

    pub fn force_main_on(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.force_main_statuses.extend(statuses);
        self
    }

    pub fn with_max_rotations(mut self, max_rotations: u32) -> Self {
        self.max_rotations = max_rotations;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[allow(dead_code)]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

/// What the caller gets back: the provider's JSON body and status, plus
/// every token this call rotated out, so the caller can notify whoever
/// contributed them.
#[derive(Debug)]
pub struct TokenRequestResponse {
    pub status: u16,
    pub body: Value,
    pub removed_tokens: Vec<String>,
}

/// Common surface for the rotating manager and the single-token one, so
/// provider clients do not care which kind they were handed.
#[async_trait]
pub trait ApiRequestManager: Send + Sync {
    async fn make_request(
        &self,
        url: &str,
        payload: &Value,
        rules: &RotationRules,
    ) -> Result<TokenRequestResponse, RotationError>;
}

/// Manager around exactly one token. No pool, no rotation: the response
/// comes back as-is and status handling is entirely the caller's business.
/// Used for contributor-owned tokens, where eviction is decided a layer
/// above.
pub struct SingleTokenManager {
    token: String,
    http: Client,
}

impl SingleTokenManager {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            http: Client::new(),
        }
    }
}

#[async_trait]
impl ApiRequestManager for SingleTokenManager {
    async fn make_request(
        &self,
        url: &str,
        payload: &Value,
        rules: &RotationRules,
    ) -> Result<TokenRequestResponse, RotationError> {
        let mut request = self.http.post(url).bearer_auth(&self.token).json(payload);
        for (name, value) in &rules.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        tracing::debug!(status, url, "single-token provider response");

        Ok(TokenRequestResponse {
            status,
            body: serde_json::from_str(&text)?,
            removed_tokens: Vec::new(),
        })
    }
}
