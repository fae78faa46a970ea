//! AI completion provider clients.
//!
//! Thin consumers of the [`ApiRequestManager`](crate::rotation::ApiRequestManager)
//! trait: they build provider-specific JSON payloads, hand them to whichever
//! manager they were constructed with, and translate provider error shapes
//! into typed errors. All status-code policy lives in the rules they pass
//! down, never in the rotation manager itself.

pub mod openai;
pub mod perplexity;

use serde::{Deserialize, Serialize};

pub use openai::{OpenAiClient, OpenAiError};
pub use perplexity::{PerplexityClient, PerplexityError, PerplexityReply};

/// Canned reply used when a provider answers with an empty choice list.
pub const NO_CHOICE_FALLBACK: &str = "A?";

/// Chat message roles shared by the OpenAI-compatible wire formats.
pub mod role {
    pub const SYSTEM: &str = "system";
    pub const USER: &str = "user";
    pub const ASSISTANT: &str = "assistant";
}

/// One turn of an OpenAI-style chat dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}
