//! Perplexity API client: chat completions with citations.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::rotation::{ApiRequestManager, RotationError, RotationRules, SingleTokenManager};

use super::{ChatMessage, NO_CHOICE_FALLBACK, role};

pub const DEFAULT_ENDPOINT: &str = "https://api.perplexity.ai/";

const DEFAULT_MODEL: &str = "llama-3.1-sonar-small-128k-online";

// Same defaults as the OpenAI side until operational experience with the
// Perplexity API says otherwise.
const ROTATE_STATUSES: [u16; 1] = [401];
const FORCE_MAIN_STATUSES: [u16; 1] = [400];

#[derive(Debug, Error)]
pub enum PerplexityError {
    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error("unexpected Perplexity response shape: {0}")]
    UnexpectedResponse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Answer text plus the source links Perplexity cited.
#[derive(Debug)]
pub struct PerplexityReply {
    pub text: String,
    pub citations: Vec<String>,
}

pub struct PerplexityClient {
    manager: Arc<dyn ApiRequestManager>,
    endpoint: String,
    model: String,
}

impl PerplexityClient {
    pub fn new(manager: Arc<dyn ApiRequestManager>) -> Self {
        Self {
            manager,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Client over one fixed token, e.g. a contributor's own key.
    pub fn for_single_token(token: &str) -> Self {
        Self::new(Arc::new(SingleTokenManager::new(token)))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Chat completion over prior dialog turns plus the new user message.
    pub async fn chat_completions(
        &self,
        messages: &[ChatMessage],
        chat_bot_goal: &str,
    ) -> Result<PerplexityReply, PerplexityError> {
        let mut dialog = vec![ChatMessage::new(role::SYSTEM, chat_bot_goal)];
        dialog.extend_from_slice(messages);

        let url = format!("{}chat/completions", self.endpoint);
        let payload = json!({
            "model": self.model,
            "messages": dialog,
            "return_images": false,
            "stream": false,
            "presence_penalty": 0,
            "frequency_penalty": 1,
        });
        let rules = RotationRules::default()
            .rotate_on(ROTATE_STATUSES)
            .force_main_on(FORCE_MAIN_STATUSES);

        let response = self.manager.make_request(&url, &payload, &rules).await?;
        debug!(status = response.status, "Perplexity response");
        if !response.removed_tokens.is_empty() {
            warn!(
                count = response.removed_tokens.len(),
                "tokens were rotated out of the pool during this request"
            );
        }

        let parsed: ChatCompletionResponse = serde_json::from_value(response.body)?;
        let text = match parsed.choices.into_iter().next() {
            Some(choice) => choice.message.content,
            None => {
                warn!("no chat choices from Perplexity, sending the fallback");
                NO_CHOICE_FALLBACK.to_string()
            }
        };
        Ok(PerplexityReply {
            text,
            citations: parsed.citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;

    #[tokio::test]
    async fn chat_completions_return_text_and_citations() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer pplx-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "llama-3.1-sonar-small-128k-online",
                "stream": false,
            })))
            .with_status(200)
            .with_body(
                r#"{
                    "choices":[{"message":{"role":"assistant","content":"the answer"}}],
                    "citations":["https://a.example","https://b.example"]
                }"#,
            )
            .create_async()
            .await;

        let client = PerplexityClient::for_single_token("pplx-test")
            .with_endpoint(format!("{}/", server.url()));
        let messages = vec![ChatMessage::new(role::USER, "why?")];
        let reply = client.chat_completions(&messages, "Be brief.").await.unwrap();

        assert_eq!(reply.text, "the answer");
        assert_eq!(reply.citations.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_citations_default_to_empty() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#)
            .create_async()
            .await;

        let client = PerplexityClient::for_single_token("pplx-test")
            .with_endpoint(format!("{}/", server.url()));
        let reply = client.chat_completions(&[], "goal").await.unwrap();

        assert_eq!(reply.text, "ok");
        assert!(reply.citations.is_empty());
    }

    #[tokio::test]
    async fn empty_choices_degrade_to_fallback() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[],"citations":[]}"#)
            .create_async()
            .await;

        let client = PerplexityClient::for_single_token("pplx-test")
            .with_endpoint(format!("{}/", server.url()));
        let reply = client.chat_completions(&[], "goal").await.unwrap();
        assert_eq!(reply.text, NO_CHOICE_FALLBACK);
    }
}
