//! OpenAI API client: completions, chat completions and image generation.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::rotation::{ApiRequestManager, RotationError, RotationRules, SingleTokenManager};

use super::{ChatMessage, NO_CHOICE_FALLBACK, role};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/";

/// Context window of the instruct completion model, in tokens. Prompt and
/// completion share it.
pub const COMPLETION_MAX_LENGTH: u32 = 4097;

const COMPLETIONS_MODEL: &str = "gpt-3.5-turbo-instruct";
const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

/// An expired token gets rotated; a bad request falls back onto the main
/// token, which tends to have higher quotas.
const ROTATE_STATUSES: [u16; 1] = [401];
const FORCE_MAIN_STATUSES: [u16; 1] = [400];

/// One extra try on 429, so two attempts total.
const MAX_RETRIES_ON_429: u32 = 1;

/// How OpenAI spells a context overflow inside a 400 body.
const MAX_TOKEN_ERROR_PREFIX: &str = "This model's maximum context";

const IMAGE_PROMPT_PREFIX: &str = "I NEED to test how the tool works with extremely simple \
                                   prompts. DO NOT add any detail, just use it AS-IS:";

#[derive(Debug, Error)]
pub enum OpenAiError {
    /// Prompt plus requested completion exceed the model context window.
    /// Callers can shrink the completion budget and retry.
    #[error("prompt and completion exceed the model context window")]
    MaxTokensExceeded,

    /// Unauthorized even after the manager's rotation policy had its say.
    #[error("OpenAI rejected the request: {0}")]
    InvalidRequest(String),

    #[error("OpenAI returned no image")]
    NoImage,

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error("unexpected OpenAI response shape: {0}")]
    UnexpectedResponse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: String,
    #[serde(default)]
    revised_prompt: String,
}

#[derive(Debug)]
pub struct GeneratedImage {
    pub url: String,
    pub revised_prompt: String,
}

pub struct OpenAiClient {
    manager: Arc<dyn ApiRequestManager>,
    endpoint: String,
    chat_model: String,
}

impl OpenAiClient {
    pub fn new(manager: Arc<dyn ApiRequestManager>) -> Self {
        Self {
            manager,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
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

    pub fn with_chat_model(mut self, chat_model: impl Into<String>) -> Self {
        self.chat_model = chat_model.into();
        self
    }

    async fn request(&self, path: &str, payload: Value) -> Result<Value, OpenAiError> {
        let url = format!("{}{path}", self.endpoint);
        let rules = RotationRules::default()
            .rotate_on(ROTATE_STATUSES)
            .force_main_on(FORCE_MAIN_STATUSES);

        let mut attempt = 0;
        loop {
            let response = self.manager.make_request(&url, &payload, &rules).await?;
            debug!(status = response.status, path, "OpenAI response");
            if !response.removed_tokens.is_empty() {
                warn!(
                    count = response.removed_tokens.len(),
                    "tokens were rotated out of the pool during this request"
                );
            }

            if response.status == 400 {
                let message = response.body["error"]["message"].as_str().unwrap_or_default();
                if message.starts_with(MAX_TOKEN_ERROR_PREFIX) {
                    warn!("OpenAI reports a context overflow");
                    return Err(OpenAiError::MaxTokensExceeded);
                }
            }

            if response.status == 429 && attempt < MAX_RETRIES_ON_429 {
                warn!(attempt, "OpenAI rate limited the request, retrying");
                attempt += 1;
                continue;
            }

            if response.status == 401 {
                return Err(OpenAiError::InvalidRequest(response.body.to_string()));
            }

            return Ok(response.body);
        }
    }

    /// Plain instruct completion for a context-free message.
    pub async fn completions(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, OpenAiError> {
        let payload = json!({
            "model": COMPLETIONS_MODEL,
            "prompt": prompt,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        let body = self.request("completions", payload).await?;
        let parsed: CompletionResponse = serde_json::from_value(body)?;

        Ok(match parsed.choices.into_iter().next() {
            Some(choice) => choice.text,
            None => {
                warn!("no completion choices from OpenAI, sending the fallback");
                NO_CHOICE_FALLBACK.to_string()
            }
        })
    }

    /// Chat completion over prior dialog turns plus the new user message.
    ///
    /// `chat_bot_goal` becomes the system message, e.g. "You are a helpful
    /// assistant."
    pub async fn chat_completions(
        &self,
        messages: &[ChatMessage],
        chat_bot_goal: &str,
    ) -> Result<String, OpenAiError> {
        let mut dialog = vec![ChatMessage::new(role::SYSTEM, chat_bot_goal)];
        dialog.extend_from_slice(messages);

        let payload = json!({
            "model": self.chat_model,
            "messages": dialog,
            "n": 1,
        });
        let body = self.request("chat/completions", payload).await?;
        let parsed: ChatCompletionResponse = serde_json::from_value(body)?;

        Ok(match parsed.choices.into_iter().next() {
            Some(choice) => choice.message.content,
            None => {
                warn!("no chat choices from OpenAI, sending the fallback");
                NO_CHOICE_FALLBACK.to_string()
            }
        })
    }

    /// DALL-E image generation.
    pub async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, OpenAiError> {
        let payload = json!({
            "model": DEFAULT_IMAGE_MODEL,
            "prompt": format!("{IMAGE_PROMPT_PREFIX}{prompt}"),
            // dall-e-3 only accepts n = 1.
            "n": 1,
            "quality": "standard",
            "size": "1024x1024",
        });
        let body = self.request("images/generations", payload).await?;
        let parsed: ImageResponse = serde_json::from_value(body)?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|datum| GeneratedImage {
                url: datum.url,
                revised_prompt: datum.revised_prompt,
            })
            .ok_or(OpenAiError::NoImage)
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;

    fn client(server: &Server) -> OpenAiClient {
        OpenAiClient::for_single_token("sk-test").with_endpoint(format!("{}/v1/", server.url()))
    }

    #[tokio::test]
    async fn completions_return_first_choice() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-3.5-turbo-instruct",
                "prompt": "hello",
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"text":" hi there"},{"text":"ignored"}]}"#)
            .create_async()
            .await;

        let text = client(&server).completions("hello", 100, 1.0).await.unwrap();
        assert_eq!(text, " hi there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_choices_degrade_to_fallback() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let text = client(&server).completions("hello", 100, 1.0).await.unwrap();
        assert_eq!(text, NO_CHOICE_FALLBACK);
    }

    #[tokio::test]
    async fn chat_messages_are_prefixed_with_the_system_goal() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::Json(json!({
                "model": "gpt-3.5-turbo",
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "long question"},
                ],
                "n": 1,
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"short answer"}}]}"#)
            .create_async()
            .await;

        let messages = vec![ChatMessage::new(role::USER, "long question")];
        let text = client(&server)
            .chat_completions(&messages, "Be brief.")
            .await
            .unwrap();
        assert_eq!(text, "short answer");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn context_overflow_maps_to_typed_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/completions")
            .with_status(400)
            .with_body(
                r#"{"error":{"message":"This model's maximum context length is 4097 tokens"}}"#,
            )
            .create_async()
            .await;

        let result = client(&server).completions("hello", 4000, 1.0).await;
        assert!(matches!(result, Err(OpenAiError::MaxTokensExceeded)));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_invalid_request() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"bad key"}}"#)
            .create_async()
            .await;

        let result = client(&server).completions("hello", 100, 1.0).await;
        assert!(matches!(result, Err(OpenAiError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_exactly_once() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"slow down"}}"#)
            .expect(2)
            .create_async()
            .await;

        // Still 429 after the retry: the body is handed back as-is, the
        // caller decides what to tell the user.
        let result = client(&server).completions("hello", 100, 1.0).await;
        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn image_generation_parses_url_and_revised_prompt() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/images/generations")
            .match_body(Matcher::PartialJson(json!({"model": "dall-e-3", "n": 1})))
            .with_status(200)
            .with_body(
                r#"{"data":[{"url":"https://img.example/1.png","revised_prompt":"a cat"}]}"#,
            )
            .create_async()
            .await;

        let image = client(&server).generate_image("cat").await.unwrap();
        assert_eq!(image.url, "https://img.example/1.png");
        assert_eq!(image.revised_prompt, "a cat");
    }

    #[tokio::test]
    async fn missing_image_data_is_a_typed_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/images/generations")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let result = client(&server).generate_image("cat").await;
        assert!(matches!(result, Err(OpenAiError::NoImage)));
    }
}
