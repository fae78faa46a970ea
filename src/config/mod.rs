//! Configuration module for the Mimir bot.
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

/// Bot running mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BotMode {
    #[default]
    Polling,
    Webhook,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub bot_mode: BotMode,
    pub webhook_url: Option<String>,
    pub webhook_port: u16,
    pub webhook_secret: Option<String>,

    /// Bot username (without @) for mention detection.
    /// Optional - will be fetched via getMe if not set.
    pub bot_username: Option<String>,

    /// Superadmin user IDs (comma-separated). These users can trigger the
    /// bot anywhere just by mentioning it.
    pub superadmin_ids: Vec<u64>,

    /// Chats answered from the operator-funded token pool (comma-separated).
    pub priority_chats: Vec<i64>,

    // Redis
    pub redis_url: String,

    // AI providers
    pub openai_token: Option<String>,
    pub perplexity_token: Option<String>,
    pub openai_chat_model: Option<String>,
    pub perplexity_model: Option<String>,

    /// System goal injected into every chat completion.
    pub chat_bot_goal: String,

    /// Base64-encoded 256-bit key for tokens at rest. When unset, the store
    /// holds plaintext.
    pub crypto_key: Option<String>,

    /// How long cached dialog messages live.
    pub message_cache_ttl: Duration,

    /// How many previous reply-chain messages go into a chat completion.
    pub dialog_context_depth: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Panics
    /// Panics if required environment variables are not set.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let bot_mode = env::var("BOT_MODE")
            .unwrap_or_else(|_| "polling".to_string())
            .to_lowercase();

        let bot_mode = match bot_mode.as_str() {
            "webhook" => BotMode::Webhook,
            _ => BotMode::Polling,
        };

        let webhook_url = env::var("WEBHOOK_URL").ok();

        // Validate webhook URL is set if mode is webhook
        if bot_mode == BotMode::Webhook && webhook_url.is_none() {
            panic!("WEBHOOK_URL must be set when BOT_MODE is webhook");
        }

        let webhook_port = env::var("WEBHOOK_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8443);

        let webhook_secret = env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());

        let superadmin_ids = env::var("SUPERADMIN_IDS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse::<u64>().ok())
            .collect();

        let priority_chats = env::var("PRIORITY_CHATS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse::<i64>().ok())
            .collect();

        // Parse bot username (strip @ if present)
        let bot_username = env::var("BOT_USERNAME")
            .ok()
            .map(|s| s.trim_start_matches('@').to_string())
            .filter(|s| !s.is_empty());

        let message_cache_ttl = env::var("MESSAGE_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(600));

        let dialog_context_depth = env::var("DIALOG_CONTEXT_DEPTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);

        Self {
            bot_token: env::var("BOT_TOKEN").expect("BOT_TOKEN must be set"),
            bot_mode,
            webhook_url,
            webhook_port,
            webhook_secret,
            bot_username,
            superadmin_ids,
            priority_chats,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            openai_token: env::var("OPENAI_TOKEN").ok().filter(|s| !s.is_empty()),
            perplexity_token: env::var("PERPLEXITY_TOKEN").ok().filter(|s| !s.is_empty()),
            openai_chat_model: env::var("OPENAI_CHAT_MODEL").ok().filter(|s| !s.is_empty()),
            perplexity_model: env::var("PERPLEXITY_MODEL").ok().filter(|s| !s.is_empty()),
            chat_bot_goal: env::var("CHAT_BOT_GOAL")
                .unwrap_or_else(|_| "You are a helpful assistant.".to_string()),
            crypto_key: env::var("CRYPTO_KEY").ok().filter(|s| !s.is_empty()),
            message_cache_ttl,
            dialog_context_depth,
        }
    }
}
