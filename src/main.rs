//! Mimir - AI completion Telegram bot
//!
//! Forwards qualifying chat messages to AI completion providers behind a
//! rotating pool of API tokens.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `storage` - Redis key-value layer (chats, messages, tokens, modes)
//! - `crypto` - AES-256-GCM for tokens at rest
//! - `rotation` - Token-rotation API request manager
//! - `clients` - OpenAI and Perplexity clients
//! - `bot` - Core bot functionality (with Throttle for API rate limiting)
//! - `plugins` - Command handlers (extensible)
//! - `events` - Completion trigger and membership handlers

mod bot;
mod clients;
mod config;
mod crypto;
mod events;
mod plugins;
mod rotation;
mod storage;

use std::sync::Arc;

use teloxide::adaptors::throttle::Limits;
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bot::AppState;
use config::Config;
use crypto::Crypto;
use storage::{KeyValueStore, RedisStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // Initialize logging with sensible defaults
    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mimir=info,teloxide=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("Starting Mimir bot...");

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded successfully");
    info!("Bot mode: {:?}", config.bot_mode);

    // Token cipher for secrets at rest
    let crypto = match &config.crypto_key {
        Some(key) => Some(Crypto::from_base64_key(key)?),
        None => {
            warn!("CRYPTO_KEY is not set; contributed tokens will be stored in plaintext");
            None
        }
    };

    // Connect to Redis
    info!("Connecting to Redis...");
    let store = RedisStore::connect(&config.redis_url).await?;
    let store: Arc<dyn KeyValueStore> = Arc::new(store);
    info!("Storage connected");

    // Initialize bot with Throttle for automatic rate limiting
    let bot = Bot::new(&config.bot_token).throttle(Limits::default());
    info!("Bot initialized with rate limiting (Throttle)");

    // Get bot info
    let me = bot.get_me().await?;
    info!("Bot username: @{}", me.username());

    // Get bot username from config or fallback to get_me()
    let bot_username = config
        .bot_username
        .clone()
        .unwrap_or_else(|| me.username().to_string());
    info!("Using bot username: @{}", bot_username);

    if config.openai_token.is_none() {
        info!("No main OpenAI token configured; relying on contributed tokens");
    }
    if config.perplexity_token.is_none() {
        info!("No main Perplexity token configured; relying on contributed tokens");
    }
    if config.priority_chats.is_empty() {
        info!("No priority chats configured (PRIORITY_CHATS is empty)");
    } else {
        info!("Priority chats: {:?}", config.priority_chats);
    }

    // Build application state and dispatcher
    let state = AppState::new(&config, store, crypto, me.id.0, bot_username);
    let dispatcher = bot::build_dispatcher(bot.clone(), state);

    // Run the bot
    bot::run(&config, dispatcher, bot).await;

    Ok(())
}
