//! Message dispatcher setup.
//!
//! Builds the dispatcher with all command handlers and event handlers.

use std::sync::Arc;

use teloxide::adaptors::Throttle;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::User;
use tracing::warn;

use crate::clients::{OpenAiClient, PerplexityClient};
use crate::config::Config;
use crate::crypto::Crypto;
use crate::events;
use crate::plugins;
use crate::rotation::TokenManager;
use crate::storage::{
    CachedMessage, ChatRegistry, ContributorTokenStorage, DiscussionModeStorage, KeyValueStore,
    MessageCache,
};

/// Bot type with Throttle adaptor for automatic rate limiting.
pub type ThrottledBot = Throttle<Bot>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Registry of chats the bot lives in.
    pub chats: ChatRegistry,

    /// Short-lived message cache for dialog context.
    pub messages: MessageCache,

    /// Per-user, per-chat contributed provider tokens.
    pub contributors: ContributorTokenStorage,

    /// Per-chat provider selection.
    pub discussion: DiscussionModeStorage,

    /// OpenAI client over the shared token pool.
    pub openai: Arc<OpenAiClient>,

    /// Perplexity client over the shared token pool.
    pub perplexity: Arc<PerplexityClient>,

    /// The pools themselves, for token onboarding and stats.
    pub openai_pool: Arc<TokenManager>,
    pub perplexity_pool: Arc<TokenManager>,

    /// Superadmin user IDs (can trigger the bot anywhere).
    pub superadmin_ids: Vec<u64>,

    /// Chats answered from the operator-funded pool.
    pub priority_chats: Vec<i64>,

    /// Bot username (without @) for mention detection.
    pub bot_username: String,

    /// The bot's own user id, to tell its messages apart in cached dialogs.
    pub bot_user_id: u64,

    /// System goal for chat completions.
    pub chat_bot_goal: String,

    /// Reply-chain depth pulled into chat completions.
    pub dialog_context_depth: usize,
}

impl AppState {
    /// Create a new application state, wiring the storages, token pools and
    /// provider clients over one shared store.
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        crypto: Option<Crypto>,
        bot_user_id: u64,
        bot_username: String,
    ) -> Self {
        let openai_pool = Arc::new(TokenManager::new(
            config.openai_token.clone(),
            store.clone(),
            crypto.clone(),
            "openai",
        ));
        let perplexity_pool = Arc::new(TokenManager::new(
            config.perplexity_token.clone(),
            store.clone(),
            crypto.clone(),
            "perplexity",
        ));

        let mut openai = OpenAiClient::new(openai_pool.clone());
        if let Some(model) = &config.openai_chat_model {
            openai = openai.with_chat_model(model);
        }
        let mut perplexity = PerplexityClient::new(perplexity_pool.clone());
        if let Some(model) = &config.perplexity_model {
            perplexity = perplexity.with_model(model);
        }

        Self {
            chats: ChatRegistry::new(store.clone(), bot_user_id),
            messages: MessageCache::new(store.clone(), bot_user_id, config.message_cache_ttl),
            contributors: ContributorTokenStorage::new(store.clone(), bot_user_id, crypto),
            discussion: DiscussionModeStorage::new(store, bot_user_id),
            openai: Arc::new(openai),
            perplexity: Arc::new(perplexity),
            openai_pool,
            perplexity_pool,
            superadmin_ids: config.superadmin_ids.clone(),
            priority_chats: config.priority_chats.clone(),
            bot_username,
            bot_user_id,
            chat_bot_goal: config.chat_bot_goal.clone(),
            dialog_context_depth: config.dialog_context_depth,
        }
    }

    /// Check if a user is a superadmin.
    pub fn is_superadmin(&self, user: Option<&User>) -> bool {
        user.is_some_and(|user| self.superadmin_ids.contains(&user.id.0))
    }

    /// Check if a chat is answered from the operator-funded pool.
    pub fn is_priority_chat(&self, chat_id: i64) -> bool {
        self.priority_chats.contains(&chat_id)
    }
}

/// Build the dispatcher with all handlers.
pub fn build_dispatcher(
    bot: ThrottledBot,
    state: AppState,
) -> Dispatcher<ThrottledBot, anyhow::Error, teloxide::dispatching::DefaultKey> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
}

/// Build the handler schema.
fn schema() -> UpdateHandler<anyhow::Error> {
    use teloxide::dispatching::UpdateFilterExt;

    // Message handlers: bookkeeping first, then commands, then the
    // completion trigger path for everything else.
    let message_handler = Update::filter_message()
        .inspect_async(track_message)
        .branch(plugins::command_handler())
        .branch(events::completion_handler());

    // The bot being added to or removed from chats.
    let member_handler = Update::filter_my_chat_member().endpoint(events::membership_handler);

    dptree::entry()
        .branch(message_handler)
        .branch(member_handler)
}

/// Remember the chat and cache the message (runs before all handlers).
async fn track_message(msg: Message, state: AppState) {
    let chat_id = msg.chat.id.0;
    if let Err(error) = state.chats.remember(chat_id).await {
        warn!(%error, chat_id, "could not remember chat");
    }

    let Some(text) = msg.text() else {
        return;
    };
    // Token submissions never go into the plaintext message cache.
    if text.starts_with("/add_") {
        return;
    }
    let cached = CachedMessage {
        text: text.to_string(),
        sender_id: msg.from.as_ref().map(|user| user.id.0).unwrap_or_default(),
        reply_to: msg.reply_to_message().map(|reply| reply.id.0),
    };
    if let Err(error) = state.messages.remember(chat_id, msg.id.0, &cached).await {
        warn!(%error, chat_id, "could not cache message");
    }
}
