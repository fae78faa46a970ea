//! Plugin system for command handlers.
//!
//! Add new plugins by:
//! 1. Creating a new file in this directory
//! 2. Adding `pub mod your_plugin;` below
//! 3. Adding the handler to `command_handler()`

pub mod chat_id;
pub mod image;
pub mod mode;
pub mod start;
pub mod stats;
pub mod tokens;

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

/// All bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start(String),

    #[command(description = "Show help")]
    Help,

    #[command(description = "Show this chat's id")]
    ChatId,

    // Token contribution
    #[command(description = "Contribute your OpenAI token: /add_openai_token <token> [chat ids]")]
    AddOpenaiToken(String),

    #[command(
        description = "Contribute your Perplexity token: /add_perplexity_token <token> [chat ids]"
    )]
    AddPerplexityToken(String),

    #[command(description = "Forget your OpenAI token: /forget_openai_token [chat ids]")]
    ForgetOpenaiToken(String),

    #[command(description = "Forget your Perplexity token: /forget_perplexity_token [chat ids]")]
    ForgetPerplexityToken(String),

    // AI settings
    #[command(description = "Toggle the chat between OpenAI and Perplexity")]
    DiscussionMode,

    #[command(description = "Generate an image: /image <prompt>")]
    Image(String),

    // Service
    #[command(description = "Bot service stats")]
    Stats,
}

/// Build the combined command handler.
pub fn command_handler() -> UpdateHandler<anyhow::Error> {
    use dptree::case;

    teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start(args)].endpoint(start::start_command))
        .branch(case![Command::Help].endpoint(start::help_command))
        .branch(case![Command::ChatId].endpoint(chat_id::chat_id_command))
        // Token contribution
        .branch(case![Command::AddOpenaiToken(args)].endpoint(tokens::add_openai_token_command))
        .branch(
            case![Command::AddPerplexityToken(args)]
                .endpoint(tokens::add_perplexity_token_command),
        )
        .branch(
            case![Command::ForgetOpenaiToken(args)].endpoint(tokens::forget_openai_token_command),
        )
        .branch(
            case![Command::ForgetPerplexityToken(args)]
                .endpoint(tokens::forget_perplexity_token_command),
        )
        // AI settings
        .branch(case![Command::DiscussionMode].endpoint(mode::discussion_mode_command))
        .branch(case![Command::Image(args)].endpoint(image::image_command))
        // Service
        .branch(case![Command::Stats].endpoint(stats::stats_command))
}
