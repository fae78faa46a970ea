//! Start and help command plugins.

use teloxide::prelude::*;
use teloxide::types::ReplyParameters;
use teloxide::utils::command::BotCommands;

use crate::bot::dispatcher::{AppState, ThrottledBot};

use super::Command;

/// Handle the /start command.
pub async fn start_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    _args: String,
) -> anyhow::Result<()> {
    let text = format!(
        "Hi! I answer messages that look like questions, using OpenAI or Perplexity.\n\n\
         In my priority chats I answer on the operator's tokens. Anywhere else you can \
         contribute your own token with /add_openai_token or /add_perplexity_token and \
         I will answer you in the chats you name.\n\n\
         Mention @{} or reply to me to get my attention. /help lists all commands.",
        state.bot_username
    );
    bot.send_message(msg.chat.id, text)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}

/// Handle the /help command.
pub async fn help_command(bot: ThrottledBot, msg: Message) -> anyhow::Result<()> {
    // Plain text: the descriptions contain angle-bracket placeholders.
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}
