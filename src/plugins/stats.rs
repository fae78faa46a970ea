//! Service stats plugin, superadmin only.

use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};

use crate::bot::dispatcher::{AppState, ThrottledBot};

/// Handle the /stats command.
pub async fn stats_command(bot: ThrottledBot, msg: Message, state: AppState) -> anyhow::Result<()> {
    if !state.is_superadmin(msg.from.as_ref()) {
        return Ok(());
    }

    let chats = state.chats.all_chat_ids().await?;
    let text = format!(
        "<b>Mimir stats</b>\n\
         Known chats: {}\n\
         OpenAI pool size: {}\n\
         Perplexity pool size: {}",
        chats.len(),
        state.openai_pool.pool_size(),
        state.perplexity_pool.pool_size(),
    );

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}
