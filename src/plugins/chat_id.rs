//! Chat id command plugin.
//!
//! Contributors need chat ids to activate their tokens for specific chats.

use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};

use crate::bot::dispatcher::ThrottledBot;

/// Handle the /chat_id command.
pub async fn chat_id_command(bot: ThrottledBot, msg: Message) -> anyhow::Result<()> {
    let text = format!("This chat's id: <code>{}</code>", msg.chat.id.0);
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}
