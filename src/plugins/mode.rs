//! Discussion mode switch plugin.
//!
//! Toggles a chat between OpenAI and Perplexity. In priority chats (or for
//! superadmins) the whole chat switches; a contributor switches only their
//! own mode for the chat.

use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};
use tracing::info;

use crate::bot::dispatcher::{AppState, ThrottledBot};

/// Handle the /discussion_mode command.
pub async fn discussion_mode_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id.0;
    let user = msg.from.as_ref();

    if state.is_priority_chat(chat_id) || state.is_superadmin(user) {
        let current = state.discussion.chat_mode(chat_id).await?.unwrap_or_default();
        let new_mode = current.toggled();
        state.discussion.set_chat_mode(chat_id, new_mode).await?;
        info!(chat_id, mode = new_mode.as_str(), "chat discussion mode switched");

        bot.send_message(
            msg.chat.id,
            format!("Discussion mode switched to <b>{}</b>", new_mode.display_name()),
        )
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
        return Ok(());
    }

    let Some(user) = user else {
        return Ok(());
    };

    if state.contributors.has_any(user.id.0, chat_id).await? {
        let current = state
            .discussion
            .contributor_mode(chat_id, user.id.0)
            .await?
            .unwrap_or_default();
        let new_mode = current.toggled();
        state
            .discussion
            .set_contributor_mode(chat_id, user.id.0, new_mode)
            .await?;
        info!(
            chat_id,
            user_id = user.id.0,
            mode = new_mode.as_str(),
            "contributor discussion mode switched"
        );

        bot.send_message(
            msg.chat.id,
            format!(
                "Your discussion mode here is now <b>{}</b>",
                new_mode.display_name()
            ),
        )
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
        return Ok(());
    }

    bot.send_message(
        msg.chat.id,
        "Contribute a token first (/add_openai_token or /add_perplexity_token), \
         then pick your discussion mode.",
    )
    .reply_parameters(ReplyParameters::new(msg.id))
    .await?;
    Ok(())
}
