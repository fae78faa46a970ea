//! Chat membership bookkeeping for the bot itself.

use teloxide::types::ChatMemberUpdated;
use tracing::info;

use crate::bot::dispatcher::AppState;

/// Handle the bot being added to or removed from a chat.
pub async fn membership_handler(upd: ChatMemberUpdated, state: AppState) -> anyhow::Result<()> {
    let chat_id = upd.chat.id.0;

    if upd.new_chat_member.is_present() {
        info!(chat_id, "bot added to chat");
        state.chats.remember(chat_id).await?;
    } else {
        info!(chat_id, "bot removed from chat");
        state.chats.forget(chat_id).await?;
    }
    Ok(())
}
