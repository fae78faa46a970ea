//! Completion responses for triggering messages.
//!
//! A plain message that passes the trigger heuristics is answered by an AI
//! provider. Who pays depends on the chat class: priority chats and
//! superadmin requests draw on the operator's token pools; contributor
//! chats use the token the author supplied for that chat. The provider is
//! picked by the chat's discussion mode, defaulting to OpenAI.

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::ReplyParameters;
use tracing::{info, warn};

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::bot::filters;
use crate::clients::openai::COMPLETION_MAX_LENGTH;
use crate::clients::{
    ChatMessage, OpenAiClient, OpenAiError, PerplexityClient, PerplexityError, role,
};
use crate::storage::{CachedMessage, DiscussionMode};

/// Telegram rejects messages longer than this many characters.
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Character budget for instruct completions, with a little slack under the
/// advertised token window since characters only approximate tokens.
const COMPLETION_LENGTH_ROBUST: u32 = COMPLETION_MAX_LENGTH - COMPLETION_MAX_LENGTH / 1000;

/// Build the completion trigger handler for plain (non-command) messages.
pub fn completion_handler() -> UpdateHandler<anyhow::Error> {
    dptree::filter(|msg: Message| {
        msg.text().is_some_and(|text| !text.starts_with('/'))
    })
    .endpoint(respond)
}

/// Whose tokens answer this message.
enum ResponderClass {
    /// Operator-funded pool: priority chat or superadmin request.
    Pool,
    /// The author's own contributed token.
    Contributor,
}

async fn classify(msg: &Message, state: &AppState) -> anyhow::Result<Option<ResponderClass>> {
    let triggered = filters::should_trigger(msg, &state.bot_username);

    if state.is_priority_chat(msg.chat.id.0) && triggered {
        return Ok(Some(ResponderClass::Pool));
    }

    let Some(user) = msg.from.as_ref() else {
        return Ok(None);
    };

    // Superadmins get an answer anywhere, but only when clearly addressing
    // the bot.
    if state.is_superadmin(Some(user)) {
        let text = msg.text().unwrap_or_default();
        if filters::is_bot_mentioned(text, &state.bot_username)
            || filters::is_reply_to_bot(msg, &state.bot_username)
        {
            return Ok(Some(ResponderClass::Pool));
        }
    }

    if triggered && state.contributors.has_any(user.id.0, msg.chat.id.0).await? {
        return Ok(Some(ResponderClass::Contributor));
    }

    Ok(None)
}

async fn respond(bot: ThrottledBot, msg: Message, state: AppState) -> anyhow::Result<()> {
    let Some(class) = classify(&msg, &state).await? else {
        return Ok(());
    };

    match class {
        ResponderClass::Pool => {
            info!(chat_id = msg.chat.id.0, "answering from the shared pool");
            let mode = state
                .discussion
                .chat_mode(msg.chat.id.0)
                .await?
                .unwrap_or_default();
            let answer = match mode {
                DiscussionMode::OpenAi => compose_openai(&state, &msg, &state.openai).await?,
                DiscussionMode::Perplexity => {
                    compose_perplexity(&state, &msg, &state.perplexity).await?
                }
            };
            reply_in_chunks(&bot, &msg, &state, &answer).await
        }
        ResponderClass::Contributor => respond_for_contributor(&bot, &msg, &state).await,
    }
}

async fn respond_for_contributor(
    bot: &ThrottledBot,
    msg: &Message,
    state: &AppState,
) -> anyhow::Result<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    info!(chat_id, user_id = user.id.0, "answering on a contributor token");

    let tokens = state.contributors.get(user.id.0, chat_id).await?;
    let mode = match state.discussion.contributor_mode(chat_id, user.id.0).await? {
        Some(mode) => mode,
        None => state
            .discussion
            .chat_mode(chat_id)
            .await?
            .unwrap_or_default(),
    };

    match mode {
        DiscussionMode::OpenAi => {
            let Some(token) = tokens.openai else {
                bot.send_message(
                    msg.chat.id,
                    "You have not provided your OpenAI token for this chat. \
                     Use /add_openai_token to add it.",
                )
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
                return Ok(());
            };

            let client = OpenAiClient::for_single_token(&token);
            match compose_openai(state, msg, &client).await {
                Ok(answer) => reply_in_chunks(bot, msg, state, &answer).await,
                Err(OpenAiError::InvalidRequest(details)) => {
                    // The provider rejected the key itself: drop it so the
                    // user is not stuck with a dead token.
                    warn!(%details, "contributor OpenAI token rejected, deleting it");
                    state
                        .contributors
                        .delete_openai_token(user.id.0, chat_id)
                        .await?;
                    bot.send_message(
                        msg.chat.id,
                        "OpenAI rejected your token, so I removed it for this chat. \
                         You can add another one any time with /add_openai_token.",
                    )
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await?;
                    Ok(())
                }
                Err(error) => {
                    warn!(%error, "could not compose a contributor response");
                    bot.send_message(
                        msg.chat.id,
                        "Could not compose a response. Check your token or try again later.",
                    )
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await?;
                    Ok(())
                }
            }
        }
        DiscussionMode::Perplexity => {
            let Some(token) = tokens.perplexity else {
                bot.send_message(
                    msg.chat.id,
                    "You have not provided your Perplexity token for this chat. \
                     Use /add_perplexity_token to add it.",
                )
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
                return Ok(());
            };

            let client = PerplexityClient::for_single_token(&token);
            match compose_perplexity(state, msg, &client).await {
                Ok(answer) => reply_in_chunks(bot, msg, state, &answer).await,
                Err(error) => {
                    warn!(%error, "could not compose a contributor response");
                    bot.send_message(
                        msg.chat.id,
                        "Could not compose a response. Check your token or try again later.",
                    )
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await?;
                    Ok(())
                }
            }
        }
    }
}

/// Rebuild the reply chain as provider dialog turns, oldest first. A failed
/// cache read degrades to answering without context.
async fn dialog_messages(state: &AppState, msg: &Message) -> Vec<ChatMessage> {
    let reply_to = msg.reply_to_message().map(|reply| reply.id.0);
    let cached = match state
        .messages
        .dialog_context(msg.chat.id.0, reply_to, state.dialog_context_depth)
        .await
    {
        Ok(cached) => cached,
        Err(error) => {
            warn!(%error, "dialog context fetch failed, answering without context");
            Vec::new()
        }
    };

    cached
        .into_iter()
        .map(|message| {
            let message_role = if message.sender_id == state.bot_user_id {
                role::ASSISTANT
            } else {
                role::USER
            };
            ChatMessage::new(message_role, message.text)
        })
        .collect()
}

/// Dialog context present: chat completion. Otherwise a plain instruct
/// completion with a character budget.
async fn compose_openai(
    state: &AppState,
    msg: &Message,
    client: &OpenAiClient,
) -> Result<String, OpenAiError> {
    let text = msg.text().unwrap_or_default();
    let mut context = dialog_messages(state, msg).await;

    if context.is_empty() {
        return complete_with_budget(client, text).await;
    }

    context.push(ChatMessage::new(role::USER, text));
    client.chat_completions(&context, &state.chat_bot_goal).await
}

/// Instruct completion whose budget shares the context window with the
/// prompt. An over-long prompt is hard-reduced to a third; a provider-side
/// overflow (tokens, not characters) gets one retry at two thirds of the
/// budget.
async fn complete_with_budget(client: &OpenAiClient, text: &str) -> Result<String, OpenAiError> {
    let text_len = text.chars().count() as u32;
    let (prompt, budget) = if text_len >= COMPLETION_LENGTH_ROBUST {
        let keep = (text_len / 3) as usize;
        (
            text.chars().take(keep).collect::<String>(),
            COMPLETION_LENGTH_ROBUST - text_len / 3,
        )
    } else {
        (text.to_string(), COMPLETION_LENGTH_ROBUST - text_len)
    };

    match client.completions(&prompt, budget, 1.0).await {
        Err(OpenAiError::MaxTokensExceeded) => {
            info!("retrying the completion with a 2/3 budget");
            client.completions(&prompt, budget * 2 / 3, 1.0).await
        }
        other => other,
    }
}

async fn compose_perplexity(
    state: &AppState,
    msg: &Message,
    client: &PerplexityClient,
) -> Result<String, PerplexityError> {
    let text = msg.text().unwrap_or_default();
    let mut context = dialog_messages(state, msg).await;
    context.push(ChatMessage::new(role::USER, text));

    let reply = client.chat_completions(&context, &state.chat_bot_goal).await?;
    if reply.citations.is_empty() {
        return Ok(reply.text);
    }

    let sources = reply
        .citations
        .iter()
        .enumerate()
        .map(|(index, citation)| format!("{}. {citation}", index + 1))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(format!("{}\n\nUsed sources:\n{}", reply.text, sources))
}

/// Split a response into Telegram-sized messages.
fn split_for_telegram(text: &str) -> Vec<String> {
    // Sometimes the provider does not know what to say.
    if text.is_empty() {
        return vec![".".to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == TELEGRAM_MESSAGE_LIMIT {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Reply, splitting long answers into batches, and cache every sent batch
/// so follow-up replies can rebuild the dialog.
async fn reply_in_chunks(
    bot: &ThrottledBot,
    msg: &Message,
    state: &AppState,
    text: &str,
) -> anyhow::Result<()> {
    for chunk in split_for_telegram(text) {
        let sent = bot
            .send_message(msg.chat.id, &chunk)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;

        let cached = CachedMessage {
            text: chunk,
            sender_id: state.bot_user_id,
            reply_to: Some(msg.id.0),
        };
        if let Err(error) = state.messages.remember(msg.chat.id.0, sent.id.0, &cached).await {
            warn!(%error, "could not cache an outgoing message");
        }
    }
    Ok(())
}
