//! Token contribution commands.
//!
//! A user hands the bot their own provider key in a private chat, together
//! with the chat ids where the bot should answer them:
//!
//! ```text
//! /add_openai_token sk-... 123456789,-1001806712922
//! ```
//!
//! With no chat ids the private chat itself is activated. The token goes to
//! the per-chat contributor storage and into the shared rotation pool, and
//! the message carrying the secret is deleted afterwards.

use teloxide::prelude::*;
use teloxide::types::ReplyParameters;
use tracing::{info, warn};

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::rotation::DEFAULT_TOKEN_TTL;

/// Shortest credential either provider hands out; anything shorter is a
/// paste accident.
const MIN_TOKEN_LENGTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    OpenAi,
    Perplexity,
}

impl Provider {
    fn service_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Perplexity => "Perplexity",
        }
    }

    fn keys_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://platform.openai.com/api-keys",
            Self::Perplexity => "https://www.perplexity.ai/settings/api",
        }
    }

    fn add_command(self) -> &'static str {
        match self {
            Self::OpenAi => "/add_openai_token",
            Self::Perplexity => "/add_perplexity_token",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct TokenSubmission {
    token: String,
    chat_ids: Vec<i64>,
}

fn looks_like_token(token: &str) -> bool {
    token.len() >= MIN_TOKEN_LENGTH && token.chars().all(|c| c.is_ascii_graphic())
}

/// Parse `<token> [chat ids]` where the ids may be comma- or
/// space-separated. Unparseable ids are dropped silently.
fn parse_submission(args: &str) -> Option<TokenSubmission> {
    let mut parts = args.split_whitespace();
    let token = parts.next()?.to_string();
    if !looks_like_token(&token) {
        return None;
    }
    let chat_ids = parts
        .flat_map(|part| part.split(','))
        .filter_map(|id| id.trim().parse().ok())
        .collect();
    Some(TokenSubmission { token, chat_ids })
}

/// Parse a bare chat id list (for the forget commands).
fn parse_chat_ids(args: &str) -> Vec<i64> {
    args.split_whitespace()
        .flat_map(|part| part.split(','))
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

pub async fn add_openai_token_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    handle_add(bot, msg, state, args, Provider::OpenAi).await
}

pub async fn add_perplexity_token_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    handle_add(bot, msg, state, args, Provider::Perplexity).await
}

pub async fn forget_openai_token_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    handle_forget(bot, msg, state, args, Provider::OpenAi).await
}

pub async fn forget_perplexity_token_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    handle_forget(bot, msg, state, args, Provider::Perplexity).await
}

async fn handle_add(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
    provider: Provider,
) -> anyhow::Result<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };

    if !msg.chat.is_private() {
        // Get the key out of the group history first, then redirect.
        if let Err(error) = bot.delete_message(msg.chat.id, msg.id).await {
            warn!(%error, "could not delete a token message in a group chat");
        }
        bot.send_message(
            msg.chat.id,
            format!(
                "Please send me your {} token in a private chat: @{}",
                provider.service_name(),
                state.bot_username
            ),
        )
        .await?;
        return Ok(());
    }

    let Some(submission) = parse_submission(&args) else {
        bot.send_message(
            msg.chat.id,
            format!(
                "Usage: {} <token> [chat ids]\n\n\
                 Get your token at {} and find chat ids with /chat_id. With no \
                 chat ids I activate this private chat only.",
                provider.add_command(),
                provider.keys_url(),
            ),
        )
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
        return Ok(());
    };

    let chat_ids = if submission.chat_ids.is_empty() {
        vec![msg.chat.id.0]
    } else {
        submission.chat_ids
    };

    for &chat_id in &chat_ids {
        match provider {
            Provider::OpenAi => {
                state
                    .contributors
                    .set_openai_token(user.id.0, chat_id, &submission.token)
                    .await?
            }
            Provider::Perplexity => {
                state
                    .contributors
                    .set_perplexity_token(user.id.0, chat_id, &submission.token)
                    .await?
            }
        }
    }

    // Contributed tokens also feed the shared pool.
    let pool = match provider {
        Provider::OpenAi => &state.openai_pool,
        Provider::Perplexity => &state.perplexity_pool,
    };
    pool.add_token(&submission.token, &user.id.0.to_string(), DEFAULT_TOKEN_TTL)
        .await?;

    info!(
        user_id = user.id.0,
        chats = chat_ids.len(),
        service = provider.service_name(),
        "contributor token stored"
    );

    // The message carries a live secret: take it out of the history.
    if let Err(error) = bot.delete_message(msg.chat.id, msg.id).await {
        warn!(%error, "could not delete the token message");
    }

    let chat_list = chat_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    bot.send_message(
        msg.chat.id,
        format!(
            "Your {} token is set for: {}.\n\n\
             I deleted your message to keep the token out of the chat history. \
             Revoke it any time with /forget_{}_token.",
            provider.service_name(),
            chat_list,
            provider.service_name().to_lowercase(),
        ),
    )
    .await?;
    Ok(())
}

async fn handle_forget(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
    provider: Provider,
) -> anyhow::Result<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };

    let mut chat_ids = parse_chat_ids(&args);
    if chat_ids.is_empty() {
        chat_ids.push(msg.chat.id.0);
    }

    let mut removed = 0;
    for &chat_id in &chat_ids {
        let was_there = match provider {
            Provider::OpenAi => {
                state
                    .contributors
                    .delete_openai_token(user.id.0, chat_id)
                    .await?
            }
            Provider::Perplexity => {
                state
                    .contributors
                    .delete_perplexity_token(user.id.0, chat_id)
                    .await?
            }
        };
        if was_there {
            removed += 1;
        }
    }

    let text = if removed > 0 {
        format!(
            "Your {} token was removed for {removed} chat(s).",
            provider.service_name()
        )
    } else {
        format!(
            "I had no {} token of yours for the given chat(s).",
            provider.service_name()
        )
    };
    bot.send_message(msg.chat.id, text)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_with_comma_separated_chats() {
        let parsed = parse_submission("sk-abcdefghijklmnopqrstu 123,-1001806712922").unwrap();
        assert_eq!(parsed.token, "sk-abcdefghijklmnopqrstu");
        assert_eq!(parsed.chat_ids, vec![123, -1001806712922]);
    }

    #[test]
    fn parses_token_with_space_separated_chats() {
        let parsed = parse_submission("pplx-abcdefghijklmnopqrs 1 2 3").unwrap();
        assert_eq!(parsed.chat_ids, vec![1, 2, 3]);
    }

    #[test]
    fn token_alone_means_no_chats() {
        let parsed = parse_submission("sk-abcdefghijklmnopqrstu").unwrap();
        assert!(parsed.chat_ids.is_empty());
    }

    #[test]
    fn junk_chat_ids_are_dropped() {
        let parsed = parse_submission("sk-abcdefghijklmnopqrstu 12,notachat,,34").unwrap();
        assert_eq!(parsed.chat_ids, vec![12, 34]);
    }

    #[test]
    fn short_or_empty_tokens_are_rejected() {
        assert_eq!(parse_submission(""), None);
        assert_eq!(parse_submission("short 123"), None);
    }

    #[test]
    fn chat_id_lists_accept_both_separators() {
        assert_eq!(parse_chat_ids("1,2 3"), vec![1, 2, 3]);
        assert!(parse_chat_ids("").is_empty());
    }
}
