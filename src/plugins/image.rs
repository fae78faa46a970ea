//! Image generation command plugin.

use teloxide::prelude::*;
use teloxide::types::{InputFile, ReplyParameters};
use tracing::warn;
use url::Url;

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::clients::OpenAiClient;

/// Handle the /image command.
///
/// Superadmins draw on the shared pool; contributors on their own OpenAI
/// token.
pub async fn image_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    let prompt = args.trim();
    if prompt.is_empty() {
        bot.send_message(msg.chat.id, "Usage: /image <prompt>")
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        return Ok(());
    }

    let contributor_client = match msg.from.as_ref() {
        Some(user) if !state.is_superadmin(Some(user)) => {
            let tokens = state.contributors.get(user.id.0, msg.chat.id.0).await?;
            match tokens.openai {
                Some(token) => Some(OpenAiClient::for_single_token(&token)),
                None => {
                    bot.send_message(
                        msg.chat.id,
                        "Image generation needs an OpenAI token: contribute yours \
                         with /add_openai_token first.",
                    )
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await?;
                    return Ok(());
                }
            }
        }
        Some(_) => None,
        None => return Ok(()),
    };

    let generated = match &contributor_client {
        Some(client) => client.generate_image(prompt).await,
        None => state.openai.generate_image(prompt).await,
    };

    let image = match generated {
        Ok(image) => image,
        Err(error) => {
            warn!(%error, "image generation failed");
            bot.send_message(
                msg.chat.id,
                "Could not generate the image. Try a different prompt or try again later.",
            )
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
            return Ok(());
        }
    };

    let url = Url::parse(&image.url)?;
    let mut request = bot.send_photo(msg.chat.id, InputFile::url(url));
    if !image.revised_prompt.is_empty() {
        request = request.caption(image.revised_prompt);
    }
    request
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}
