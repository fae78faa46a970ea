//! Message-trigger heuristics.
//!
//! A message earns a completion response when it looks like it wants one:
//! long enough to be a real question, contains a question mark, trails off,
//! mentions the bot, or replies to the bot. Chat-class gating (priority
//! chat, superadmin, contributor) happens in the completion handler on top
//! of these.

use teloxide::types::Message;

/// Messages longer than this are treated as completion-worthy on length
/// alone.
pub const TEXT_LENGTH_TRIGGER: usize = 350;

/// Trailing-off endings that invite the bot to continue.
const TRIGGER_SUFFIXES: [&str; 3] = ["...", "..", ":"];

/// Whether the text mentions the bot via `@username`, case-insensitive.
pub fn is_bot_mentioned(text: &str, bot_username: &str) -> bool {
    if bot_username.is_empty() {
        return false;
    }
    let mention = format!("@{}", bot_username.to_lowercase());
    text.to_lowercase().contains(&mention)
}

/// Content-only heuristics: length, question mark, trailing-off suffix.
pub fn is_completion_worthy(text: &str) -> bool {
    if text.chars().count() > TEXT_LENGTH_TRIGGER {
        return true;
    }
    if text.contains('?') {
        return true;
    }
    TRIGGER_SUFFIXES.iter().any(|suffix| text.ends_with(suffix))
}

/// Whether the message replies to one of the bot's own messages.
pub fn is_reply_to_bot(msg: &Message, bot_username: &str) -> bool {
    msg.reply_to_message()
        .and_then(|reply| reply.from.as_ref())
        .and_then(|user| user.username.as_deref())
        .is_some_and(|username| username.eq_ignore_ascii_case(bot_username))
}

/// The full trigger: any content heuristic, a mention, or a reply to the
/// bot.
pub fn should_trigger(msg: &Message, bot_username: &str) -> bool {
    let Some(text) = msg.text() else {
        return false;
    };
    is_completion_worthy(text)
        || is_bot_mentioned(text, bot_username)
        || is_reply_to_bot(msg, bot_username)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_marks_trigger() {
        assert!(is_completion_worthy("how does this work?"));
        assert!(is_completion_worthy("?"));
        assert!(!is_completion_worthy("plain statement"));
    }

    #[test]
    fn trailing_off_triggers() {
        assert!(is_completion_worthy("and then she said.."));
        assert!(is_completion_worthy("to be continued..."));
        assert!(is_completion_worthy("the plan is:"));
        assert!(!is_completion_worthy("full stop."));
    }

    #[test]
    fn long_text_triggers() {
        let long = "a".repeat(TEXT_LENGTH_TRIGGER + 1);
        assert!(is_completion_worthy(&long));
        let short = "a".repeat(TEXT_LENGTH_TRIGGER);
        assert!(!is_completion_worthy(&short));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // Cyrillic is two bytes per char; stay under the trigger.
        let text = "я".repeat(TEXT_LENGTH_TRIGGER);
        assert!(!is_completion_worthy(&text));
    }

    #[test]
    fn mention_is_case_insensitive() {
        assert!(is_bot_mentioned("hey @MimirBot, opinions", "mimirbot"));
        assert!(is_bot_mentioned("hey @mimirbot", "MimirBot"));
        assert!(!is_bot_mentioned("hey @otherbot", "mimirbot"));
        assert!(!is_bot_mentioned("no mention here", "mimirbot"));
        assert!(!is_bot_mentioned("@anyone", ""));
    }
}
