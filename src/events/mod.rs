//! Event handler system.
//!
//! Non-command events: the completion trigger path for plain messages and
//! the bot's own chat membership changes.

mod completions;
mod membership;

pub use completions::completion_handler;
pub use membership::membership_handler;
