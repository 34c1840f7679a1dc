//! Twitch chat bot runtime: one IRC connection, command handlers matched by
//! name and filter, and interval tasks, all under one graceful lifecycle.

pub mod config;
pub mod error;
pub mod twitch;

pub use crate::config::{BotSettings, load_settings};
pub use crate::twitch::{
    BotOptions, BotStatus, Chat, HandlerResult, Registration, Repeat, Sender, StopHandle,
    Subscription, TwitchBot, TwitchError, handler, task,
};
