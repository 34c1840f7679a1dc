use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use super::error::Result as TwitchResult;
use super::irc_parser::{self, IrcMessage};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BotStatus {
    Idle,
    Connecting {
        attempt: u32,
    },
    Joined {
        channel: String,
    },
    Running,
    Reconnecting {
        reason: String,
        failed_attempt: u32,
        retry_in: Duration,
    },
    Stopping,
    Stopped,
}

/// Subscriber status of a chat sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Subscription {
    subscribed: bool,
    months: u32,
}

impl Subscription {
    /// `months` is forced to 0 when `subscribed` is false.
    pub fn new(subscribed: bool, months: u32) -> Self {
        Self {
            subscribed,
            months: if subscribed { months } else { 0 },
        }
    }

    /// Reads the `subscriber` flag and the `badge-info=subscriber/<months>`
    /// tenure out of a raw chat line.
    pub fn from_response(raw_line: &str) -> Self {
        irc_parser::parse_subscription(&IrcMessage::parse(raw_line))
    }

    pub fn subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn months(&self) -> u32 {
        self.months
    }
}

/// One inbound chat message together with its author's metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sender {
    pub(crate) user_id: Option<String>,
    pub(crate) username: String,
    pub(crate) display_name: Option<String>,
    pub(crate) channel: String,
    pub(crate) message: String,
    pub(crate) subscription: Subscription,
    pub(crate) moderator: bool,
    pub(crate) broadcaster: bool,
    pub(crate) vip: bool,
    pub(crate) received_at: DateTime<Utc>,
}

impl Sender {
    /// Parses a raw `PRIVMSG` line. Fails with
    /// [`TwitchError::MalformedEvent`](super::TwitchError::MalformedEvent)
    /// when the sender or the message text cannot be found.
    pub fn parse(raw_line: &str) -> TwitchResult<Self> {
        irc_parser::parse_sender(raw_line)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Display name if the server sent one, the login name otherwise.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn subscription(&self) -> Subscription {
        self.subscription
    }

    pub fn is_moderator(&self) -> bool {
        self.moderator
    }

    pub fn is_broadcaster(&self) -> bool {
        self.broadcaster
    }

    pub fn is_vip(&self) -> bool {
        self.vip
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
