use chrono::Utc;

use super::error::{Result as TwitchResult, TwitchError};
use super::types::{Sender, Subscription};

pub const CMD_CAP: &str = "CAP";
pub const CMD_NOTICE: &str = "NOTICE";
pub const CMD_PING: &str = "PING";
pub const CMD_PRIVMSG: &str = "PRIVMSG";
pub const CMD_RECONNECT: &str = "RECONNECT";
pub const RPL_WELCOME: &str = "001";

pub const TAG_BADGE_INFO: &str = "badge-info";
pub const TAG_BADGES: &str = "badges";
pub const TAG_DISPLAY_NAME: &str = "display-name";
pub const TAG_MOD: &str = "mod";
pub const TAG_SUBSCRIBER: &str = "subscriber";
pub const TAG_USER_ID: &str = "user-id";

pub const BADGE_BROADCASTER: &str = "broadcaster";
pub const BADGE_MODERATOR: &str = "moderator";
pub const BADGE_VIP: &str = "vip";

/// Borrowed view over one IRC line: `[@tags] [:prefix] COMMAND [params] [:trailing]`.
#[derive(Debug, Default)]
pub struct IrcMessage<'a> {
    tags: Option<&'a str>,
    prefix: Option<&'a str>,
    command: Option<&'a str>,
    params: Vec<&'a str>,
}

impl<'a> IrcMessage<'a> {
    pub fn command(&self) -> Option<&'a str> {
        self.command
    }

    pub fn prefix(&self) -> Option<&'a str> {
        self.prefix
    }

    pub fn params(&self) -> &[&'a str] {
        &self.params
    }

    pub fn parse(line: &'a str) -> Self {
        let mut message = IrcMessage {
            ..Default::default()
        };
        let mut remainder = line.trim_end_matches(['\r', '\n']).trim_start();

        if let Some(rest) = remainder.strip_prefix('@') {
            match rest.split_once(' ') {
                Some((tags, tail)) => {
                    message.tags = Some(tags);
                    remainder = tail.trim_start();
                }
                None => {
                    message.tags = Some(rest);
                    return message;
                }
            }
        }
        if let Some(rest) = remainder.strip_prefix(':') {
            match rest.split_once(' ') {
                Some((prefix, tail)) => {
                    message.prefix = Some(prefix);
                    remainder = tail.trim_start();
                }
                None => {
                    message.prefix = Some(rest);
                    return message;
                }
            }
        }

        let (head, trailing) = match remainder.find(" :") {
            Some(idx) => (&remainder[..idx], Some(&remainder[idx + 2..])),
            None => (remainder, None),
        };
        let mut parts = head.split(' ').filter(|s| !s.is_empty());
        message.command = parts.next();
        message.params.extend(parts);
        if let Some(trailing) = trailing {
            message.params.push(trailing);
        }
        message
    }

    pub fn get_tag_value(&self, key_to_find: &str) -> Option<&'a str> {
        self.tags.and_then(|tags_str| {
            tags_str.split(';').find_map(|component| {
                let mut parts = component.splitn(2, '=');
                let key = parts.next()?;
                if key == key_to_find {
                    parts.next().or(Some(""))
                } else {
                    None
                }
            })
        })
    }

    /// Nick part of a `nick!user@host` prefix. `None` for server prefixes.
    pub fn get_prefix_username(&self) -> Option<&'a str> {
        self.prefix
            .and_then(|p| p.split_once('!'))
            .map(|(nick, _)| nick)
            .filter(|nick| !nick.is_empty())
    }

    pub fn get_privmsg_text_content(&self) -> Option<&'a str> {
        if self.command == Some(CMD_PRIVMSG) && self.params.len() > 1 {
            self.params.last().copied()
        } else {
            None
        }
    }

    /// Trailing parameter, e.g. the text of a NOTICE.
    pub fn trailing(&self) -> Option<&'a str> {
        if self.params.len() > 1 {
            self.params.last().copied()
        } else {
            None
        }
    }

    fn has_badge(&self, badge: &str) -> bool {
        self.get_tag_value(TAG_BADGES).is_some_and(|badges| {
            badges
                .split(',')
                .filter_map(|entry| entry.split_once('/'))
                .any(|(name, version)| name == badge && version == "1")
        })
    }
}

pub fn parse_sender(raw_line: &str) -> TwitchResult<Sender> {
    let message = IrcMessage::parse(raw_line);

    if message.command() != Some(CMD_PRIVMSG) {
        return Err(TwitchError::MalformedEvent(format!(
            "expected {} but got {:?}",
            CMD_PRIVMSG,
            message.command()
        )));
    }
    let username = message
        .get_prefix_username()
        .ok_or_else(|| TwitchError::MalformedEvent("missing sender prefix".to_string()))?;
    let text = message
        .get_privmsg_text_content()
        .ok_or_else(|| TwitchError::MalformedEvent("missing message text".to_string()))?;
    let channel = message
        .params()
        .first()
        .map(|target| target.trim_start_matches('#'))
        .unwrap_or_default();

    Ok(Sender {
        user_id: message
            .get_tag_value(TAG_USER_ID)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        username: username.to_string(),
        display_name: message
            .get_tag_value(TAG_DISPLAY_NAME)
            .filter(|name| !name.is_empty())
            .map(unescape_tag_value),
        channel: channel.to_string(),
        message: clean_message_text(text),
        subscription: parse_subscription(&message),
        moderator: message.get_tag_value(TAG_MOD) == Some("1")
            || message.has_badge(BADGE_MODERATOR),
        broadcaster: message.has_badge(BADGE_BROADCASTER),
        vip: message.has_badge(BADGE_VIP),
        received_at: Utc::now(),
    })
}

pub fn parse_subscription(message: &IrcMessage<'_>) -> Subscription {
    let subscribed = message.get_tag_value(TAG_SUBSCRIBER) == Some("1");
    let months = message
        .get_tag_value(TAG_BADGE_INFO)
        .and_then(|info| {
            info.split(',')
                .find_map(|entry| entry.strip_prefix("subscriber/"))
        })
        .and_then(|months| months.parse::<u32>().ok())
        .unwrap_or(0);
    Subscription::new(subscribed, months)
}

/// Strips trailing whitespace and the invisible characters some clients
/// append to bypass duplicate-message detection.
fn clean_message_text(text: &str) -> String {
    text.trim_end_matches(|c: char| {
        let code = c as u32;
        c.is_control()
            || c.is_whitespace()
            || (0xE0000..=0xE007F).contains(&code)
            || matches!(code, 0x200B | 0x200C | 0x200D | 0xFE0F)
    })
    .to_string()
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAGGED_PRIVMSG: &str = "@badge-info=subscriber/7;badges=subscriber/6,premium/1;color=#8A2BE2;display-name=Kotte\\sSwe;mod=0;subscriber=1;user-id=23654840 :kotteswe!kotteswe@kotteswe.tmi.twitch.tv PRIVMSG #kotteswe :!dice 2 d20\r\n";

    #[test]
    fn test_parse_splits_tags_prefix_command_and_params() {
        let message = IrcMessage::parse(TAGGED_PRIVMSG);
        assert_eq!(message.command(), Some("PRIVMSG"));
        assert_eq!(
            message.prefix(),
            Some("kotteswe!kotteswe@kotteswe.tmi.twitch.tv")
        );
        assert_eq!(message.params(), &["#kotteswe", "!dice 2 d20"]);
        assert_eq!(message.get_tag_value("user-id"), Some("23654840"));
        assert_eq!(message.get_tag_value("color"), Some("#8A2BE2"));
        assert_eq!(message.get_tag_value("missing"), None);
    }

    #[test]
    fn test_parse_control_lines() {
        let ping = IrcMessage::parse("PING :tmi.twitch.tv\r\n");
        assert_eq!(ping.command(), Some("PING"));
        assert_eq!(ping.params(), &["tmi.twitch.tv"]);

        let welcome = IrcMessage::parse(":tmi.twitch.tv 001 bot :Welcome, GLHF!");
        assert_eq!(welcome.command(), Some("001"));
        assert_eq!(welcome.get_prefix_username(), None);

        let ack = IrcMessage::parse(":tmi.twitch.tv CAP * ACK :twitch.tv/tags twitch.tv/commands");
        assert_eq!(ack.command(), Some("CAP"));
        assert_eq!(ack.params(), &["*", "ACK", "twitch.tv/tags twitch.tv/commands"]);
    }

    #[test]
    fn test_trailing_keeps_inner_colons() {
        let message = IrcMessage::parse(":a!a@a PRIVMSG #c :see: this :)");
        assert_eq!(message.get_privmsg_text_content(), Some("see: this :)"));
    }

    #[test]
    fn test_parse_sender_with_full_tag_set() {
        let sender = parse_sender(TAGGED_PRIVMSG).unwrap();
        assert_eq!(sender.user_id(), Some("23654840"));
        assert_eq!(sender.username(), "kotteswe");
        assert_eq!(sender.display_name(), "Kotte Swe");
        assert_eq!(sender.channel(), "kotteswe");
        assert_eq!(sender.message(), "!dice 2 d20");
        assert_eq!(sender.subscription(), Subscription::new(true, 7));
        assert!(!sender.is_moderator());
        assert!(!sender.is_broadcaster());
        assert!(!sender.is_vip());
    }

    #[test]
    fn test_parse_sender_without_tags() {
        let sender = parse_sender(":user123!user@twitch.tv PRIVMSG #chan :!greet world").unwrap();
        assert_eq!(sender.username(), "user123");
        assert_eq!(sender.display_name(), "user123");
        assert_eq!(sender.user_id(), None);
        assert_eq!(sender.message(), "!greet world");
        assert_eq!(sender.subscription(), Subscription::default());
    }

    #[test]
    fn test_subscription_from_response() {
        let subscribed = Subscription::from_response(
            "@badge-info=subscriber/7;badges=subscriber/6;subscriber=1;user-id=1 :a!a@a PRIVMSG #c :hi",
        );
        assert!(subscribed.subscribed());
        assert_eq!(subscribed.months(), 7);

        let not_subscribed =
            Subscription::from_response("@badges=;subscriber=0;user-id=1 :a!a@a PRIVMSG #c :hi");
        assert!(!not_subscribed.subscribed());
        assert_eq!(not_subscribed.months(), 0);
    }

    #[test]
    fn test_subscription_months_zero_when_not_subscribed_or_unknown() {
        let lapsed = Subscription::from_response(
            "@badge-info=subscriber/12;subscriber=0 :a!a@a PRIVMSG #c :hi",
        );
        assert_eq!(lapsed, Subscription::new(false, 0));

        let unknown = Subscription::from_response(
            "@badge-info=subscriber/soon;subscriber=1 :a!a@a PRIVMSG #c :hi",
        );
        assert_eq!(unknown, Subscription::new(true, 0));
    }

    #[test]
    fn test_role_flags_are_independent() {
        let moderator =
            parse_sender("@badges=moderator/1;user-id=5 :m!m@m PRIVMSG #c :hello").unwrap();
        assert!(moderator.is_moderator());
        assert!(!moderator.is_broadcaster());
        assert!(!moderator.is_vip());

        let broadcaster =
            parse_sender("@badges=broadcaster/1,subscriber/0 :b!b@b PRIVMSG #b :hello").unwrap();
        assert!(broadcaster.is_broadcaster());
        assert!(!broadcaster.is_moderator());
        assert!(!broadcaster.is_vip());

        let vip = parse_sender("@badges=subscriber/3,vip/1 :v!v@v PRIVMSG #c :hello").unwrap();
        assert!(vip.is_vip());
        assert!(!vip.is_moderator());
        assert!(!vip.is_broadcaster());
    }

    #[test]
    fn test_parse_sender_rejects_malformed_lines() {
        for line in [
            ":tmi.twitch.tv 001 bot :Welcome, GLHF!",
            ":tmi.twitch.tv PRIVMSG #chan :no nick prefix",
            ":user!user@host PRIVMSG #chan",
            "garbage",
            "",
        ] {
            assert!(
                matches!(parse_sender(line), Err(TwitchError::MalformedEvent(_))),
                "line {:?} should be rejected",
                line
            );
        }
    }

    #[test]
    fn test_trailing_invisible_characters_are_stripped() {
        let sender =
            parse_sender(":a!a@a PRIVMSG #c :!ping \u{E0000}\u{200B}\u{FE0F}  \r\n").unwrap();
        assert_eq!(sender.message(), "!ping");
    }

    #[test]
    fn test_sender_is_stamped_on_receipt() {
        let before = Utc::now();
        let sender = parse_sender(":a!a@a PRIVMSG #c :hi").unwrap();
        let after = Utc::now();
        assert!(sender.received_at() >= before);
        assert!(sender.received_at() <= after);
    }
}
