use crate::error::{ConfigError, Result as AppResult};
use crate::twitch::connection::{ConnectionSettings, TWITCH_IRC_HOST, TWITCH_IRC_PORT};
use crate::twitch::dispatcher::DEFAULT_FLOOD_DELAY;
use crate::twitch::BotOptions;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

#[derive(Deserialize)]
pub struct TwitchConfig {
    pub username: String,
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub oauth: Option<String>,
    #[serde(deserialize_with = "deserialize_channel_name")]
    pub channel: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("username", &self.username)
            .field("oauth", &self.oauth.as_ref().map(|_| "<redacted>"))
            .field("channel", &self.channel)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    pub flood_delay_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub handle_signals: bool,
}

#[derive(Debug, Deserialize)]
pub struct BotSettings {
    pub twitch: TwitchConfig,
    pub runtime: RuntimeConfig,
}

impl BotSettings {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            host: self.twitch.host.clone(),
            port: self.twitch.port,
            username: self.twitch.username.clone(),
            oauth: self.twitch.oauth.clone(),
            connect_timeout: Duration::from_secs(self.runtime.connect_timeout_secs),
        }
    }

    pub fn bot_options(&self) -> BotOptions {
        BotOptions {
            flood_delay: Duration::from_millis(self.runtime.flood_delay_ms),
            shutdown_timeout: Duration::from_secs(self.runtime.shutdown_timeout_secs),
            keepalive_timeout: Duration::from_secs(self.runtime.keepalive_timeout_secs),
            handle_signals: self.runtime.handle_signals,
        }
    }
}

/// Loads settings from an optional `config` file and `TWITCHBOT__*`
/// environment variables, on top of compiled defaults.
pub fn load_settings() -> AppResult<BotSettings> {
    let builder = default_builder()?
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("TWITCHBOT")
                .separator("__")
                .try_parsing(true),
        );
    settings_from_builder(builder)
}

fn default_builder() -> AppResult<ConfigBuilder<DefaultState>> {
    let defaults = BotOptions::default();
    Config::builder()
        .set_default("twitch.host", TWITCH_IRC_HOST)
        .and_then(|b| b.set_default("twitch.port", i64::from(TWITCH_IRC_PORT)))
        .and_then(|b| {
            b.set_default(
                "runtime.flood_delay_ms",
                DEFAULT_FLOOD_DELAY.as_millis() as i64,
            )
        })
        .and_then(|b| {
            b.set_default(
                "runtime.shutdown_timeout_secs",
                defaults.shutdown_timeout.as_secs() as i64,
            )
        })
        .and_then(|b| {
            b.set_default(
                "runtime.keepalive_timeout_secs",
                defaults.keepalive_timeout.as_secs() as i64,
            )
        })
        .and_then(|b| b.set_default("runtime.connect_timeout_secs", 15i64))
        .and_then(|b| b.set_default("runtime.handle_signals", defaults.handle_signals))
        .map_err(|e| ConfigError::Load(e.to_string()).into())
}

fn settings_from_builder(builder: ConfigBuilder<DefaultState>) -> AppResult<BotSettings> {
    let settings: BotSettings = builder.build()?.try_deserialize()?;

    if settings.twitch.username.trim().is_empty() {
        return Err(ConfigError::Missing("twitch.username".to_string()).into());
    }
    if settings.runtime.shutdown_timeout_secs == 0 {
        return Err(ConfigError::InvalidValue(
            "runtime.shutdown_timeout_secs must be positive".to_string(),
        )
        .into());
    }
    Ok(settings)
}

fn deserialize_channel_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = String::deserialize(deserializer)?;
    let channel = raw.trim().trim_start_matches('#').to_lowercase();
    if channel.is_empty() {
        return Err(D::Error::custom("channel name must not be empty"));
    }
    Ok(channel)
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
