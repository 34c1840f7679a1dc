use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::error::{Result as TwitchResult, TwitchError};
use super::irc_parser::{CMD_CAP, CMD_PING, CMD_RECONNECT, IrcMessage, RPL_WELCOME};
use super::transport::{self, TransportReader, TransportWriter};

pub const TWITCH_IRC_HOST: &str = "irc.chat.twitch.tv";
pub const TWITCH_IRC_PORT: u16 = 6667;
pub const TWITCH_CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands";
const ANONYMOUS_PASS: &str = "SCHMOOPIIE";

#[derive(Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// `None` logs in anonymously (read-only) as `justinfan<random>`.
    pub oauth: Option<String>,
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    pub fn new(username: impl Into<String>, oauth: Option<String>) -> Self {
        Self {
            host: TWITCH_IRC_HOST.to_string(),
            port: TWITCH_IRC_PORT,
            username: username.into(),
            oauth,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("oauth", &self.oauth.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// One session with the Twitch IRC server.
///
/// Reader and writer halves are locked separately so the receive loop can wait
/// on a read while handlers write. The reader lock is never held while
/// waiting for the writer lock.
pub struct Connection {
    settings: ConnectionSettings,
    nickname: String,
    reader: Mutex<Option<TransportReader>>,
    writer: Mutex<Option<TransportWriter>>,
    channel: RwLock<Option<String>>,
}

impl Connection {
    pub fn new(settings: ConnectionSettings) -> Self {
        let nickname = if settings.oauth.is_some() {
            settings.username.to_lowercase()
        } else {
            format!("justinfan{}", rand::random::<u32>() % 80000 + 1000)
        };
        Self {
            settings,
            nickname,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            channel: RwLock::new(None),
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    pub async fn channel(&self) -> Option<String> {
        self.channel.read().await.clone()
    }

    /// Opens the transport and performs the CAP/PASS/NICK handshake. Does
    /// nothing when already connected.
    pub async fn connect(&self) -> TwitchResult<()> {
        let mut writer_slot = self.writer.lock().await;
        if writer_slot.is_some() {
            tracing::debug!(nick = %self.nickname, "Already connected. Skipping handshake");
            return Ok(());
        }

        tracing::info!(
            host = %self.settings.host,
            port = self.settings.port,
            nick = %self.nickname,
            "Connecting to Twitch IRC..."
        );
        let (reader, mut writer) = transport::open(
            &self.settings.host,
            self.settings.port,
            self.settings.connect_timeout,
        )
        .await?;

        let pass = match &self.settings.oauth {
            Some(token) if token.starts_with("oauth:") => token.clone(),
            Some(token) => format!("oauth:{}", token),
            None => ANONYMOUS_PASS.to_string(),
        };
        let handshake = async {
            writer
                .write_line(&format!("CAP REQ :{}", TWITCH_CAPABILITIES))
                .await?;
            writer.write_line(&format!("PASS {}", pass)).await?;
            writer.write_line(&format!("NICK {}", self.nickname)).await?;
            writer.flush().await
        };
        if let Err(e) = handshake.await {
            tracing::error!(error = %e, "Handshake failed");
            return Err(TwitchError::Connection(format!("handshake failed: {}", e)));
        }

        *self.reader.lock().await = Some(reader);
        *writer_slot = Some(writer);
        tracing::info!("TCP connected. Capabilities requested and credentials sent");
        Ok(())
    }

    pub async fn join_channel(&self, name: &str) -> TwitchResult<()> {
        let channel = name.trim_start_matches('#').to_lowercase();
        {
            let mut writer_slot = self.writer.lock().await;
            let writer = writer_slot.as_mut().ok_or(TwitchError::NotConnected)?;
            writer.write_line(&format!("JOIN #{}", channel)).await?;
            writer.flush().await?;
        }
        tracing::info!(channel.name = %channel, "Joined channel");
        *self.channel.write().await = Some(channel);
        Ok(())
    }

    /// Sends a chat message to the joined channel. A failed write is logged
    /// and swallowed.
    pub async fn send_message(&self, text: &str) -> TwitchResult<()> {
        let mut writer_slot = self.writer.lock().await;
        let writer = writer_slot.as_mut().ok_or(TwitchError::NotConnected)?;
        let channel = self.channel.read().await.clone().ok_or(TwitchError::NoChannel)?;

        let line = format!("PRIVMSG #{} :{}", channel, sanitize_outbound(text));
        let result = async {
            writer.write_line(&line).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::error!(channel.name = %channel, error = %e, "Error while sending message");
        }
        Ok(())
    }

    /// Reads the next line from the server.
    ///
    /// Control lines (PING, the welcome banner, capability ACKs and RECONNECT)
    /// are handled here and yield `None`, as do read and decode errors. Any
    /// other line is returned unchanged.
    pub async fn get_response(&self) -> Option<String> {
        let read = {
            let mut reader_slot = self.reader.lock().await;
            match reader_slot.as_mut() {
                Some(reader) => reader.read_line().await,
                None => {
                    tracing::error!(error = %TwitchError::NotConnected, "Error while receiving data");
                    return None;
                }
            }
        };

        let bytes = match read {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::warn!("Server closed the connection");
                self.drop_transport().await;
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error while receiving data. Dropping transport");
                self.drop_transport().await;
                return None;
            }
        };
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Received a line that is not valid UTF-8");
                return None;
            }
        };

        let message = IrcMessage::parse(&line);
        match message.command() {
            Some(CMD_PING) => {
                let target = message.params().first().copied().unwrap_or("tmi.twitch.tv");
                self.send_pong(target).await;
                None
            }
            Some(RPL_WELCOME) => {
                tracing::info!(nick = %self.nickname, "Authenticated successfully (RPL_WELCOME)");
                None
            }
            Some(CMD_CAP) if message.params().get(1) == Some(&"ACK") => {
                tracing::debug!(
                    capabilities = message.params().get(2).copied().unwrap_or_default(),
                    "Capability ACK"
                );
                None
            }
            Some(CMD_RECONNECT) => {
                tracing::info!("Received RECONNECT command. Dropping transport");
                self.drop_transport().await;
                None
            }
            _ if line.trim().is_empty() => None,
            _ => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    async fn send_pong(&self, target: &str) {
        let mut writer_slot = self.writer.lock().await;
        let Some(writer) = writer_slot.as_mut() else {
            tracing::error!(error = %TwitchError::NotConnected, "Error while answering PING");
            return;
        };
        let result = async {
            writer.write_line(&format!("PONG :{}", target)).await?;
            writer.flush().await
        }
        .await;
        match result {
            Ok(()) => tracing::debug!("Received server PING, responded with PONG"),
            Err(e) => tracing::error!(error = %e, "Error while answering PING"),
        }
    }

    pub async fn quit_channel(&self) {
        let Some(channel) = self.channel.write().await.take() else {
            return;
        };
        let mut writer_slot = self.writer.lock().await;
        let Some(writer) = writer_slot.as_mut() else {
            tracing::warn!(channel.name = %channel, "Socket is not connected");
            return;
        };
        let result = async {
            writer.write_line(&format!("PART #{}", channel)).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::error!(channel.name = %channel, error = %e, "Error while quitting channel");
        }
    }

    /// Sends QUIT and releases the transport. Every step runs even when an
    /// earlier one failed.
    pub async fn disconnect(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.write_line("QUIT").await {
                tracing::error!(error = %e, "Error while sending QUIT");
            }
            if let Err(e) = writer.flush().await {
                tracing::error!(error = %e, "Error while flushing QUIT");
            }
            if let Err(e) = writer.close().await {
                tracing::debug!(error = %e, "Error while closing write half");
            }
        }
        self.reader.lock().await.take();
        self.channel.write().await.take();
        tracing::info!("Disconnected from Twitch IRC server");
    }

    /// Releases the transport without the QUIT exchange, for a server that
    /// already went away.
    pub async fn drop_transport(&self) {
        self.writer.lock().await.take();
        self.reader.lock().await.take();
        self.channel.write().await.take();
    }
}

/// Outbound text must stay on one protocol line.
fn sanitize_outbound(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Cloneable handle handlers and scheduled tasks use to talk to chat.
#[derive(Clone)]
pub struct Chat {
    connection: Arc<Connection>,
}

impl Chat {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub async fn send_message(&self, text: impl AsRef<str>) -> TwitchResult<()> {
        self.connection.send_message(text.as_ref()).await
    }

    pub async fn channel(&self) -> Option<String> {
        self.connection.channel().await
    }

    pub fn nickname(&self) -> &str {
        self.connection.nickname()
    }
}

impl fmt::Debug for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chat")
            .field("nickname", &self.connection.nickname())
            .finish()
    }
}
