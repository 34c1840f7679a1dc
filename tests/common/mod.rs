#![allow(dead_code)]

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

use twitchbot::twitch::ConnectionSettings;

pub const SERVER_NAME: &str = "tmi.twitch.tv";
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal stand-in for the Twitch IRC server, bound to an ephemeral port.
pub struct SpoofServer {
    listener: TcpListener,
    port: u16,
}

pub struct SpoofClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SpoofServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn settings(&self, username: &str, oauth: Option<&str>) -> ConnectionSettings {
        let mut settings = ConnectionSettings::new(username, oauth.map(str::to_string));
        settings.host = "127.0.0.1".to_string();
        settings.port = self.port;
        settings.connect_timeout = IO_TIMEOUT;
        settings
    }

    pub async fn accept(&self) -> SpoofClient {
        self.accept_within(IO_TIMEOUT).await
    }

    pub async fn accept_within(&self, timeout: Duration) -> SpoofClient {
        let (stream, _) = tokio::time::timeout(timeout, self.listener.accept())
            .await
            .expect("client did not connect in time")
            .unwrap();
        let (reader, writer) = stream.into_split();
        SpoofClient {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Accepts a client and consumes its CAP/PASS/NICK handshake.
    pub async fn accept_handshake(&self) -> (SpoofClient, Vec<String>) {
        self.accept_handshake_within(IO_TIMEOUT).await
    }

    pub async fn accept_handshake_within(&self, timeout: Duration) -> (SpoofClient, Vec<String>) {
        let mut client = self.accept_within(timeout).await;
        let mut handshake = Vec::new();
        for _ in 0..3 {
            handshake.push(client.expect_line().await);
        }
        (client, handshake)
    }
}

impl SpoofClient {
    /// Next line from the client without the line terminator. `None` on EOF.
    pub async fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(IO_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("client sent nothing in time")
            .unwrap();
        if read == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    pub async fn expect_line(&mut self) -> String {
        self.next_line().await.expect("client closed the connection")
    }

    /// Skips lines until one starts with `prefix`.
    pub async fn expect_line_starting_with(&mut self, prefix: &str) -> String {
        loop {
            let line = self.expect_line().await;
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send_welcome(&mut self, nick: &str) {
        self.send(&format!(":{} CAP * ACK :twitch.tv/tags twitch.tv/commands", SERVER_NAME))
            .await;
        self.send(&format!(":{} 001 {} :Welcome, GLHF!", SERVER_NAME, nick))
            .await;
    }

    pub async fn send_privmsg(&mut self, tags: &str, user: &str, channel: &str, text: &str) {
        let prefix = format!(":{0}!{0}@{0}.{1}", user, SERVER_NAME);
        let line = if tags.is_empty() {
            format!("{} PRIVMSG #{} :{}", prefix, channel, text)
        } else {
            format!("@{} {} PRIVMSG #{} :{}", tags, prefix, channel, text)
        };
        self.send(&line).await;
    }

    pub async fn close(self) {
        drop(self.reader);
        let mut writer = self.writer;
        let _ = writer.shutdown().await;
    }
}
