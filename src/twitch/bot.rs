use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::connection::{Chat, Connection, ConnectionSettings};
use super::dispatcher::{DEFAULT_FLOOD_DELAY, HandlerRegistry, Registration, tokenize};
use super::error::{Result as TwitchResult, TwitchError};
use super::irc_parser::{CMD_NOTICE, CMD_PRIVMSG, IrcMessage};
use super::scheduler::{Repeat, Scheduler, TaskFn};
use super::signals;
use super::types::{BotStatus, Sender};
use crate::config::BotSettings;

pub const CHAT_LOG_TARGET: &str = "twitchbot::chat";

const AUTH_ERROR_LOGIN_FAILED: &str = "Login authentication failed";
const AUTH_ERROR_IMPROPERLY_FORMATTED: &str = "Improperly formatted auth";
const BASE_BACKOFF_SECONDS: u64 = 5;
const MAX_BACKOFF_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct BotOptions {
    pub flood_delay: Duration,
    /// Upper bound for waiting on scheduled tasks and handlers at shutdown.
    pub shutdown_timeout: Duration,
    /// A connection that stays silent this long is treated as dead.
    pub keepalive_timeout: Duration,
    pub handle_signals: bool,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            flood_delay: DEFAULT_FLOOD_DELAY,
            shutdown_timeout: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(400),
            handle_signals: true,
        }
    }
}

/// Requests a graceful stop of a running [`TwitchBot`].
#[derive(Clone, Debug)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Stopping TwitchBOT...");
        }
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Connects, joins one channel, runs the scheduler and dispatches chat
/// commands until stopped.
pub struct TwitchBot {
    id: Uuid,
    channel: String,
    connection: Arc<Connection>,
    registry: HandlerRegistry,
    scheduler: Scheduler,
    options: BotOptions,
    shutdown: CancellationToken,
    status_tx: watch::Sender<BotStatus>,
}

impl TwitchBot {
    pub fn new(settings: ConnectionSettings, channel: impl Into<String>, options: BotOptions) -> Self {
        let shutdown = CancellationToken::new();
        let (status_tx, _) = watch::channel(BotStatus::Idle);
        Self {
            id: Uuid::new_v4(),
            channel: channel.into().trim_start_matches('#').to_lowercase(),
            connection: Arc::new(Connection::new(settings)),
            registry: HandlerRegistry::new(options.flood_delay),
            scheduler: Scheduler::new(shutdown.child_token()),
            options,
            shutdown,
            status_tx,
        }
    }

    pub fn from_settings(settings: &BotSettings) -> Self {
        Self::new(
            settings.connection_settings(),
            settings.twitch.channel.clone(),
            settings.bot_options(),
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn message_handler(&mut self, registration: Registration) -> &mut Self {
        self.registry.register(registration);
        self
    }

    pub fn schedule_task(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        repeat: impl Into<Repeat>,
        callback: TaskFn,
    ) -> TwitchResult<&mut Self> {
        self.scheduler.schedule_task(name, interval, repeat, callback)?;
        Ok(self)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.shutdown.clone(),
        }
    }

    pub fn status(&self) -> watch::Receiver<BotStatus> {
        self.status_tx.subscribe()
    }

    pub fn chat(&self) -> Chat {
        Chat::new(Arc::clone(&self.connection))
    }

    /// Runs until [`StopHandle::stop`] is called, a termination signal
    /// arrives, or authentication is rejected.
    ///
    /// Failing to connect or join the channel aborts startup with an error.
    pub async fn run(mut self) -> TwitchResult<()> {
        tracing::info!(bot.id = %self.id, channel.name = %self.channel, "Running TwitchBOT...");
        let signal_listener = self
            .options
            .handle_signals
            .then(|| signals::spawn_signal_listener(self.shutdown.clone()));

        self.update_status(BotStatus::Connecting { attempt: 1 });
        if let Err(e) = self.connect_and_join().await {
            tracing::error!(bot.id = %self.id, error = %e, "Startup failed");
            self.connection.disconnect().await;
            self.update_status(BotStatus::Stopped);
            if let Some(listener) = signal_listener {
                listener.abort();
            }
            return Err(e);
        }
        self.update_status(BotStatus::Joined {
            channel: self.channel.clone(),
        });

        let chat = self.chat();
        let scheduler = std::mem::take(&mut self.scheduler);
        let scheduler_chat = chat.clone();
        let mut scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_chat).await });
        let mut handler_tasks = JoinSet::new();

        self.update_status(BotStatus::Running);
        let outcome = self.receive_loop(&chat, &mut handler_tasks).await;

        self.update_status(BotStatus::Stopping);
        self.shutdown.cancel();
        self.connection.quit_channel().await;
        self.connection.disconnect().await;

        let drain = async {
            if let Err(e) = (&mut scheduler_task).await {
                tracing::error!(error = %e, "Scheduler task panicked or was cancelled");
            }
            while let Some(result) = handler_tasks.join_next().await {
                log_handler_outcome(result);
            }
        };
        if tokio::time::timeout(self.options.shutdown_timeout, drain)
            .await
            .is_err()
        {
            tracing::warn!(
                bot.id = %self.id,
                timeout = ?self.options.shutdown_timeout,
                outstanding_handlers = handler_tasks.len(),
                "Shutdown drain timed out. Aborting outstanding tasks"
            );
            scheduler_task.abort();
            handler_tasks.abort_all();
        }

        if let Some(listener) = signal_listener {
            listener.abort();
        }
        self.update_status(BotStatus::Stopped);
        tracing::info!(bot.id = %self.id, "TwitchBOT stopped");
        outcome
    }

    async fn connect_and_join(&self) -> TwitchResult<()> {
        self.connection.connect().await?;
        self.connection.join_channel(&self.channel).await
    }

    async fn receive_loop(&self, chat: &Chat, tasks: &mut JoinSet<()>) -> TwitchResult<()> {
        let mut reconnect_attempts = 0u32;

        loop {
            while let Some(result) = tasks.try_join_next() {
                log_handler_outcome(result);
            }

            if !self.connection.is_connected().await {
                reconnect_attempts += 1;
                let retry_in = backoff_delay(reconnect_attempts);
                self.update_status(BotStatus::Reconnecting {
                    reason: "Connection lost".to_string(),
                    failed_attempt: reconnect_attempts,
                    retry_in,
                });
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(retry_in) => {}
                }
                self.update_status(BotStatus::Connecting {
                    attempt: reconnect_attempts + 1,
                });
                match self.connect_and_join().await {
                    Ok(()) => {
                        reconnect_attempts = 0;
                        self.update_status(BotStatus::Running);
                    }
                    Err(e) => {
                        tracing::error!(
                            bot.id = %self.id,
                            attempt = reconnect_attempts,
                            error = %e,
                            "Reconnect attempt failed"
                        );
                        self.connection.drop_transport().await;
                    }
                }
                continue;
            }

            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                read = tokio::time::timeout(
                    self.options.keepalive_timeout,
                    self.connection.get_response(),
                ) => read,
            };
            match read {
                Ok(Some(line)) => self.handle_line(&line, chat, tasks).await?,
                Ok(None) => {}
                Err(_) => {
                    tracing::warn!(
                        bot.id = %self.id,
                        timeout = ?self.options.keepalive_timeout,
                        "No server activity. Connection appears dead"
                    );
                    self.connection.drop_transport().await;
                }
            }
        }
    }

    async fn handle_line(
        &self,
        line: &str,
        chat: &Chat,
        tasks: &mut JoinSet<()>,
    ) -> TwitchResult<()> {
        let message = IrcMessage::parse(line);
        match message.command() {
            Some(CMD_PRIVMSG) => match Sender::parse(line) {
                Ok(sender) => {
                    let tokens = tokenize(sender.message());
                    let sender = Arc::new(sender);
                    match self
                        .registry
                        .dispatch(chat, Arc::clone(&sender), tokens, tasks)
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::info!(
                                target: CHAT_LOG_TARGET,
                                received_at = %sender.received_at(),
                                "{}: {}",
                                sender.username(),
                                sender.message()
                            );
                        }
                        Err(e) => {
                            tracing::error!(bot.id = %self.id, error = %e, "Dispatch failed");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(bot.id = %self.id, error = %e, line = %line, "Unparseable chat line");
                }
            },
            Some(CMD_NOTICE) => {
                let text = message.trailing().unwrap_or_default();
                if text.contains(AUTH_ERROR_LOGIN_FAILED)
                    || text.contains(AUTH_ERROR_IMPROPERLY_FORMATTED)
                {
                    tracing::error!(bot.id = %self.id, notice = %text, "Authentication failed via NOTICE");
                    return Err(TwitchError::TwitchAuth(text.to_string()));
                }
                tracing::info!(bot.id = %self.id, "{}", line);
            }
            _ => tracing::info!(bot.id = %self.id, "{}", line),
        }
        Ok(())
    }

    fn update_status(&self, new_status: BotStatus) {
        if *self.status_tx.borrow() == new_status {
            return;
        }
        tracing::info!(bot.id = %self.id, status = ?new_status, "New status");
        self.status_tx.send_replace(new_status);
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let delay = BASE_BACKOFF_SECONDS * 2u64.pow(attempt.saturating_sub(1).min(6));
    Duration::from_secs(delay.min(MAX_BACKOFF_SECONDS))
}

fn log_handler_outcome(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            let error = TwitchError::HandlerInvocation {
                handler: "dispatched handler".to_string(),
                reason: "panicked".to_string(),
            };
            tracing::error!(error = %error, "Task raised an exception");
        } else {
            tracing::debug!(error = %e, "Handler task cancelled");
        }
    }
}
