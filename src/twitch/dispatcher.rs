use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::connection::Chat;
use super::error::{BoxError, HandlerResult, Result as TwitchResult, TwitchError};
use super::types::Sender;

/// Pause after each dispatched command before the next line is read.
pub const DEFAULT_FLOOD_DELAY: Duration = Duration::from_millis(100);

pub type HandlerFn =
    Arc<dyn Fn(Chat, Arc<Sender>, Vec<String>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(&Sender) -> Result<bool, BoxError> + Send + Sync>;

/// Wraps an async closure into a [`HandlerFn`].
pub fn handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Chat, Arc<Sender>, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |chat, sender, args| f(chat, sender, args).boxed())
}

#[derive(Clone)]
pub struct Registration {
    name: String,
    commands: Option<Vec<String>>,
    filter: Option<FilterFn>,
    callback: HandlerFn,
}

impl Registration {
    /// A catch-all registration until [`Registration::commands`] is called.
    pub fn new(name: impl Into<String>, callback: HandlerFn) -> Self {
        Self {
            name: name.into(),
            commands: None,
            filter: None,
            callback,
        }
    }

    pub fn commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = Some(commands.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&Sender) -> bool + Send + Sync + 'static,
    {
        self.try_filter(move |sender| Ok(predicate(sender)))
    }

    /// Like [`Registration::filter`], for predicates that can fail. A failure
    /// is reported by [`HandlerRegistry::dispatch`].
    pub fn try_filter<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Sender) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-sensitive command match; no command list matches everything.
    fn matches_command(&self, command: &str) -> bool {
        self.commands
            .as_ref()
            .is_none_or(|commands| commands.iter().any(|c| c == command))
    }
}

/// Ordered command handlers. The first matching registration wins.
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
    flood_delay: Duration,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOD_DELAY)
    }
}

impl HandlerRegistry {
    pub fn new(flood_delay: Duration) -> Self {
        Self {
            registrations: Vec::new(),
            flood_delay,
        }
    }

    pub fn register(&mut self, registration: Registration) {
        tracing::debug!(
            handler = %registration.name,
            commands = ?registration.commands,
            "Registered message handler"
        );
        self.registrations.push(registration);
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Routes `tokens` (`[command, args...]`) to the first registration whose
    /// command list and filter both accept it. The handler is spawned into
    /// `tasks`; this call returns after the flood delay without waiting for it.
    ///
    /// Returns `Ok(false)` when no registration matched.
    pub async fn dispatch(
        &self,
        chat: &Chat,
        sender: Arc<Sender>,
        tokens: Vec<String>,
        tasks: &mut JoinSet<()>,
    ) -> TwitchResult<bool> {
        let Some(command) = tokens.first() else {
            return Ok(false);
        };

        for registration in &self.registrations {
            if !registration.matches_command(command) {
                continue;
            }
            if let Some(filter) = &registration.filter {
                match filter(&sender) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        return Err(TwitchError::Predicate {
                            handler: registration.name.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            let args = if registration.commands.is_some() {
                tracing::info!(
                    handler = %registration.name,
                    user = %sender.username(),
                    command = %command,
                    args = ?&tokens[1..],
                    "Command performed"
                );
                tokens[1..].to_vec()
            } else {
                tracing::info!(
                    handler = %registration.name,
                    user = %sender.username(),
                    args = ?tokens,
                    "Catch-all handler performed"
                );
                tokens
            };

            let name = registration.name.clone();
            let invocation = (registration.callback)(chat.clone(), sender, args);
            tasks.spawn(async move {
                if let Err(e) = invocation.await {
                    let error = TwitchError::HandlerInvocation {
                        handler: name,
                        reason: e.to_string(),
                    };
                    tracing::error!(error = %error, "Task raised an exception");
                }
            });

            if !self.flood_delay.is_zero() {
                tokio::time::sleep(self.flood_delay).await;
            }
            return Ok(true);
        }
        Ok(false)
    }
}

/// Splits a chat message into `[command, args...]` on whitespace.
pub fn tokenize(message: &str) -> Vec<String> {
    message.split_whitespace().map(str::to_string).collect()
}
