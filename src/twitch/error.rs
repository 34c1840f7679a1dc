use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwitchError {
    #[error("You are not connected to the Twitch IRC server")]
    NotConnected,
    #[error("You are not in any channel")]
    NoChannel,
    #[error("Malformed chat event: {0}")]
    MalformedEvent(String),
    #[error("Could not open connection: {0}")]
    Connection(String),
    #[error("Handler '{handler}' failed: {reason}")]
    HandlerInvocation { handler: String, reason: String },
    #[error("Filter of handler '{handler}' failed: {reason}")]
    Predicate { handler: String, reason: String },
    #[error("Invalid scheduled task: {0}")]
    InvalidSchedule(String),
    #[error("Twitch IRC authentication error: {0}")]
    TwitchAuth(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = TwitchError> = std::result::Result<T, E>;

/// Error type returned by user handlers and scheduled task callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = std::result::Result<(), BoxError>;
