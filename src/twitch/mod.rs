pub mod bot;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod irc_parser;
pub mod scheduler;
pub mod signals;
pub mod transport;
pub mod types;

pub use bot::{BotOptions, StopHandle, TwitchBot};
pub use connection::{Chat, Connection, ConnectionSettings};
pub use dispatcher::{HandlerRegistry, Registration, handler};
pub use error::{BoxError, HandlerResult, TwitchError};
pub use scheduler::{Repeat, Scheduler, task};
pub use types::{BotStatus, Sender, Subscription};
