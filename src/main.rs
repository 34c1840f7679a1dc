// src/main.rs

use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use twitchbot::error::Result as AppResult;
use twitchbot::{Registration, Repeat, TwitchBot, handler, load_settings, task};

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_PKG_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = load_settings()?;
    tracing::info!("Configuration loaded: {:?}", settings);
    let owner = settings.twitch.username.to_lowercase();

    let mut bot = TwitchBot::from_settings(&settings);

    bot.message_handler(
        Registration::new(
            "test_filtered",
            handler(|chat, _sender, _args| async move {
                chat.send_message("Test command with filter!").await?;
                Ok(())
            }),
        )
        .commands(["!test", "!alias1", "!alias2"])
        .filter(move |sender| sender.username() == owner),
    )
    .message_handler(
        Registration::new(
            "greet",
            handler(|chat, sender, args| async move {
                let greeting = match args.first() {
                    Some(who) => format!("{} says hi to {}!", sender.display_name(), who),
                    None => format!("Hi {}!", sender.display_name()),
                };
                chat.send_message(greeting).await?;
                Ok(())
            }),
        )
        .commands(["!greet"]),
    )
    .message_handler(
        Registration::new(
            "shoutout",
            handler(|chat, _sender, args| async move {
                let Some(target) = args.first() else {
                    return Ok(());
                };
                let target = target.trim_start_matches('@');
                chat.send_message(format!("Go check out https://twitch.tv/{}", target))
                    .await?;
                Ok(())
            }),
        )
        .commands(["!so"])
        .filter(|sender| sender.is_moderator() || sender.is_broadcaster()),
    )
    .message_handler(
        Registration::new(
            "subage",
            handler(|chat, sender, _args| async move {
                let subscription = sender.subscription();
                let reply = if subscription.subscribed() {
                    format!(
                        "{} has been subscribed for {} months",
                        sender.display_name(),
                        subscription.months()
                    )
                } else {
                    format!("{} is not subscribed", sender.display_name())
                };
                chat.send_message(reply).await?;
                Ok(())
            }),
        )
        .commands(["!subage"]),
    )
    // No command list, so this catches every chat line the handlers above
    // did not take.
    .message_handler(Registration::new(
        "echo",
        handler(|chat, _sender, args| async move {
            chat.send_message(args.join(" ")).await?;
            Ok(())
        }),
    ));

    bot.schedule_task(
        "every_ten_minutes",
        Duration::from_secs(600),
        Repeat::Forever,
        task(|chat| async move {
            chat.send_message("Type !greet to say hi").await?;
            Ok(())
        }),
    )?
    .schedule_task(
        "warmup_announcement",
        Duration::from_secs(30),
        Repeat::Times(3),
        task(|chat| async move {
            chat.send_message("The bot is up and listening for commands").await?;
            Ok(())
        }),
    )?;

    bot.run().await?;
    Ok(())
}
