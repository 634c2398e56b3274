//! Bot initialization and command definitions

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::config;
use crate::core::error::{AppError, AppResult};

/// Клиентские команды бота.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Я умею:")]
pub enum Command {
    #[command(description = "начало работы")]
    Start,
    #[command(description = "моя подписка и ссылка для подключения")]
    Stat,
    #[command(description = "справка")]
    Info,
}

/// Creates a Bot instance with the shared HTTP timeout.
///
/// The token comes from telegram_settings in the database, with the
/// BOT_TOKEN environment variable as a fallback.
pub fn create_bot(token: &str) -> AppResult<Bot> {
    let client = ClientBuilder::new()
        .timeout(config::network::timeout())
        .build()
        .map_err(|e| AppError::RemoteUnavailable(format!("http client: {e}")))?;
    Ok(Bot::with_client(token, client))
}

/// Registers the command list in the Telegram UI.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::types::BotCommand;

    bot.set_my_commands(vec![
        BotCommand::new("start", "начало работы"),
        BotCommand::new("stat", "моя подписка и ссылка для подключения"),
        BotCommand::new("info", "справка"),
    ])
    .await?;

    Ok(())
}
