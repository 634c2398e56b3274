//! Telegram bot integration and handlers

pub mod bot;
pub mod callbacks;
pub mod commands;
pub mod notifications;

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;

use crate::storage::db::DbPool;
use bot::Command;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub db_pool: DbPool,
}

/// Creates the dispatcher handler tree.
///
/// The same schema is used in production and in tests.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_commands = deps.clone();
    let deps_callbacks = deps;

    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                    let deps = deps_commands.clone();
                    async move {
                        let result = match cmd {
                            Command::Start => commands::handle_start(&bot, &msg, &deps.db_pool).await,
                            Command::Stat => commands::handle_stat(&bot, &msg, &deps.db_pool).await,
                            Command::Info => commands::handle_info(&bot, &msg, &deps.db_pool).await,
                        };
                        if let Err(e) = result {
                            log::error!("Command {:?} in chat {} failed: {}", cmd, msg.chat.id, e);
                            let _ = bot
                                .send_message(msg.chat.id, "⚠️ Что-то пошло не так, попробуйте позже.")
                                .await;
                        }
                        Ok(())
                    }
                }),
        )
        .branch(
            Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
                let deps = deps_callbacks.clone();
                async move {
                    if let Err(e) = callbacks::handle_callback(&bot, &q, &deps.db_pool).await {
                        log::error!("Callback in chat failed: {}", e);
                    }
                    Ok(())
                }
            }),
        )
}
