//! Entry point: wires the database, the background renewal engine and
//! the Telegram dispatcher together.

use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use tokio::time::sleep;

use xui_billing::core::config;
use xui_billing::core::logging::init_logger;
use xui_billing::core::services::RunningServices;
use xui_billing::storage::{db, settings};
use xui_billing::telegram::notifications::TelegramNotify;
use xui_billing::telegram::{bot::create_bot, bot::setup_bot_commands, schema, HandlerDeps};

#[tokio::main]
async fn main() -> Result<()> {
    // Set up global panic handler to catch panics in dispatcher
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    init_logger(&config::LOG_FILE_PATH)?;
    let _ = dotenv();

    let db_pool = db::create_pool(&config::DATABASE_PATH)?;
    log::info!("Database ready at {}", *config::DATABASE_PATH);

    // The token lives in telegram_settings; the environment is a
    // fallback for first runs with an empty database.
    let token = {
        let conn = db::get_connection(&db_pool)?;
        settings::get_telegram_settings(&conn)?
            .bot_token
            .filter(|t| !t.is_empty())
            .or_else(|| Some(config::BOT_TOKEN.clone()).filter(|t| !t.is_empty()))
            .ok_or_else(|| anyhow::anyhow!("bot token is not configured"))?
    };

    let bot = create_bot(&token)?;
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    let notify = Arc::new(TelegramNotify::new(bot.clone()));
    let mut services = RunningServices::start(db_pool.clone(), notify)?;

    let handler = schema(HandlerDeps {
        db_pool: db_pool.clone(),
    });

    log::info!("================================================");
    log::info!("🎉 Initialization complete");
    log::info!("📡 Ready to receive updates!");
    log::info!("================================================");

    // Run the dispatcher with retry logic
    let mut retry_count = 0u32;
    loop {
        let bot_clone = bot.clone();
        let handler_clone = handler.clone();

        // Run the dispatcher in a separate task to isolate panics
        let handle = tokio::spawn(async move {
            let listener = Polling::builder(bot_clone.clone()).drop_pending_updates().build();

            Dispatcher::builder(bot_clone, handler_clone)
                .dependencies(DependencyMap::new())
                .enable_ctrlc_handler()
                .build()
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await
        });

        match handle.await {
            Ok(()) => {
                log::info!("Dispatcher shutdown gracefully");
                break;
            }
            Err(join_err) => {
                if join_err.is_panic() {
                    log::error!("Dispatcher panicked: {}", join_err);
                    if retry_count < config::retry::MAX_DISPATCHER_RETRIES {
                        retry_count += 1;
                        log::info!(
                            "Retrying dispatcher connection (attempt {}/{})...",
                            retry_count,
                            config::retry::MAX_DISPATCHER_RETRIES
                        );
                        sleep(config::retry::dispatcher_delay()).await;
                    } else {
                        log::error!("Max retries reached. Exiting...");
                        break;
                    }
                } else {
                    log::warn!("Dispatcher task was cancelled: {}", join_err);
                    break;
                }
            }
        }
    }

    services.stop().await;
    Ok(())
}
