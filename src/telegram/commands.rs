//! Обработчики клиентских команд.

use log::{info, warn};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile};

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::panel::link::build_vless_link;
use crate::panel::types::{ClientStat, PanelClient};
use crate::panel::{PanelApi, MS_PER_DAY};
use crate::storage::db::{self, DbPool};
use crate::storage::settings;

pub const BYTES_PER_GB: i64 = 1024 * 1024 * 1024;

const DEFAULT_WELCOME: &str =
    "👋 Привет! Я помогу управлять вашей VPN-подпиской.\nОтправьте /stat, чтобы посмотреть подписку и получить ссылку для подключения.";
const DEFAULT_INFO: &str = "Команды:\n/stat — подписка и ссылка для подключения\n/info — эта справка";
const DEFAULT_NOT_FOUND: &str = "Для вашего аккаунта не найдена подписка. Обратитесь в поддержку.";

/// Текст из bot_messages, если он задан и включен, иначе текст по
/// умолчанию.
fn message_or_default(conn: &db::DbConnection, message_type: &str, default: &str) -> AppResult<String> {
    Ok(settings::get_bot_message(conn, message_type)?
        .filter(|m| m.is_enabled)
        .and_then(|m| m.message_text)
        .unwrap_or_else(|| default.to_string()))
}

/// E-mail тестового аккаунта, производный от chat id.
fn trial_email(tgid: &str) -> String {
    format!("{}@{}", tgid, *config::trial::EMAIL_DOMAIN)
}

/// /start: приветствие из bot_messages или текст по умолчанию.
pub async fn handle_start(bot: &Bot, msg: &Message, pool: &DbPool) -> AppResult<()> {
    let conn = db::get_connection(pool)?;
    let custom = settings::get_bot_message(&conn, "welcome")?.filter(|m| m.is_enabled);

    match custom {
        Some(message) => {
            let text = message.message_text.unwrap_or_else(|| DEFAULT_WELCOME.to_string());
            match message.image_path.filter(|_| message.show_image) {
                Some(path) => {
                    bot.send_photo(msg.chat.id, InputFile::file(path)).caption(text).await?;
                }
                None => {
                    bot.send_message(msg.chat.id, text).await?;
                }
            }
        }
        None => {
            bot.send_message(msg.chat.id, DEFAULT_WELCOME).await?;
        }
    }
    Ok(())
}

/// /info: справка из bot_messages или текст по умолчанию.
pub async fn handle_info(bot: &Bot, msg: &Message, pool: &DbPool) -> AppResult<()> {
    let conn = db::get_connection(pool)?;
    let text = message_or_default(&conn, "info", DEFAULT_INFO)?;
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// /stat: показывает подписку привязанного клиента. Неизвестному чату
/// выдается тестовый аккаунт, если выдача включена.
pub async fn handle_stat(bot: &Bot, msg: &Message, pool: &DbPool) -> AppResult<()> {
    let tgid = msg.chat.id.0.to_string();
    let conn = db::get_connection(pool)?;

    let panel_settings = settings::get_panel_settings(&conn)?;
    let panel = PanelApi::connect(&panel_settings).await?;

    let email = match db::get_email_by_tgid(&conn, &tgid)? {
        Some(email) => email,
        None => return provision_trial(bot, msg, pool, &panel, &tgid).await,
    };

    let (inbound, client) = match panel.find_client(&email).await? {
        Some(found) => found,
        None => {
            // Привязка пережила удаленного на панели клиента.
            bot.send_message(
                msg.chat.id,
                "Аккаунт не найден на сервере. Обратитесь в поддержку.",
            )
            .await?;
            return Ok(());
        }
    };

    let now_ms = chrono::Utc::now().timestamp_millis();

    // Истекшая подписка: вместо статистики и ссылки только предложение
    // продлить.
    if subscription_expired(client.expiry_time, now_ms) {
        bot.send_message(msg.chat.id, "Подписка истекла. Продлить?")
            .reply_markup(renew_keyboard(&email, inbound.id))
            .await?;
        return Ok(());
    }

    let mut text = format_client_stats(&client, inbound.stat_for(&email), now_ms);
    match build_vless_link(&panel_settings.panel_url, &inbound, &client) {
        Ok(link) => {
            text.push_str("\n\nСсылка для подключения:\n`");
            text.push_str(&link);
            text.push('`');
        }
        Err(e) => warn!("No connection link for {}: {}", email, e),
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Срок вышел; 0 означает бессрочную подписку.
fn subscription_expired(expiry_time: i64, now_ms: i64) -> bool {
    expiry_time > 0 && expiry_time < now_ms
}

/// Выдает новый тестовый аккаунт и привязывает его к чату.
async fn provision_trial(
    bot: &Bot,
    msg: &Message,
    pool: &DbPool,
    panel: &PanelApi,
    tgid: &str,
) -> AppResult<()> {
    let conn = db::get_connection(pool)?;
    let trial = settings::get_trial_settings(&conn)?;
    if !trial.is_enabled {
        let text = message_or_default(&conn, "tgid_not_found", DEFAULT_NOT_FOUND)?;
        bot.send_message(msg.chat.id, text).await?;
        return Ok(());
    }

    let email = trial_email(tgid);

    // Чат мог потерять привязку при чистке client_data; сам аккаунт на
    // панели при этом остается.
    if panel.find_client(&email).await?.is_some() {
        db::upsert_binding(&conn, &email, Some(tgid))?;
        bot.send_message(msg.chat.id, "Аккаунт восстановлен, отправьте /stat еще раз.")
            .await?;
        return Ok(());
    }

    let inbound = panel
        .list_inbounds()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("panel has no inbounds".into()))?;

    let client = PanelClient {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.clone(),
        flow: None,
        limit_ip: 0,
        total_gb: trial.traffic_gb * BYTES_PER_GB,
        expiry_time: chrono::Utc::now().timestamp_millis() + trial.days * MS_PER_DAY,
        enable: true,
        tg_id: Some(tgid.to_string()),
        sub_id: None,
    };

    panel.add_client(inbound.id, &client).await?;
    db::upsert_binding(&conn, &email, Some(tgid))?;
    info!("Issued trial account {} for chat {}", email, tgid);

    let mut text = format!(
        "🎁 Вам выдан тестовый аккаунт на {} дн. и {} GB трафика.",
        trial.days, trial.traffic_gb
    );
    match build_vless_link(&settings::get_panel_settings(&conn)?.panel_url, &inbound, &client) {
        Ok(link) => {
            text.push_str("\n\nСсылка для подключения:\n`");
            text.push_str(&link);
            text.push('`');
        }
        Err(e) => warn!("No connection link for trial {}: {}", email, e),
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

fn renew_keyboard(email: &str, inbound_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback("Да", format!("create_payment:{email}:{inbound_id}")),
        InlineKeyboardButton::callback("Нет", "reject_payment".to_string()),
    ]])
}

/// Сводка по действующей подписке: трафик, дата окончания, остаток дней.
/// Истекшие подписки сюда не попадают, им отправляется предложение
/// продления. Нулевые лимиты показываются как «∞».
fn format_client_stats(client: &PanelClient, stat: Option<&ClientStat>, now_ms: i64) -> String {
    let used = stat.map(|s| s.up + s.down).unwrap_or(0);
    let mut text = format!(
        "📊 Подписка {}\n\nТрафик: {} из {}",
        client.email,
        format_traffic(used),
        format_limit(client.total_gb)
    );

    if client.expiry_time <= 0 {
        text.push_str("\nСрок действия: ∞");
    } else {
        let date = chrono::DateTime::from_timestamp_millis(client.expiry_time)
            .map(|d| d.format("%d.%m.%Y %H:%M").to_string())
            .unwrap_or_else(|| "?".to_string());
        let days_left = (client.expiry_time - now_ms) as f64 / MS_PER_DAY as f64;
        text.push_str(&format!("\nДействует до: {date} (осталось {:.1} дн.)", days_left));
    }
    text
}

fn format_traffic(bytes: i64) -> String {
    format!("{:.2} GB", bytes as f64 / BYTES_PER_GB as f64)
}

fn format_limit(bytes: i64) -> String {
    if bytes == 0 {
        "∞".to_string()
    } else {
        format_traffic(bytes)
    }
}
