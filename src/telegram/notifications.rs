//! Отправка уведомлений клиентам. Движок продлений работает через
//! трейт Notify, чтобы его можно было проверять без живого Telegram.

use async_trait::async_trait;
use log::debug;
use teloxide::prelude::*;

use crate::core::error::{AppError, AppResult};

/// Канал доставки сообщений клиенту.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> AppResult<()>;
}

/// Доставка через Telegram-бота.
pub struct TelegramNotify {
    bot: Bot,
}

impl TelegramNotify {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notify for TelegramNotify {
    async fn send_text(&self, chat_id: &str, text: &str) -> AppResult<()> {
        let id: i64 = chat_id
            .parse()
            .map_err(|_| AppError::NotFound(format!("chat id '{chat_id}' is not numeric")))?;
        self.bot.send_message(ChatId(id), text).await?;
        debug!("Notification delivered to chat {}", chat_id);
        Ok(())
    }
}

pub const DEFAULT_EXPIRY_TEMPLATE: &str =
    "⚠️ Ваша подписка {email} истекает через {days} дн.\n{payment_link}";

/// Подставляет значения в шаблон уведомления об истечении.
///
/// Поддерживаются метки {days}, {email} и {payment_link}; без ссылки
/// на оплату метка заменяется пустой строкой.
pub fn render_expiry_message(
    template: Option<&str>,
    email: &str,
    days_left: f64,
    payment_link: Option<&str>,
) -> String {
    let days = days_left.ceil() as i64;
    let link = payment_link
        .map(|url| format!("Оплатить продление: {url}"))
        .unwrap_or_default();

    template
        .unwrap_or(DEFAULT_EXPIRY_TEMPLATE)
        .replace("{days}", &days.to_string())
        .replace("{email}", email)
        .replace("{payment_link}", &link)
        .trim_end()
        .to_string()
}

/// Текст подтверждения после зачисления оплаты и продления.
pub fn render_paid_message(email: &str, amount: f64, days: i64) -> String {
    format!("✅ Оплата {amount:.0} ₽ получена! Подписка {email} продлена на {days} дн.")
}
