//! Обработка inline-кнопок продления.

use log::info;
use teloxide::prelude::*;

use crate::core::error::AppResult;
use crate::core::reconcile::create_renewal_payment;
use crate::storage::db::DbPool;

/// Разобранные данные callback-кнопки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewCallback {
    Create { email: String, inbound_id: i64 },
    Reject,
}

/// Разбирает callback data вида "create_payment:<email>:<inbound>" или
/// "reject_payment". Inbound id стоит последним, потому что email не
/// содержит двоеточий, а числовой суффикс отделяется однозначно.
pub fn parse_callback(data: &str) -> Option<RenewCallback> {
    if data == "reject_payment" {
        return Some(RenewCallback::Reject);
    }
    let rest = data.strip_prefix("create_payment:")?;
    let (email, inbound_raw) = rest.rsplit_once(':')?;
    let inbound_id = inbound_raw.parse().ok()?;
    if email.is_empty() {
        return None;
    }
    Some(RenewCallback::Create {
        email: email.to_string(),
        inbound_id,
    })
}

/// Обрабатывает нажатие кнопки. Неизвестные данные молча подтверждаются,
/// чтобы кнопка не «зависала» в клиенте.
pub async fn handle_callback(bot: &Bot, q: &CallbackQuery, pool: &DbPool) -> AppResult<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let (chat_id, message_id) = match q.message.as_ref() {
        Some(message) => (message.chat().id, message.id()),
        None => return Ok(()),
    };

    match q.data.as_deref().and_then(parse_callback) {
        Some(RenewCallback::Create { email, inbound_id }) => {
            info!("Renewal requested for {} from chat {}", email, chat_id);
            // Кнопочный вопрос заменяется результатом, а не дублируется
            // новым сообщением.
            match create_renewal_payment(pool, &email, inbound_id).await {
                Ok((_, url)) => {
                    bot.edit_message_text(chat_id, message_id, format!("Ссылка на оплату продления:\n{url}"))
                        .await?;
                }
                Err(e) => {
                    log::error!("Renewal payment for {} failed: {}", email, e);
                    bot.edit_message_text(chat_id, message_id, "⚠️ Не удалось создать платеж, попробуйте позже.")
                        .await?;
                }
            }
        }
        Some(RenewCallback::Reject) => {
            bot.delete_message(chat_id, message_id).await?;
        }
        None => {}
    }
    Ok(())
}
