//! Чтение настроек из базы. Таблицы пишет админка; движок всегда берет
//! последнюю строку, чтобы подхватывать изменения без рестарта.

use crate::core::error::{AppError, AppResult};
use crate::storage::db::DbConnection;

/// Реквизиты панели 3x-ui.
#[derive(Debug, Clone)]
pub struct PanelSettings {
    pub panel_url: String,
    pub username: String,
    pub password: String,
}

/// Настройки бота и движка продлений.
#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub is_enabled: bool,
    /// За сколько дней до истечения предупреждать
    pub notify_days: i64,
    pub check_interval: i64,
    /// "seconds", "minutes" или "hours"
    pub interval_unit: String,
    pub payment_amount: Option<f64>,
    /// Прикладывать ли к уведомлению ссылку на оплату
    pub create_payment: bool,
    pub notification_template: Option<String>,
}

impl TelegramSettings {
    /// Интервал проверки подписок в секундах. Неизвестная единица
    /// трактуется как минуты.
    pub fn check_interval_secs(&self) -> u64 {
        let interval = self.check_interval.max(1) as u64;
        match self.interval_unit.as_str() {
            "seconds" => interval,
            "hours" => interval * 3600,
            _ => interval * 60,
        }
    }
}

/// Настройки кошелька YooMoney.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub wallet_id: String,
    pub secret_key: String,
    pub redirect_url: Option<String>,
    pub is_enabled: bool,
}

/// Параметры тестового аккаунта, выдаваемого по /stat новым клиентам.
#[derive(Debug, Clone)]
pub struct TrialSettings {
    pub is_enabled: bool,
    pub days: i64,
    pub traffic_gb: i64,
}

/// Настраиваемый текст бота (таблица bot_messages).
#[derive(Debug, Clone)]
pub struct BotMessage {
    pub message_text: Option<String>,
    pub image_path: Option<String>,
    pub show_image: bool,
    pub is_enabled: bool,
}

/// Получает реквизиты панели. Их отсутствие — ошибка конфигурации:
/// без панели движку нечего делать.
pub fn get_panel_settings(conn: &DbConnection) -> AppResult<PanelSettings> {
    let mut stmt = conn.prepare(
        "SELECT panel_url, username, password FROM settings ORDER BY id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query([])?;

    if let Some(row) = rows.next()? {
        Ok(PanelSettings {
            panel_url: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
        })
    } else {
        Err(AppError::Persistence("panel settings are not configured".into()))
    }
}

/// Получает настройки бота. При пустой таблице возвращает выключенные
/// настройки по умолчанию.
pub fn get_telegram_settings(conn: &DbConnection) -> AppResult<TelegramSettings> {
    let mut stmt = conn.prepare(
        "SELECT bot_token, is_enabled, notify_days, check_interval, interval_unit,
                payment_amount, create_payment, notification_template
         FROM telegram_settings ORDER BY id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query([])?;

    if let Some(row) = rows.next()? {
        Ok(TelegramSettings {
            bot_token: row.get(0)?,
            is_enabled: row.get::<_, i64>(1)? != 0,
            notify_days: row.get(2)?,
            check_interval: row.get(3)?,
            interval_unit: row.get(4)?,
            payment_amount: row.get(5)?,
            create_payment: row.get::<_, i64>(6)? != 0,
            notification_template: row.get(7)?,
        })
    } else {
        Ok(TelegramSettings {
            bot_token: None,
            is_enabled: false,
            notify_days: 3,
            check_interval: crate::core::config::scheduler::DEFAULT_SUBSCRIPTION_CHECK_MINUTES as i64,
            interval_unit: "minutes".into(),
            payment_amount: None,
            create_payment: false,
            notification_template: None,
        })
    }
}

/// Получает настройки YooMoney; None — кошелек не настроен.
pub fn get_gateway_settings(conn: &DbConnection) -> AppResult<Option<GatewaySettings>> {
    let mut stmt = conn.prepare(
        "SELECT wallet_id, secret_key, redirect_url, is_enabled
         FROM yoomoney_settings ORDER BY id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query([])?;

    if let Some(row) = rows.next()? {
        Ok(Some(GatewaySettings {
            wallet_id: row.get(0)?,
            secret_key: row.get(1)?,
            redirect_url: row.get(2)?,
            is_enabled: row.get::<_, i64>(3)? != 0,
        }))
    } else {
        Ok(None)
    }
}

/// Получает политику тестовых аккаунтов. Пустая таблица — выдача выключена.
pub fn get_trial_settings(conn: &DbConnection) -> AppResult<TrialSettings> {
    let mut stmt = conn.prepare(
        "SELECT is_enabled, days, traffic_gb FROM test_account_settings WHERE id = 1",
    )?;
    let mut rows = stmt.query([])?;

    if let Some(row) = rows.next()? {
        Ok(TrialSettings {
            is_enabled: row.get::<_, i64>(0)? != 0,
            days: row.get(1)?,
            traffic_gb: row.get(2)?,
        })
    } else {
        Ok(TrialSettings {
            is_enabled: false,
            days: 3,
            traffic_gb: 10,
        })
    }
}

/// Получает настраиваемый текст бота по типу сообщения.
pub fn get_bot_message(conn: &DbConnection, message_type: &str) -> AppResult<Option<BotMessage>> {
    let mut stmt = conn.prepare(
        "SELECT message_text, image_path, show_image, is_enabled
         FROM bot_messages WHERE message_type = ?1",
    )?;
    let mut rows = stmt.query([message_type])?;

    if let Some(row) = rows.next()? {
        Ok(Some(BotMessage {
            message_text: row.get(0)?,
            image_path: row.get(1)?,
            show_image: row.get::<_, i64>(2)? != 0,
            is_enabled: row.get::<_, i64>(3)? != 0,
        }))
    } else {
        Ok(None)
    }
}
