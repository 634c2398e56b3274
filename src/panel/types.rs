//! Типы ответов панели 3x-ui. Панель возвращает конверт
//! {success, msg, obj}; поля settings и streamSettings внутри inbound —
//! это JSON, закодированный строкой, и разбирается отдельным шагом.

use serde::{Deserialize, Serialize};

use crate::core::error::{AppError, AppResult};

/// Конверт любого ответа панели.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    pub obj: Option<T>,
}

/// Inbound панели. settings и stream_settings приходят строками JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub id: i64,
    pub port: u16,
    pub remark: Option<String>,
    pub settings: String,
    #[serde(default)]
    pub stream_settings: String,
    #[serde(default)]
    pub client_stats: Vec<ClientStat>,
}

impl Inbound {
    /// Разбирает вложенный settings-JSON со списком клиентов.
    pub fn parse_settings(&self) -> AppResult<InboundSettings> {
        serde_json::from_str(&self.settings).map_err(|e| {
            AppError::MalformedResponse(format!("inbound {} settings: {e}", self.id))
        })
    }

    /// Разбирает вложенный streamSettings-JSON (транспорт и reality).
    pub fn parse_stream_settings(&self) -> AppResult<StreamSettings> {
        serde_json::from_str(&self.stream_settings).map_err(|e| {
            AppError::MalformedResponse(format!("inbound {} streamSettings: {e}", self.id))
        })
    }

    /// Статистика трафика клиента по email, если панель ее уже посчитала.
    pub fn stat_for(&self, email: &str) -> Option<&ClientStat> {
        self.client_stats.iter().find(|s| s.email == email)
    }
}

/// Счетчики трафика клиента. Все объемы в байтах, expiry_time в мс Unix;
/// 0 означает «без ограничения».
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStat {
    pub email: String,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub enable: bool,
}

/// Содержимое поля settings: список клиентов inbound'а.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundSettings {
    #[serde(default)]
    pub clients: Vec<PanelClient>,
}

/// Клиент в конфигурации inbound'а. Это авторитетная запись: email,
/// UUID и expiry живут здесь, а не в clientStats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelClient {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(default)]
    pub limit_ip: i64,
    #[serde(default, rename = "totalGB")]
    pub total_gb: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_id: Option<String>,
}

fn default_enable() -> bool {
    true
}

/// streamSettings inbound'а; нужен для сборки vless-ссылки.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub security: String,
    #[serde(default)]
    pub reality_settings: Option<RealitySettings>,
}

/// Параметры reality. publicKey панель кладет то на верхний уровень,
/// то во вложенный settings, смотря какой версией создан inbound.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default)]
    pub short_ids: Vec<String>,
    #[serde(default)]
    pub settings: Option<RealityInnerSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealityInnerSettings {
    #[serde(default)]
    pub public_key: Option<String>,
}

impl RealitySettings {
    /// publicKey с учетом обоих мест, где его прячет панель.
    pub fn effective_public_key(&self) -> Option<&str> {
        self.public_key
            .as_deref()
            .or_else(|| self.settings.as_ref().and_then(|s| s.public_key.as_deref()))
    }
}
