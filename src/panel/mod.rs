//! Клиент панели 3x-ui. Панель не отдает API-токенов: авторизация идет
//! через cookie-сессию, поэтому reqwest-клиент держит cookie store и
//! живет от login'а до конца серии запросов.

pub mod link;
pub mod types;

use log::{debug, warn};
use serde_json::json;

use crate::core::config::network;
use crate::core::error::{AppError, AppResult};
use crate::storage::settings::PanelSettings;

use types::{ApiResponse, Inbound, PanelClient};

pub const MS_PER_DAY: i64 = 86_400_000;

/// Авторизованная сессия панели.
pub struct PanelApi {
    http: reqwest::Client,
    base_url: String,
}

impl PanelApi {
    /// Логинится в панель и возвращает готовую сессию.
    pub async fn connect(settings: &PanelSettings) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(network::timeout())
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| AppError::RemoteUnavailable(format!("http client: {e}")))?;

        let base_url = settings.panel_url.trim_end_matches('/').to_string();

        let response = http
            .post(format!("{base_url}/login"))
            .form(&[("username", settings.username.as_str()), ("password", settings.password.as_str())])
            .send()
            .await?;

        let body: ApiResponse<serde_json::Value> = response.json().await?;
        if !body.success {
            return Err(AppError::AuthenticationFailed(format!(
                "panel login rejected: {}",
                body.msg
            )));
        }

        debug!("Panel session established: {}", base_url);
        Ok(Self { http, base_url })
    }

    /// Список всех inbound'ов со статистикой клиентов.
    pub async fn list_inbounds(&self) -> AppResult<Vec<Inbound>> {
        let response = self
            .http
            .get(format!("{}/panel/api/inbounds/list", self.base_url))
            .send()
            .await?;

        let body: ApiResponse<Vec<Inbound>> = response.json().await?;
        if !body.success {
            return Err(AppError::RemoteUnavailable(format!(
                "inbounds list failed: {}",
                body.msg
            )));
        }
        body.obj
            .ok_or_else(|| AppError::MalformedResponse("inbounds list without obj".into()))
    }

    /// Ищет клиента по email во всех inbound'ах. Inbound'ы с нечитаемым
    /// settings пропускаются, а не валят весь поиск.
    pub async fn find_client(&self, email: &str) -> AppResult<Option<(Inbound, PanelClient)>> {
        for inbound in self.list_inbounds().await? {
            let settings = match inbound.parse_settings() {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping inbound {}: {}", inbound.id, e);
                    continue;
                }
            };
            if let Some(client) = settings.clients.into_iter().find(|c| c.email == email) {
                return Ok(Some((inbound, client)));
            }
        }
        Ok(None)
    }

    /// Добавляет клиента в inbound.
    pub async fn add_client(&self, inbound_id: i64, client: &PanelClient) -> AppResult<()> {
        let url = format!("{}/panel/api/inbounds/addClient", self.base_url);
        self.post_client_change(&url, inbound_id, client).await
    }

    /// Перезаписывает конфигурацию клиента. Панель адресует клиента по
    /// UUID в пути, но тело все равно несет полную запись.
    pub async fn update_client(&self, inbound_id: i64, client: &PanelClient) -> AppResult<()> {
        let url = format!("{}/panel/api/inbounds/updateClient/{}", self.base_url, client.id);
        self.post_client_change(&url, inbound_id, client).await
    }

    /// Удаляет клиента из inbound'а.
    pub async fn del_client(&self, inbound_id: i64, client_uuid: &str) -> AppResult<()> {
        let response = self
            .http
            .post(format!(
                "{}/panel/api/inbounds/{}/delClient/{}",
                self.base_url, inbound_id, client_uuid
            ))
            .send()
            .await?;

        let body: ApiResponse<serde_json::Value> = response.json().await?;
        if !body.success {
            return Err(AppError::RemoteUnavailable(format!("delClient failed: {}", body.msg)));
        }
        Ok(())
    }

    async fn post_client_change(&self, url: &str, inbound_id: i64, client: &PanelClient) -> AppResult<()> {
        // Панель ждет клиентов в том же формате «JSON строкой», в каком
        // сама их отдает.
        let settings = serde_json::to_string(&json!({ "clients": [client] }))
            .map_err(|e| AppError::MalformedResponse(format!("client payload: {e}")))?;

        let response = self
            .http
            .post(url)
            .json(&json!({ "id": inbound_id, "settings": settings }))
            .send()
            .await?;

        let body: ApiResponse<serde_json::Value> = response.json().await?;
        if !body.success {
            return Err(AppError::RemoteUnavailable(format!("client change failed: {}", body.msg)));
        }
        Ok(())
    }

    /// Продлевает подписку клиента на days дней и возвращает новый expiry
    /// в мс Unix.
    ///
    /// База отсчета — max(текущий expiry, сейчас): живая подписка
    /// продлевается от своего конца, истекшая — от текущего момента, так
    /// что оплата после простоя не «съедает» оплаченные дни. Запись несет
    /// прежние поля клиента целиком, меняется только expiryTime; это
    /// read-modify-write без блокировки на стороне панели, конкурентная
    /// правка того же клиента из админки может быть перезаписана.
    pub async fn extend_expiry(&self, inbound_id: i64, email: &str, days: i64) -> AppResult<i64> {
        let inbound = self
            .list_inbounds()
            .await?
            .into_iter()
            .find(|i| i.id == inbound_id)
            .ok_or_else(|| AppError::NotFound(format!("inbound {inbound_id}")))?;

        let mut client = inbound
            .parse_settings()?
            .clients
            .into_iter()
            .find(|c| c.email == email)
            .ok_or_else(|| AppError::NotFound(format!("client {email} in inbound {inbound_id}")))?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let new_expiry = extended_expiry(client.expiry_time, now_ms, days);
        client.expiry_time = new_expiry;
        client.enable = true;

        self.update_client(inbound.id, &client).await?;
        debug!("Extended {} by {} days, new expiry {}", email, days, new_expiry);
        Ok(new_expiry)
    }
}

/// Новый expiry: days дней от конца подписки, но не раньше чем от «сейчас».
pub fn extended_expiry(current_expiry_ms: i64, now_ms: i64, days: i64) -> i64 {
    current_expiry_ms.max(now_ms) + days * MS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_subscription_extends_from_expiry() {
        let now = 1_700_000_000_000;
        let expiry = now + 5 * MS_PER_DAY;
        assert_eq!(extended_expiry(expiry, now, 30), expiry + 30 * MS_PER_DAY);
    }

    #[test]
    fn test_expired_subscription_extends_from_now() {
        let now = 1_700_000_000_000;
        let expiry = now - 10 * MS_PER_DAY;
        assert_eq!(extended_expiry(expiry, now, 30), now + 30 * MS_PER_DAY);
    }

    #[test]
    fn test_unlimited_subscription_extends_from_now() {
        let now = 1_700_000_000_000;
        assert_eq!(extended_expiry(0, now, 7), now + 7 * MS_PER_DAY);
    }
}
