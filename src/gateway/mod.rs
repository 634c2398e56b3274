//! Платежный шлюз YooMoney: формирование quickpay-ссылки и опрос
//! истории операций кошелька.

use log::debug;
use serde::Deserialize;

use crate::core::config::{gateway, network};
use crate::core::error::{AppError, AppResult};
use crate::storage::settings::GatewaySettings;

/// Операция из истории кошелька. status "success" означает, что деньги
/// зачислены; остальные статусы движок игнорирует.
#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub label: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct OperationHistory {
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// Клиент кошелька YooMoney.
pub struct YooMoneyGateway {
    http: reqwest::Client,
    base_url: String,
    wallet_id: String,
    secret_key: String,
}

impl YooMoneyGateway {
    pub fn new(settings: &GatewaySettings) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(network::timeout())
            .build()
            .map_err(|e| AppError::RemoteUnavailable(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: gateway::base_url().trim_end_matches('/').to_string(),
            wallet_id: settings.wallet_id.clone(),
            secret_key: settings.secret_key.clone(),
        })
    }

    /// Формирует quickpay-ссылку на оплату. YooMoney отвечает редиректом
    /// на страницу оплаты; адрес этой страницы и есть ссылка для клиента.
    pub async fn create_quickpay(
        &self,
        label: &str,
        amount: f64,
        target: &str,
        success_url: Option<&str>,
    ) -> AppResult<String> {
        let amount_str = format!("{amount:.2}");
        let mut form: Vec<(&str, &str)> = vec![
            ("receiver", self.wallet_id.as_str()),
            ("quickpay-form", "shop"),
            ("targets", target),
            ("paymentType", "SB"),
            ("sum", amount_str.as_str()),
            ("label", label),
        ];
        if let Some(url) = success_url {
            form.push(("successURL", url));
        }

        let response = self
            .http
            .post(format!("{}/quickpay/confirm.xml", self.base_url))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() && !response.status().is_redirection() {
            return Err(AppError::RemoteUnavailable(format!(
                "quickpay returned {}",
                response.status()
            )));
        }

        // reqwest уже прошел по редиректу; итоговый URL и есть платежная
        // страница.
        let payment_url = response.url().to_string();
        debug!("Created quickpay link for label {}", label);
        Ok(payment_url)
    }

    /// Проверяет по истории операций, что платеж с данной меткой прошел.
    pub async fn is_paid(&self, label: &str) -> AppResult<bool> {
        let response = self
            .http
            .post(format!("{}/api/operation-history", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&[("label", label), ("records", "5")])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AppError::AuthenticationFailed("yoomoney token rejected".into()));
        }

        let history: OperationHistory = response.json().await?;
        Ok(history
            .operations
            .iter()
            .any(|op| op.label == label && op.status == "success"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_history_parsing() {
        let history: OperationHistory = serde_json::from_str(
            r#"{"operations":[{"label":"vpn_a@b.com_1700000000","status":"success"},{"status":"refused"}]}"#,
        )
        .unwrap();
        assert_eq!(history.operations.len(), 2);
        assert_eq!(history.operations[0].status, "success");
        // label missing in the payload defaults to empty
        assert_eq!(history.operations[1].label, "");
    }

    #[test]
    fn test_empty_history_parses() {
        let history: OperationHistory = serde_json::from_str("{}").unwrap();
        assert!(history.operations.is_empty());
    }
}
