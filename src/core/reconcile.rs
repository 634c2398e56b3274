//! Сверка платежей: опрос кошелька по pending-платежам и продление
//! подписки в панели после зачисления денег.

use log::{debug, error, info, warn};

use crate::core::config::renewal;
use crate::core::error::{AppError, AppResult};
use crate::gateway::YooMoneyGateway;
use crate::panel::PanelApi;
use crate::storage::db::{self, DbPool, PaymentStatus};
use crate::storage::settings;
use crate::telegram::notifications::{render_paid_message, Notify};

/// Метка платежа: глобально уникальна и читаема в истории кошелька.
pub fn payment_label(email: &str, now_unix: i64) -> String {
    format!("vpn_{email}_{now_unix}")
}

/// Создает pending-платеж на стандартное продление и возвращает
/// (payment_id, ссылка на оплату).
pub async fn create_renewal_payment(
    pool: &DbPool,
    email: &str,
    inbound_id: i64,
) -> AppResult<(String, String)> {
    let conn = db::get_connection(pool)?;

    let gateway_settings = settings::get_gateway_settings(&conn)?
        .filter(|s| s.is_enabled)
        .ok_or_else(|| AppError::Persistence("payment gateway is not enabled".into()))?;
    let telegram_settings = settings::get_telegram_settings(&conn)?;
    let amount = telegram_settings
        .payment_amount
        .ok_or_else(|| AppError::Persistence("payment amount is not configured".into()))?;

    let payment_id = payment_label(email, chrono::Utc::now().timestamp());
    let days = renewal::STANDARD_PERIOD_DAYS;

    let gateway = YooMoneyGateway::new(&gateway_settings)?;
    let url = gateway
        .create_quickpay(
            &payment_id,
            amount,
            &format!("Продление VPN для {email}"),
            gateway_settings.redirect_url.as_deref(),
        )
        .await?;

    db::insert_payment(&conn, &payment_id, email, amount, days, inbound_id)?;
    info!("Created payment {} for {} ({} RUB)", payment_id, email, amount);

    Ok((payment_id, url))
}

/// Один проход сверки: каждый pending-платеж проверяется в кошельке,
/// оплаченные продлеваются. Ошибка по одному платежу не прерывает
/// обработку остальных.
pub async fn check_pending_payments(pool: &DbPool, notify: &dyn Notify) -> AppResult<()> {
    let pending = {
        let conn = db::get_connection(pool)?;
        let gateway_settings = settings::get_gateway_settings(&conn)?;
        if !gateway_settings.as_ref().is_some_and(|s| s.is_enabled) {
            debug!("Payment check skipped: gateway disabled");
            return Ok(());
        }
        db::list_pending_payment_ids(&conn)?
    };

    if pending.is_empty() {
        return Ok(());
    }
    debug!("Checking {} pending payment(s)", pending.len());

    for payment_id in pending {
        if let Err(e) = reconcile_one(pool, notify, &payment_id).await {
            error!("Payment {} reconciliation failed: {}", payment_id, e);
        }
    }
    Ok(())
}

/// Сверяет один платеж. Возвращает true, если подписка была продлена.
///
/// Захват (pending → paid) сериализуется в базе, поэтому конкурирующие
/// проходы обрабатывают платеж не более одного раза. Если продление в
/// панели сорвалось, захват откатывается и платеж снова pending, так
/// что следующий проход повторит попытку.
pub async fn reconcile_one(pool: &DbPool, notify: &dyn Notify, payment_id: &str) -> AppResult<bool> {
    let mut conn = db::get_connection(pool)?;

    let payment = db::get_payment(&conn, payment_id)?
        .ok_or_else(|| AppError::NotFound(format!("payment {payment_id}")))?;
    if payment.status != PaymentStatus::Pending {
        return Ok(false);
    }

    let gateway_settings = settings::get_gateway_settings(&conn)?
        .filter(|s| s.is_enabled)
        .ok_or_else(|| AppError::Persistence("payment gateway is not enabled".into()))?;
    let gateway = YooMoneyGateway::new(&gateway_settings)?;

    // Реквизиты панели читаются до захвата: ошибка конфигурации не должна
    // оставить платеж в paid. Владение настройками переходит в async-блок,
    // соединение через await не протаскивается.
    let panel_settings = settings::get_panel_settings(&conn)?;

    if !gateway.is_paid(payment_id).await? {
        return Ok(false);
    }

    if !db::claim_payment_paid(&mut conn, payment_id)? {
        debug!("Payment {} already handled by another pass", payment_id);
        return Ok(false);
    }
    info!("Payment {} confirmed, extending {}", payment_id, payment.email);

    let extended = async {
        let panel = PanelApi::connect(&panel_settings).await?;
        panel.extend_expiry(payment.inbound_id, &payment.email, payment.days).await
    }
    .await;

    if let Err(e) = extended {
        db::revert_payment_claim(&conn, payment_id)?;
        warn!("Payment {} reverted to pending after failed extension", payment_id);
        return Err(e);
    }

    // Подтверждение клиенту. Сбой доставки не откатывает продление.
    if let Some(tgid) = db::get_binding(&conn, &payment.email)?.and_then(|b| b.tgid) {
        let text = render_paid_message(&payment.email, payment.amount, payment.days);
        if let Err(e) = notify.send_text(&tgid, &text).await {
            warn!("Paid confirmation for {} not delivered: {}", payment.email, e);
        }
    }

    Ok(true)
}
