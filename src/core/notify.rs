//! Предупреждение клиентов об истекающих подписках с защитой от
//! повторной отправки.

use log::{debug, error, info, warn};

use crate::core::error::AppResult;
use crate::core::reconcile::create_renewal_payment;
use crate::panel::{PanelApi, MS_PER_DAY};
use crate::storage::db::{self, DbPool};
use crate::storage::settings;
use crate::telegram::notifications::{render_expiry_message, Notify};

/// Один проход проверки подписок: обходит клиентов всех inbound'ов и
/// предупреждает тех, чья подписка истекает в ближайшие notify_days дней.
///
/// Дедупликация идет по точной паре (email, expiry): после продления
/// expiry меняется и следующий цикл подписки уведомляется заново.
/// Запись в журнал делается только после успешной отправки.
pub async fn check_expiring(pool: &DbPool, notify: &dyn Notify) -> AppResult<()> {
    let conn = db::get_connection(pool)?;

    let purged = db::purge_old_notifications(&conn)?;
    if purged > 0 {
        debug!("Purged {} stale notification record(s)", purged);
    }

    let telegram_settings = settings::get_telegram_settings(&conn)?;
    if !telegram_settings.is_enabled {
        debug!("Subscription check skipped: notifications disabled");
        return Ok(());
    }

    let panel_settings = settings::get_panel_settings(&conn)?;
    let panel = PanelApi::connect(&panel_settings).await?;
    let inbounds = panel.list_inbounds().await?;

    let gateway_enabled = settings::get_gateway_settings(&conn)?.is_some_and(|s| s.is_enabled);
    let attach_payment = telegram_settings.create_payment && gateway_enabled;

    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut sent = 0usize;

    for inbound in &inbounds {
        let inbound_settings = match inbound.parse_settings() {
            Ok(s) => s,
            Err(e) => {
                warn!("Skipping inbound {}: {}", inbound.id, e);
                continue;
            }
        };

        for client in &inbound_settings.clients {
            if client.expiry_time <= 0 {
                continue;
            }
            let days_left = (client.expiry_time - now_ms) as f64 / MS_PER_DAY as f64;
            if days_left <= 0.0 || days_left >= telegram_settings.notify_days as f64 {
                continue;
            }

            if db::notification_sent(&conn, &client.email, client.expiry_time)? {
                continue;
            }

            // Адресат определяется только по привязке в client_data;
            // tgId на панели для рассылки не авторитетен.
            let tgid = match db::get_binding(&conn, &client.email)?.and_then(|b| b.tgid) {
                Some(t) => t,
                None => {
                    debug!("No chat binding for {}, skipping", client.email);
                    continue;
                }
            };

            let payment_link = if attach_payment {
                match create_renewal_payment(pool, &client.email, inbound.id).await {
                    Ok((_, url)) => Some(url),
                    Err(e) => {
                        // Уведомление важнее ссылки: шлем без нее.
                        warn!("Payment link for {} not created: {}", client.email, e);
                        None
                    }
                }
            } else {
                None
            };

            let text = render_expiry_message(
                telegram_settings.notification_template.as_deref(),
                &client.email,
                days_left,
                payment_link.as_deref(),
            );

            match notify.send_text(&tgid, &text).await {
                Ok(()) => {
                    db::record_notification(&conn, &client.email, client.expiry_time)?;
                    sent += 1;
                }
                Err(e) => {
                    error!("Expiry notification for {} failed: {}", client.email, e);
                }
            }
        }
    }

    if sent > 0 {
        info!("Sent {} expiry notification(s)", sent);
    }
    Ok(())
}
