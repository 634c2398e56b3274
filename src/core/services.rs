//! Управление фоновыми службами движка. Пара задач (проверка платежей
//! и проверка подписок) запускается одним handle'ом, который умеет
//! останавливаться и перезапускаться с новыми настройками из базы.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config::scheduler as sched_config;
use crate::core::error::AppResult;
use crate::core::{notify, reconcile, scheduler};
use crate::storage::db::{self, DbPool};
use crate::storage::settings;
use crate::telegram::notifications::Notify;

pub struct RunningServices {
    pool: DbPool,
    notify: Arc<dyn Notify>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl RunningServices {
    /// Запускает обе фоновые задачи. Интервал проверки подписок берется
    /// из telegram_settings на момент запуска; чтобы подхватить новый
    /// интервал, нужен restart.
    pub fn start(pool: DbPool, notify: Arc<dyn Notify>) -> AppResult<Self> {
        let conn = db::get_connection(&pool)?;
        let telegram_settings = settings::get_telegram_settings(&conn)?;
        drop(conn);

        let subscription_period = Duration::from_secs(telegram_settings.check_interval_secs());
        let payment_period = sched_config::payment_check_interval();
        let shutdown = CancellationToken::new();

        let payment_handle = {
            let pool = pool.clone();
            let notify = notify.clone();
            scheduler::spawn_job("check_payments", payment_period, shutdown.clone(), move || {
                let pool = pool.clone();
                let notify = notify.clone();
                async move { reconcile::check_pending_payments(&pool, notify.as_ref()).await }
            })
        };

        let subscription_handle = {
            let pool = pool.clone();
            let notify = notify.clone();
            scheduler::spawn_job(
                "check_subscriptions",
                subscription_period,
                shutdown.clone(),
                move || {
                    let pool = pool.clone();
                    let notify = notify.clone();
                    async move { notify::check_expiring(&pool, notify.as_ref()).await }
                },
            )
        };

        info!(
            "Background services started (subscription check every {:?})",
            subscription_period
        );

        Ok(Self {
            pool,
            notify,
            shutdown,
            handles: vec![payment_handle, subscription_handle],
        })
    }

    /// Останавливает задачи. Начатые прогоны доводятся до конца.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("Background services stopped");
    }

    /// Перезапускает задачи с актуальными настройками из базы.
    pub async fn restart(&mut self) -> AppResult<()> {
        self.stop().await;
        *self = Self::start(self.pool.clone(), self.notify.clone())?;
        Ok(())
    }
}
