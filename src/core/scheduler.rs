//! Планировщик фоновых задач. Каждая задача живет в своем tokio-таске и
//! тикает со своим периодом; пропущенные тики схлопываются в один, а не
//! накапливаются в очередь.

use std::future::Future;
use std::time::Duration;

use log::{error, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::error::AppResult;

/// Запускает периодическую задачу.
///
/// Отмена проверяется только между запусками: начатый прогон всегда
/// доводится до конца. Ошибка прогона логируется, задача продолжает
/// тикать.
pub fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Job '{}' started with period {:?}", name, period);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = job().await {
                error!("Job '{}' run failed: {}", name, e);
            }
        }
        info!("Job '{}' stopped", name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_slow_run_coalesces_missed_ticks() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let token = CancellationToken::new();

        let handle = spawn_job("slow", Duration::from_secs(1), token.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Each run spans three tick periods.
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(())
            }
        });

        // Nine seconds of fake time: with queued ticks this would be 9
        // runs, with coalescing roughly one run per 3s slot.
        tokio::time::sleep(Duration::from_secs(9)).await;
        token.cancel();
        handle.await.unwrap();

        let total = runs.load(Ordering::SeqCst);
        assert!(total >= 2, "job should keep running, got {total}");
        assert!(total <= 4, "missed ticks should be dropped, got {total}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_run() {
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();
        let token = CancellationToken::new();

        let handle = spawn_job("graceful", Duration::from_secs(1), token.clone(), move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        // Let the first run start, then cancel mid-run.
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_stops_ticking() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let token = CancellationToken::new();

        let handle = spawn_job("stopped", Duration::from_secs(1), token.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        token.cancel();
        handle.await.unwrap();
        let at_cancel = runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), at_cancel);
    }
}
