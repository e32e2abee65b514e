//! # Background Schedulers
//!
//! | Task | Cadence | Work |
//! |------|---------|------|
//! | weekly reset | startup catch-up, then every Monday 00:00 UTC | [`WeeklyMaintainer::reset`] |
//! | spin sweep | immediately, then every interval | [`SpinSweep::run_once`] |
//!
//! Both stop when the shutdown channel flips to `true`. Runs never overlap:
//! each task awaits its own work before waiting for the next tick, and a
//! sweep that overruns its interval skips the missed ticks.

use std::time::Duration;

use chrono::Utc;
use readearn_common::time_until_next_reset;
use readearn_ledger::{SpinSweep, WeeklyMaintainer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

pub fn spawn_weekly_reset(
    weekly: WeeklyMaintainer,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = weekly.catch_up(Utc::now()).await {
            error!(error = %e, "weekly reset catch-up failed");
        }

        loop {
            let next = time_until_next_reset(Utc::now());
            let wait = (next.next_reset - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            info!(next_reset = %next.next_reset, "weekly reset scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_requested(&mut shutdown_rx) => break,
            }

            // sleep can wake a little early; wait out the remainder
            let now = Utc::now();
            if now < next.next_reset {
                continue;
            }
            if let Err(e) = weekly.reset(now).await {
                warn!(error = %e, "weekly reset will be retried at startup or next week");
            }
        }
        info!("weekly reset scheduler stopped");
    })
}

pub fn spawn_spin_sweep(
    sweep: SpinSweep,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "spin sweep scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_requested(&mut shutdown_rx) => break,
            }
            if let Err(e) = sweep.run_once(Utc::now()).await {
                error!(error = %e, "spin sweep failed");
            }
        }
        info!("spin sweep scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use readearn_common::{Account, AccountId, CooldownWindow, Identity};
    use readearn_ledger::{AccountStore, MemoryAccountStore, NotifyError, SpinNotifier};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AccountId>>);

    #[async_trait]
    impl SpinNotifier for Recorder {
        async fn notify_spin_available(&self, account: &Account) -> Result<(), NotifyError> {
            self.0.lock().push(account.id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweep_runs_immediately_and_stops() {
        let store: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());
        let acc = store
            .insert(Account::new(Identity::telegram(1), Utc::now()))
            .await
            .expect("insert");
        let recorder = Arc::new(Recorder::default());
        let sweep = SpinSweep::new(store, recorder.clone(), CooldownWindow::spin(), 10);

        let (tx, rx) = watch::channel(false);
        let handle = spawn_spin_sweep(sweep, Duration::from_secs(3600), rx);

        for _ in 0..100 {
            if !recorder.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*recorder.0.lock(), vec![acc.id]);

        tx.send(true).expect("send");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("stopped in time")
            .expect("join");
    }

    #[tokio::test]
    async fn test_weekly_catch_up_on_start() {
        let store: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());
        let acc = store
            .insert(Account::new(Identity::telegram(1), Utc::now()))
            .await
            .expect("insert");
        let weekly = WeeklyMaintainer::new(store.clone());

        let (tx, rx) = watch::channel(false);
        let handle = spawn_weekly_reset(weekly, rx);

        let mut stamped = None;
        for _ in 0..100 {
            stamped = store.get(acc.id).await.expect("get").last_weekly_reset;
            if stamped.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stamped.is_some());

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("stopped in time")
            .expect("join");
    }
}
