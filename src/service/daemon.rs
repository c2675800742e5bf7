//! Background commit driver.
//!
//! One task, three clocks: the check period commits when enough inserts
//! are staged, the hard deadline commits-and-saves regardless, and the
//! save period persists whatever is durable. Blocking work runs off the
//! async workers. Shutdown performs one final commit-and-save, giving
//! at-least-once durability for everything staged before the signal.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant};

use crate::error::IndexError;

use super::Indexer;

impl Indexer {
    /// Spawn the commit driver. Returns `None` when the daemon is
    /// disabled (no check period or no threshold configured) — mutations
    /// still work, commits just have to be triggered explicitly.
    ///
    /// Signal `shutdown` with `notify_one` to stop the driver; it runs
    /// one final commit-and-save first. Errors other than the
    /// nothing-to-commit sentinel arrive on the returned channel; when
    /// the channel is full they are logged and dropped.
    pub fn start(self: Arc<Self>, shutdown: Arc<Notify>) -> Option<mpsc::Receiver<IndexError>> {
        if self.dcd {
            return None;
        }
        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move { self.run_driver(shutdown, tx).await });
        Some(rx)
    }

    async fn run_driver(self: Arc<Self>, shutdown: Arc<Notify>, tx: mpsc::Sender<IndexError>) {
        let dur = self.dur;
        let sdur = if self.sdur.is_zero() {
            dur + Duration::from_secs(1)
        } else {
            self.sdur
        };
        let lim = if self.lim.is_zero() { dur * 2 } else { self.lim };

        if !self.idelay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.idelay) => {}
                _ = shutdown.notified() => return,
            }
        }

        let mut tick = interval_at(Instant::now() + dur, dur);
        let mut limit_tick = interval_at(Instant::now() + lim, lim);
        let mut save_tick = interval_at(Instant::now() + sdur, sdur);

        loop {
            let res = tokio::select! {
                _ = shutdown.notified() => {
                    let this = Arc::clone(&self);
                    let res = run_blocking(move || this.create_and_save_index(this.dps)).await;
                    if let Err(err) = res {
                        if !matches!(err, IndexError::UncommittedIndexNotFound) {
                            let _ = tx.try_send(err);
                        }
                    }
                    tracing::info!("commit driver stopped");
                    return;
                }
                _ = tick.tick() => {
                    if self.ic.load(Ordering::SeqCst) >= self.alen as i64 {
                        let this = Arc::clone(&self);
                        run_blocking(move || this.create_index(this.dps)).await
                    } else {
                        Ok(())
                    }
                }
                _ = limit_tick.tick() => {
                    let this = Arc::clone(&self);
                    run_blocking(move || this.create_and_save_index(this.dps)).await
                }
                _ = save_tick.tick() => {
                    let this = Arc::clone(&self);
                    run_blocking(move || this.save_index()).await
                }
            };

            if let Err(err) = res {
                if !matches!(err, IndexError::UncommittedIndexNotFound) {
                    if let Err(unsent) = tx.try_send(err) {
                        tracing::warn!("driver error channel full, dropping: {unsent}");
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

async fn run_blocking<F>(f: F) -> Result<(), IndexError>
where
    F: FnOnce() -> Result<(), IndexError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res,
        Err(err) => {
            tracing::error!("driver subtask failed to run: {err}");
            Ok(())
        }
    }
}
