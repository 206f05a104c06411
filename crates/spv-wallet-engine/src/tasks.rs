//! Periodic background work: expiring drafts and retrying open obligations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use spv_wallet_arc::AsyncBroadcaster;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};

use crate::engine::Engine;

/// Handle to the running background task.
pub struct BackgroundHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BackgroundHandle {
    /// Stop the task and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "background task ended abnormally");
        }
    }

    /// True once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the expiry sweep and pending-obligation loop, one pass per `interval`.
pub fn spawn_background_tasks<B>(engine: Arc<Engine<B>>, interval: Duration) -> BackgroundHandle
where
    B: AsyncBroadcaster + Send + Sync + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "background tasks started");
        loop {
            let tick = tokio::select! {
                _ = ticker.tick() => true,
                _ = shutdown_rx.changed() => false,
            };
            if !tick || *shutdown_rx.borrow() {
                break;
            }
            run_pass(&engine).await;
        }
        info!("background tasks stopped");
    });
    BackgroundHandle {
        shutdown: shutdown_tx,
        task,
    }
}

impl<B: AsyncBroadcaster + Send + Sync + 'static> Engine<B> {
    /// Start the background loop for this engine.
    pub fn spawn_background_tasks(self: &Arc<Self>, interval: Duration) -> BackgroundHandle {
        spawn_background_tasks(self.clone(), interval)
    }
}

async fn run_pass<B: AsyncBroadcaster + Send + Sync>(engine: &Engine<B>) {
    let now = Utc::now();
    match engine.sweep_expired_at(now) {
        Ok(expired) if !expired.is_empty() => debug!(count = expired.len(), "swept expired drafts"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "expiry sweep failed"),
    }
    match engine.process_pending_at(now).await {
        Ok(summary) => debug!(?summary, "processed pending transactions"),
        Err(e) => error!(error = %e, "processing pending transactions failed"),
    }
}
