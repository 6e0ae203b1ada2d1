//! # Sync Runner
//!
//! Background scheduler that drives per-shop sync cycles.
//!
//! ## Run Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Runner Loop                                       │
//! │                                                                         │
//! │  ┌──────────────── tokio::select! ────────────────┐                    │
//! │  │                                                 │                    │
//! │  │  interval tick ──► sync shops not in backoff   │                    │
//! │  │  trigger recv  ──► sync all shops immediately   │                    │
//! │  │  shutdown recv ──► drain and exit               │                    │
//! │  │                                                 │                    │
//! │  └─────────────────────────────────────────────────┘                    │
//! │                                                                         │
//! │  BACKOFF: a failed shop gets an exponential hold-down                   │
//! │  (initial_backoff_ms doubling up to max_backoff_secs), reset on the    │
//! │  first successful cycle. Other shops are unaffected.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;

/// Handle to a running sync loop.
pub struct SyncRunnerHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncRunnerHandle {
    /// Requests an immediate sync of all shops, skipping backoff.
    pub async fn trigger(&self) {
        let _ = self.trigger_tx.send(()).await;
    }

    /// Signals shutdown and waits for the loop to exit.
    pub async fn shutdown(self) {
        info!("Sync runner shutdown requested");
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Per-shop hold-down state after failures.
struct ShopBackoff {
    policy: ExponentialBackoff,
    not_before: Instant,
}

/// Background scheduler for the sync engine.
pub struct SyncRunner {
    engine: Arc<SyncEngine>,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
    backoffs: HashMap<String, ShopBackoff>,
}

impl SyncRunner {
    /// Spawns the runner loop and returns its handle.
    pub fn start(engine: Arc<SyncEngine>) -> SyncRunnerHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let runner = SyncRunner {
            engine,
            trigger_rx,
            shutdown_rx,
            backoffs: HashMap::new(),
        };

        let task = tokio::spawn(runner.run());

        SyncRunnerHandle {
            trigger_tx,
            shutdown_tx,
            task,
        }
    }

    async fn run(mut self) {
        let poll = Duration::from_secs(self.engine.config().sync.poll_interval_secs);
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(poll_secs = poll.as_secs(), "Sync runner started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sync_pass(false).await;
                }
                Some(_) = self.trigger_rx.recv() => {
                    debug!("Manual sync trigger received");
                    self.sync_pass(true).await;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Sync runner stopping");
                    break;
                }
            }
        }
    }

    /// Syncs each provisioned shop, honoring per-shop backoff unless forced.
    async fn sync_pass(&mut self, force: bool) {
        let now = Instant::now();
        let shop_ids = self.engine.config().shop_ids().to_vec();

        for shop_id in shop_ids {
            if !force {
                if let Some(hold) = self.backoffs.get(&shop_id) {
                    if now < hold.not_before {
                        debug!(shop_id, "Shop in backoff, skipping");
                        continue;
                    }
                }
            }

            match self.engine.sync_shop(&shop_id).await {
                Ok(summary) => {
                    debug!(
                        shop_id,
                        uploaded = summary.uploaded,
                        downloaded = summary.downloaded,
                        "Scheduled cycle succeeded"
                    );
                    self.backoffs.remove(&shop_id);
                }
                Err(e) => {
                    let delay = self.next_backoff(&shop_id);
                    warn!(
                        shop_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        backoff_ms = delay.as_millis() as u64,
                        "Scheduled cycle failed"
                    );
                }
            }
        }
    }

    /// Advances a shop's backoff and returns the applied delay.
    fn next_backoff(&mut self, shop_id: &str) -> Duration {
        let settings = &self.engine.config().sync;
        let initial = Duration::from_millis(settings.initial_backoff_ms);
        let max = Duration::from_secs(settings.max_backoff_secs);

        let hold = self
            .backoffs
            .entry(shop_id.to_string())
            .or_insert_with(|| ShopBackoff {
                policy: ExponentialBackoff {
                    initial_interval: initial,
                    max_interval: max,
                    // Never give up; the shop stays on max_interval.
                    max_elapsed_time: None,
                    ..ExponentialBackoff::default()
                },
                not_before: Instant::now(),
            });

        let delay = hold.policy.next_backoff().unwrap_or(max);
        hold.not_before = Instant::now() + delay;
        delay
    }
}
