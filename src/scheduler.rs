//! Reconciliation scheduler.
//!
//! A periodic sweep that expires lapsed leases, renews leases about to
//! lapse and pull-syncs feeds that push has not kept fresh.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::feed::repository::PodcastRepository;
use crate::feed::sync::{FeedSynchronizer, SyncOutcome};
use crate::feed::types::Podcast;
use crate::websub::manager::{SubscribeOutcome, SubscriptionManager};
use crate::websub::repository::{CallbackLogRepository, SubscriptionRepository};
use crate::websub::types::Subscription;
use crate::Result;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Subscriptions flipped to `expired`.
    pub expired: u64,
    /// Renewal requests accepted by the hub.
    pub renewed: usize,
    /// Renewal requests that failed or had no hub to go to.
    pub renew_failed: usize,
    /// Stale feeds that were applied.
    pub resynced: usize,
    /// Stale feeds whose document had not changed.
    pub unchanged: usize,
    /// Stale feeds that failed to fetch or parse.
    pub sync_failed: usize,
}

/// Clears the running flag when a sweep ends or is cancelled.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciliation scheduler.
pub struct ReconciliationScheduler {
    db: Database,
    clock: Arc<dyn Clock>,
    manager: Arc<SubscriptionManager>,
    synchronizer: Arc<FeedSynchronizer>,
    config: SchedulerConfig,
    concurrency: usize,
    running: AtomicBool,
}

impl ReconciliationScheduler {
    /// Create a scheduler. `concurrency` bounds renewals and pull syncs
    /// running at once within a sweep.
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        manager: Arc<SubscriptionManager>,
        synchronizer: Arc<FeedSynchronizer>,
        config: SchedulerConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            clock,
            manager,
            synchronizer,
            config,
            concurrency: concurrency.max(1),
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep now.
    ///
    /// Returns `None` without doing anything if another sweep is still
    /// running.
    pub async fn run_once(&self) -> Result<Option<SweepReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sweep already running, skipping");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        let mut report = SweepReport::default();
        let now = self.clock.now();

        report.expired = SubscriptionRepository::new(self.db.pool())
            .expire_due(now)
            .await?;
        if report.expired > 0 {
            info!(count = report.expired, "Expired lapsed subscriptions");
        }

        if self.config.renew_expiring {
            self.renew_expiring(&mut report).await?;
        }

        self.resync_stale(&mut report).await?;

        debug!(?report, "Sweep finished");
        Ok(Some(report))
    }

    async fn renew_expiring(&self, report: &mut SweepReport) -> Result<()> {
        let now = self.clock.now();
        let until = now + ChronoDuration::seconds(self.config.renew_window_secs);
        let due = SubscriptionRepository::new(self.db.pool())
            .list_expiring(now, until, self.config.batch_size)
            .await?;
        if due.is_empty() {
            return Ok(());
        }

        info!(count = due.len(), "Renewing expiring subscriptions");
        let outcomes: Vec<bool> = stream::iter(due)
            .map(|sub| self.renew_one(sub))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for renewed in outcomes {
            if renewed {
                report.renewed += 1;
            } else {
                report.renew_failed += 1;
            }
        }
        Ok(())
    }

    async fn renew_one(&self, sub: Subscription) -> bool {
        match self.manager.renew(&sub.topic).await {
            Ok(SubscribeOutcome::Pending) | Ok(SubscribeOutcome::AlreadyActive) => true,
            Ok(outcome) => {
                warn!(topic = %sub.topic, ?outcome, "Lease renewal not accepted");
                false
            }
            Err(e) => {
                error!(topic = %sub.topic, "Lease renewal failed: {}", e);
                false
            }
        }
    }

    async fn resync_stale(&self, report: &mut SweepReport) -> Result<()> {
        let cutoff = self.clock.now() - ChronoDuration::seconds(self.config.staleness_secs);
        let stale = PodcastRepository::new(self.db.pool())
            .list_stale(cutoff, self.config.batch_size)
            .await?;
        if stale.is_empty() {
            return Ok(());
        }

        info!(count = stale.len(), "Pull-syncing stale feeds");
        let outcomes: Vec<Result<SyncOutcome>> = stream::iter(stale)
            .map(|podcast| self.resync_one(podcast))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome? {
                SyncOutcome::Synced(_) => report.resynced += 1,
                SyncOutcome::Skipped { .. } => report.unchanged += 1,
                SyncOutcome::ParseFailed(_) | SyncOutcome::FetchFailed(_) => {
                    report.sync_failed += 1
                }
            }
        }
        Ok(())
    }

    async fn resync_one(&self, podcast: Podcast) -> Result<SyncOutcome> {
        let outcome = self.synchronizer.sync_topic(&podcast.feed_url).await?;
        match &outcome {
            SyncOutcome::Skipped { .. } => {
                PodcastRepository::new(self.db.pool())
                    .mark_checked(podcast.id, self.clock.now())
                    .await?;
            }
            SyncOutcome::Synced(stats) if stats.inserted > 0 => {
                self.warn_if_push_missed(&podcast.feed_url, stats.inserted)
                    .await?;
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Pull found new episodes on a topic with a live subscription: the hub
    /// did not deliver them.
    async fn warn_if_push_missed(&self, topic: &str, inserted: usize) -> Result<()> {
        let Some(sub) = SubscriptionRepository::new(self.db.pool())
            .get_by_topic(topic)
            .await?
        else {
            return Ok(());
        };
        if !sub.is_live(self.clock.now()) {
            return Ok(());
        }

        let last_push = CallbackLogRepository::new(self.db.pool())
            .last_accepted_notification(topic)
            .await?;
        warn!(
            topic = %topic,
            hub = %sub.hub,
            inserted,
            last_push = ?last_push,
            "Pull sync found episodes the hub never pushed"
        );
        Ok(())
    }

    /// Start the periodic sweep on the runtime.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = Duration::from_secs(self.config.interval_secs.max(1));

        let task = tokio::spawn(async move {
            info!(
                "Reconciliation scheduler started (interval: {} seconds)",
                period.as_secs()
            );
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = timer.tick() => {}
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = self.run_once() => {
                        if let Err(e) = result {
                            error!("Sweep failed: {}", e);
                        }
                    }
                }
            }
            info!("Reconciliation scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler, cancelling a sweep in progress, and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
}
