//! Producer scheduling
//!
//! The [`Scheduler`] ticks on a fixed interval aligned to the minute boundary
//! and fires one [`Producer`] run per configured (country, collection) pair.
//! Runs are independent tokio tasks bounded by a semaphore; a tick never
//! waits for the runs of the previous one. Every run reports back over an
//! `mpsc` channel to a collector task that logs the outcome.
//!
//! ```text
//!   tick (every minute)
//!     │
//!     ├── spawn ──> [permit] Producer::run(pl, subscriptions-users) ──┐
//!     ├── spawn ──> [permit] Producer::run(pl, subscriptions-video) ──┤ ProducerReport
//!     └── spawn ──> [permit] Producer::run(by, subscriptions-users) ──┤
//!                                                                     ▼
//!                                                              collector (logs)
//! ```

pub mod producer;

use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ProducerPair, SchedulerConfig};
use crate::utils::format_slot;

pub use producer::{ProduceRequest, Producer, ProducerOutcome, ProducerReport};

/// Reports buffered between producers and the collector
const REPORT_BUFFER: usize = 256;

/// Fires producer runs for every configured pair on each tick
pub struct Scheduler {
    producer: Arc<Producer>,
    pairs: Vec<ProducerPair>,
    interval: Duration,
    permits: Arc<Semaphore>,
    is_running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(producer: Arc<Producer>, config: &SchedulerConfig) -> Self {
        Self {
            producer,
            pairs: config.pairs.clone(),
            interval: Duration::from_secs(config.interval_secs.max(1)),
            permits: Arc::new(Semaphore::new(config.max_concurrent_producers.max(1))),
            // Armed here so a stop() issued before start() is kept
            is_running: Arc::new(RwLock::new(true)),
        }
    }

    pub fn pairs(&self) -> &[ProducerPair] {
        &self.pairs
    }

    /// Spawn one producer run per pair for the current minute
    pub fn fire(&self, reports: &mpsc::Sender<ProducerReport>) -> Vec<JoinHandle<()>> {
        self.fire_at(reports, Utc::now())
    }

    /// Spawn one producer run per pair; returns without waiting for them
    ///
    /// Each request carries the local slot of `at`, so a run that waits for a
    /// permit past the minute boundary still produces its own slot.
    pub fn fire_at(
        &self,
        reports: &mpsc::Sender<ProducerReport>,
        at: DateTime<Utc>,
    ) -> Vec<JoinHandle<()>> {
        self.pairs
            .iter()
            .map(|pair| {
                let producer = self.producer.clone();
                let permits = self.permits.clone();
                let reports = reports.clone();
                let mut request = ProduceRequest::new(&pair.country, &pair.collection);
                if let Some(tz) = producer.timezone(&pair.country) {
                    let local = at.with_timezone(&tz);
                    request = request
                        .with_time(format_slot(&local))
                        .with_datetime(local.naive_local());
                }

                tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    let report = match producer.run(&request).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(
                                country = %request.country,
                                collection = %request.collection,
                                error = %e,
                                "Producer run aborted"
                            );
                            ProducerReport::failed(&request.country, &request.collection, &e)
                        }
                    };
                    if reports.send(report).await.is_err() {
                        debug!("Report collector gone");
                    }
                })
            })
            .collect()
    }

    /// Tick until [`stop`](Self::stop) is called; returns at once if already stopped
    pub async fn start(&self) {
        let (sender, receiver) = mpsc::channel(REPORT_BUFFER);
        let collector = tokio::spawn(collect_reports(receiver));

        let first = tokio::time::Instant::now() + until_next_minute();
        let mut ticker = tokio::time::interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            pairs = self.pairs.len(),
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );

        while *self.is_running.read().await {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!(pairs = self.pairs.len(), "Scheduler tick");
                    self.fire(&sender);
                }
                _ = self.wait_for_stop() => {
                    break;
                }
            }
        }

        drop(sender);
        if let Err(e) = collector.await {
            warn!(error = %e, "Report collector ended abnormally");
        }
        info!("Scheduler stopped");
    }

    /// Stop ticking; runs already spawned finish on their own
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    async fn wait_for_stop(&self) {
        while *self.is_running.read().await {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Time left until the next wall-clock minute starts
pub fn until_next_minute() -> Duration {
    let now = Utc::now();
    let elapsed = Duration::from_secs(u64::from(now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000));
    Duration::from_secs(60).saturating_sub(elapsed)
}

/// Log every report until all senders are gone
pub async fn collect_reports(mut receiver: mpsc::Receiver<ProducerReport>) -> usize {
    let mut received = 0;
    while let Some(report) = receiver.recv().await {
        received += 1;
        match &report.outcome {
            ProducerOutcome::Completed => info!(report = %report, "Producer run finished"),
            ProducerOutcome::Failed(reason) => {
                warn!(report = %report, reason = %reason, "Producer run failed")
            }
            ProducerOutcome::NoMatch | ProducerOutcome::Filtered => {
                debug!(report = %report, "Producer run had nothing to do")
            }
        }
    }
    received
}
