//! Periodic feed-fetch scheduler.
//!
//! Each tick selects the least-recently-fetched feeds, processes all of them
//! concurrently, and waits for every unit before the next tick may start, so
//! at most one batch is ever in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::db::FeedStore;
use crate::error::TickError;
use crate::fetcher::DocumentFetcher;
use crate::ingest::ItemErrorPolicy;
use crate::pipeline::{FeedOutcome, Pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub batch_size: u32,
    pub fetch_timeout: Duration,
    pub item_error_policy: ItemErrorPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(6),
            batch_size: 60,
            fetch_timeout: Duration::from_secs(30),
            item_error_policy: ItemErrorPolicy::AbortFeed,
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Units spawned; always the size of the selected batch.
    pub launched: usize,
    pub outcomes: Vec<FeedOutcome>,
    /// Units that panicked instead of producing an outcome.
    pub panicked: usize,
}

impl TickReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded() + self.panicked
    }

    /// Posts committed this tick, counting those written before a feed aborted.
    pub fn posts_inserted(&self) -> usize {
        self.outcomes.iter().map(|o| o.committed.inserted).sum()
    }

    pub fn outcome_for(&self, url: &str) -> Option<&FeedOutcome> {
        self.outcomes.iter().find(|o| o.url == url)
    }
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn FeedStore>,
        fetcher: Arc<dyn DocumentFetcher>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        let pipeline = Pipeline::new(
            store,
            fetcher,
            clock,
            settings.fetch_timeout,
            settings.item_error_policy,
        );
        Self {
            pipeline: Arc::new(pipeline),
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Select one batch and process it to completion.
    pub async fn run_tick(&self) -> Result<TickReport, TickError> {
        let batch = self
            .pipeline
            .store()
            .select_fetch_batch(self.settings.batch_size, 0)
            .await
            .map_err(TickError::BatchSelection)?;

        if batch.is_empty() {
            debug!("No feeds to fetch");
            return Ok(TickReport::default());
        }

        info!("Fetching batch of {} feed(s)", batch.len());

        let mut units = JoinSet::new();
        for target in batch {
            let pipeline = self.pipeline.clone();
            units.spawn(async move { pipeline.process(target).await });
        }

        let mut report = TickReport {
            launched: units.len(),
            outcomes: Vec::with_capacity(units.len()),
            panicked: 0,
        };

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    error!("Feed unit did not complete: {}", e);
                    report.panicked += 1;
                }
            }
        }

        Ok(report)
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A tick in progress always runs to completion before shutdown is observed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler started (tick interval: {:?}, batch size: {})",
            self.settings.tick_interval, self.settings.batch_size
        );

        let mut timer = interval(self.settings.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.run_tick().await {
                Ok(report) if report.launched > 0 => info!(
                    "Tick complete: {} feed(s), {} new post(s), {} failure(s)",
                    report.launched,
                    report.posts_inserted(),
                    report.failed()
                ),
                Ok(_) => {}
                Err(e) => warn!("Skipping tick: {}", e),
            }
        }

        info!("Scheduler stopped");
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        SchedulerHandle { shutdown, task }
    }
}

/// Owns a running scheduler task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the scheduler to stop and wait for the current tick to drain.
    pub async fn stop(self) -> Result<(), JoinError> {
        // The receiver only goes away once the task has already exited.
        let _ = self.shutdown.send(true);
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
