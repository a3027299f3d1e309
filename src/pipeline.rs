//! One feed's work for one tick.
//!
//! Marking the feed fetched and running fetch → parse → ingest are two
//! independent operations. Neither waits for the other, so a feed that keeps
//! failing still rotates to the back of the fetch order.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{FeedStore, FetchTarget};
use crate::error::{PipelineError, StoreError, TransportError};
use crate::fetcher::DocumentFetcher;
use crate::ingest::{ingest_items, IngestAborted, IngestSummary, ItemErrorPolicy};
use crate::parser::{parse_document, ParsedFeed};

#[derive(Debug)]
pub struct FeedOutcome {
    pub feed_id: Uuid,
    pub url: String,
    pub marked: Result<(), StoreError>,
    pub ingest: Result<IngestSummary, PipelineError>,
    /// Posts written this tick, including those before an abort.
    pub committed: IngestSummary,
}

impl FeedOutcome {
    pub fn is_success(&self) -> bool {
        self.marked.is_ok() && self.ingest.is_ok()
    }
}

pub struct Pipeline {
    store: Arc<dyn FeedStore>,
    fetcher: Arc<dyn DocumentFetcher>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    item_error_policy: ItemErrorPolicy,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn FeedStore>,
        fetcher: Arc<dyn DocumentFetcher>,
        clock: Arc<dyn Clock>,
        fetch_timeout: Duration,
        item_error_policy: ItemErrorPolicy,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            fetch_timeout,
            item_error_policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn FeedStore> {
        &self.store
    }

    pub async fn process(&self, target: FetchTarget) -> FeedOutcome {
        let (marked, ingest) = tokio::join!(self.mark_fetched(target.id), self.ingest(&target));

        if let Err(e) = &marked {
            error!("Failed to mark feed {} fetched: {}", target.id, e);
        }
        let (committed, ingest) = match ingest {
            Ok(summary) => {
                info!(
                    "Feed {} ingested: {} new, {} duplicate, {} skipped",
                    target.url, summary.inserted, summary.duplicates, summary.skipped
                );
                (summary, Ok(summary))
            }
            Err(IngestAborted { committed, error }) => {
                warn!(
                    "Feed {} abandoned for this tick after {} new post(s): {}",
                    target.url, committed.inserted, error
                );
                (committed, Err(error))
            }
        };

        FeedOutcome {
            feed_id: target.id,
            url: target.url,
            marked,
            ingest,
            committed,
        }
    }

    pub async fn mark_fetched(&self, feed_id: Uuid) -> Result<(), StoreError> {
        self.store.mark_feed_fetched(feed_id, self.clock.now()).await
    }

    pub async fn ingest(&self, target: &FetchTarget) -> Result<IngestSummary, IngestAborted> {
        let parsed = self.fetch_and_parse(&target.url).await?;

        ingest_items(
            self.store.as_ref(),
            self.clock.as_ref(),
            target.id,
            parsed.items,
            self.item_error_policy,
        )
        .await
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed, PipelineError> {
        let body = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url))
            .await
            .map_err(|_| TransportError::Timeout(self.fetch_timeout))??;

        let parsed = parse_document(&body)?;
        debug!(
            "Parsed '{}' ({}): {} item(s)",
            parsed.channel.title,
            parsed.channel.link,
            parsed.items.len()
        );
        Ok(parsed)
    }
}
