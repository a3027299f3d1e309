use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{FeedStore, InsertOutcome, NewPost};
use crate::error::PipelineError;
use crate::parser::ParsedItem;

/// What to do with the rest of a feed when an item's publish date is unreadable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorPolicy {
    /// Stop at the first bad date; items already written stay committed.
    #[default]
    AbortFeed,
    /// Drop only the offending item and keep going.
    SkipItem,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// A feed abandoned partway through, with what it had already written.
#[derive(Debug)]
pub struct IngestAborted {
    pub committed: IngestSummary,
    pub error: PipelineError,
}

impl From<PipelineError> for IngestAborted {
    fn from(error: PipelineError) -> Self {
        Self {
            committed: IngestSummary::default(),
            error,
        }
    }
}

/// Parse an RSS `pubDate` (RFC 2822 / RFC 1123, numeric or named zone) into UTC.
pub fn parse_publish_date(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc2822(value.trim()).map(|dt| dt.with_timezone(&Utc))
}

/// Write `items` for `feed_id` in document order.
///
/// A store write failure always stops the remaining items. A bad publish date
/// stops them too under [`ItemErrorPolicy::AbortFeed`]. Either way the posts
/// written before the stop stay committed and are reported in
/// [`IngestAborted::committed`].
///
/// Items with no link are skipped rather than stored with an empty URL, since
/// posts are unique per feed and URL.
pub async fn ingest_items(
    store: &dyn FeedStore,
    clock: &dyn Clock,
    feed_id: Uuid,
    items: Vec<ParsedItem>,
    policy: ItemErrorPolicy,
) -> Result<IngestSummary, IngestAborted> {
    let mut summary = IngestSummary::default();

    for (index, item) in items.into_iter().enumerate() {
        let raw_date = item.pub_date.as_deref().unwrap_or("");
        let published_at = match parse_publish_date(raw_date) {
            Ok(published_at) => published_at,
            Err(source) => {
                let err = PipelineError::DateFormat {
                    index,
                    value: raw_date.to_string(),
                    source,
                };
                match policy {
                    ItemErrorPolicy::AbortFeed => {
                        debug!(
                            "Feed {} aborted after {} new post(s): {}",
                            feed_id, summary.inserted, err
                        );
                        return Err(IngestAborted {
                            committed: summary,
                            error: err,
                        });
                    }
                    ItemErrorPolicy::SkipItem => {
                        warn!("Skipping item for feed {}: {}", feed_id, err);
                        summary.skipped += 1;
                        continue;
                    }
                }
            }
        };

        let Some(url) = item.link else {
            warn!(
                "Skipping item with no link (not stored with an empty URL): {}",
                item.title
            );
            summary.skipped += 1;
            continue;
        };

        let now = clock.now();
        let post = NewPost {
            id: Uuid::new_v4(),
            feed_id,
            title: item.title,
            url,
            description: item.description,
            guid: item.guid,
            published_at,
            created_at: now,
            updated_at: now,
        };

        match store.insert_post(&post).await {
            Ok(InsertOutcome::Inserted) => summary.inserted += 1,
            Ok(InsertOutcome::Duplicate) => summary.duplicates += 1,
            Err(e) => {
                return Err(IngestAborted {
                    committed: summary,
                    error: PipelineError::StoreWrite(e),
                });
            }
        }
    }

    Ok(summary)
}
