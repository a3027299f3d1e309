//! Error types for the feed-fetch scheduler.
//!
//! Every error here is contained at the granularity where it happens: a
//! [`TickError`] skips one tick, everything else abandons (part of) a single
//! feed's work for the current tick.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`FeedStore`](crate::db::FeedStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store could not be reached at all. Not raised by the SQLite
    /// [`Database`](crate::db::Database), whose failures surface as
    /// `Database`; kept for stores backed by something other than sqlx.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure while retrieving a feed document over the network.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("document too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure while decoding a fetched document.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid RSS document: {0}")]
    Rss(#[from] rss::Error),

    #[error("unrecognized feed document: {0}")]
    Unrecognized(String),
}

/// Why a single feed's fetch/parse/ingest pipeline stopped early.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("item {index} has an unparseable publish date {value:?}: {source}")]
    DateFormat {
        index: usize,
        value: String,
        source: chrono::ParseError,
    },

    #[error("store write failed: {0}")]
    StoreWrite(#[source] StoreError),
}

/// Failure that prevents a whole tick from running.
#[derive(Error, Debug)]
pub enum TickError {
    #[error("failed to select fetch batch: {0}")]
    BatchSelection(#[source] StoreError),
}
