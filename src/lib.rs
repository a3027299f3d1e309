//! Blog Aggregator - feed-fetch scheduler
//!
//! Periodically polls registered feed URLs, parses their RSS/Atom documents
//! and stores new items as posts. Feeds are fetched least-recently-fetched
//! first, one bounded batch at a time, with failures contained per feed.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod parser;
pub mod pipeline;
pub mod scheduler;
