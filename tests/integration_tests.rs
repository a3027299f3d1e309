//! Integration tests for the blog aggregator
//!
//! These tests drive the scheduler against a real SQLite database and a
//! mock HTTP server, covering batch fairness, failure isolation and
//! ingestion behavior end to end.

mod common {
    use std::sync::Arc;
    use std::time::Duration;

    use blog_aggregator::clock::ManualClock;
    use blog_aggregator::db::Database;
    use blog_aggregator::fetcher::HttpFetcher;
    use blog_aggregator::ingest::ItemErrorPolicy;
    use blog_aggregator::scheduler::{Scheduler, SchedulerSettings};
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub async fn create_db(temp_dir: &TempDir) -> Arc<Database> {
        let db = Database::new(&create_db_path(temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        Arc::new(db)
    }

    pub fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    pub fn settings(batch_size: u32, policy: ItemErrorPolicy) -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_millis(50),
            batch_size,
            fetch_timeout: Duration::from_secs(5),
            item_error_policy: policy,
        }
    }

    pub fn scheduler(
        db: &Arc<Database>,
        clock: &Arc<ManualClock>,
        settings: SchedulerSettings,
    ) -> Scheduler {
        let fetcher = HttpFetcher::new(Duration::from_secs(5), 1024 * 1024).unwrap();
        Scheduler::new(db.clone(), Arc::new(fetcher), clock.clone(), settings)
    }

    pub fn rss(items: &[(&str, &str, &str)]) -> String {
        let mut body = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0">
              <channel>
                <title>Integration Blog</title>
                <link>https://blog.example.com</link>
                <description>Test feed</description>"#,
        );
        for (title, link, pub_date) in items {
            body.push_str(&format!(
                r#"
                <item>
                  <title>{}</title>
                  <link>{}</link>
                  <description>About {}</description>
                  <guid>{}</guid>
                  <pubDate>{}</pubDate>
                </item>"#,
                title, link, title, link, pub_date
            ));
        }
        body.push_str("</channel></rss>");
        body
    }
}

#[cfg(test)]
mod config_integration_tests {
    use blog_aggregator::config::Config;

    #[test]
    fn test_load_actual_feeds_config() {
        let config = Config::load("feeds.toml");
        assert!(config.is_ok(), "Failed to load feeds.toml: {:?}", config.err());

        let config = config.unwrap();
        assert!(!config.feeds.is_empty(), "feeds.toml should have at least one feed");
        assert_eq!(config.tick_interval_secs, 6);
        assert_eq!(config.batch_size, 60);
    }
}

#[cfg(test)]
mod scheduler_integration_tests {
    use super::common::*;
    use std::sync::Arc;

    use blog_aggregator::clock::ManualClock;
    use blog_aggregator::db::FeedStore;
    use blog_aggregator::error::{PipelineError, TransportError};
    use blog_aggregator::ingest::ItemErrorPolicy;
    use chrono::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_least_recently_fetched_feed_goes_first() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;
        serve(&server, "/a.xml", rss(&[])).await;
        serve(&server, "/b.xml", rss(&[])).await;

        let feed_b = db
            .register_feed("B", &format!("{}/b.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();
        let feed_a = db
            .register_feed("A", &format!("{}/a.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();
        db.mark_feed_fetched(feed_b.id, start_time() - Duration::hours(1))
            .await
            .unwrap();

        let scheduler = scheduler(&db, &clock, settings(1, ItemErrorPolicy::AbortFeed));

        let first = scheduler.run_tick().await.unwrap();
        assert_eq!(first.launched, 1);
        assert_eq!(first.outcomes[0].feed_id, feed_a.id);

        clock.advance(Duration::seconds(6));
        let second = scheduler.run_tick().await.unwrap();
        assert_eq!(second.launched, 1);
        assert_eq!(second.outcomes[0].feed_id, feed_b.id);

        let a = db.get_feed(feed_a.id).await.unwrap().unwrap();
        let b = db.get_feed(feed_b.id).await.unwrap().unwrap();
        assert_eq!(a.last_fetched_at, Some(start_time()));
        assert_eq!(b.last_fetched_at, Some(start_time() + Duration::seconds(6)));
    }

    #[tokio::test]
    async fn test_items_become_posts() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;
        serve(
            &server,
            "/feed.xml",
            rss(&[
                ("First", "https://blog.example.com/1", "Mon, 01 Jan 2024 10:00:00 +0000"),
                ("Second", "https://blog.example.com/2", "Tue, 02 Jan 2024 10:00:00 GMT"),
            ]),
        )
        .await;
        let feed = db
            .register_feed("Blog", &format!("{}/feed.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();

        let report = scheduler(&db, &clock, settings(60, ItemErrorPolicy::AbortFeed))
            .run_tick()
            .await
            .unwrap();

        assert_eq!(report.posts_inserted(), 2);
        let posts = db.get_posts_for_feed(feed.id, 10, 0).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title, "Second");
        assert_eq!(posts[1].title, "First");
        assert_eq!(posts[1].url, "https://blog.example.com/1");
        assert_eq!(posts[1].description.as_deref(), Some("About First"));
        assert_eq!(posts[1].guid.as_deref(), Some("https://blog.example.com/1"));
        assert_eq!(posts[1].feed_id, feed.id);
        assert_eq!(posts[1].created_at, start_time());
    }

    #[tokio::test]
    async fn test_transport_error_marks_feed_without_posts() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let feed = db
            .register_feed("Broken", &format!("{}/broken.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();

        let report = scheduler(&db, &clock, settings(60, ItemErrorPolicy::AbortFeed))
            .run_tick()
            .await
            .unwrap();

        assert!(matches!(
            report.outcomes[0].ingest,
            Err(PipelineError::Transport(TransportError::Status(502)))
        ));
        let feed = db.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(feed.last_fetched_at, Some(start_time()));
        assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_date_stops_feed_but_not_siblings() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;
        serve(
            &server,
            "/dates.xml",
            rss(&[
                ("One", "https://dates.example.com/1", "Mon, 01 Jan 2024 00:00:00 +0000"),
                ("Two", "https://dates.example.com/2", "the day after tomorrow"),
                ("Three", "https://dates.example.com/3", "Wed, 03 Jan 2024 00:00:00 +0000"),
            ]),
        )
        .await;
        serve(
            &server,
            "/fine.xml",
            rss(&[(
                "Fine",
                "https://fine.example.com/1",
                "Mon, 01 Jan 2024 00:00:00 +0000",
            )]),
        )
        .await;
        let dates = db
            .register_feed("Dates", &format!("{}/dates.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();
        let fine = db
            .register_feed("Fine", &format!("{}/fine.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();

        let report = scheduler(&db, &clock, settings(60, ItemErrorPolicy::AbortFeed))
            .run_tick()
            .await
            .unwrap();

        let outcome = report
            .outcomes
            .iter()
            .find(|o| o.feed_id == dates.id)
            .unwrap();
        assert!(matches!(
            outcome.ingest,
            Err(PipelineError::DateFormat { index: 1, .. })
        ));

        let posts = db.get_posts_for_feed(dates.id, 10, 0).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "One");
        assert_eq!(db.get_post_count_for_feed(fine.id).await.unwrap(), 1);
        assert_eq!(outcome.committed.inserted, 1);
        assert_eq!(report.posts_inserted(), 2);
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_valid_items() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;
        serve(
            &server,
            "/dates.xml",
            rss(&[
                ("One", "https://dates.example.com/1", "Mon, 01 Jan 2024 00:00:00 +0000"),
                ("Two", "https://dates.example.com/2", "the day after tomorrow"),
                ("Three", "https://dates.example.com/3", "Wed, 03 Jan 2024 00:00:00 +0000"),
            ]),
        )
        .await;
        let feed = db
            .register_feed("Dates", &format!("{}/dates.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();

        let report = scheduler(&db, &clock, settings(60, ItemErrorPolicy::SkipItem))
            .run_tick()
            .await
            .unwrap();

        let summary = report.outcomes[0].ingest.as_ref().unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_refetching_same_content_does_not_duplicate_posts() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;
        serve(
            &server,
            "/feed.xml",
            rss(&[
                ("First", "https://blog.example.com/1", "Mon, 01 Jan 2024 10:00:00 +0000"),
                ("Second", "https://blog.example.com/2", "Tue, 02 Jan 2024 10:00:00 +0000"),
            ]),
        )
        .await;
        let feed = db
            .register_feed("Blog", &format!("{}/feed.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();
        let scheduler = scheduler(&db, &clock, settings(60, ItemErrorPolicy::AbortFeed));

        scheduler.run_tick().await.unwrap();
        clock.advance(Duration::seconds(6));
        let second = scheduler.run_tick().await.unwrap();

        let summary = second.outcomes[0].ingest.as_ref().unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.duplicates, 2);
        assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_last_fetched_is_monotonic_across_ticks() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;
        serve(&server, "/feed.xml", rss(&[])).await;
        let feed = db
            .register_feed("Blog", &format!("{}/feed.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();
        let scheduler = scheduler(&db, &clock, settings(60, ItemErrorPolicy::AbortFeed));

        let mut previous = None;
        for step in [6, 6, -30, 6] {
            scheduler.run_tick().await.unwrap();
            let current = db.get_feed(feed.id).await.unwrap().unwrap().last_fetched_at;
            assert!(current >= previous, "{:?} went back from {:?}", current, previous);
            previous = current;
            clock.advance(Duration::seconds(step));
        }
    }

    #[tokio::test]
    async fn test_batch_larger_than_store_processes_every_feed() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;

        for i in 0..8 {
            let route = format!("/feed{}.xml", i);
            let link = format!("https://blog{}.example.com/1", i);
            serve(
                &server,
                &route,
                rss(&[("Post", link.as_str(), "Mon, 01 Jan 2024 10:00:00 +0000")]),
            )
            .await;
            db.register_feed(
                &format!("Feed {}", i),
                &format!("{}{}", server.uri(), route),
                Uuid::nil(),
            )
            .await
            .unwrap();
        }

        let report = scheduler(&db, &clock, settings(60, ItemErrorPolicy::AbortFeed))
            .run_tick()
            .await
            .unwrap();

        assert_eq!(report.launched, 8);
        assert_eq!(report.succeeded(), 8);
        assert_eq!(report.posts_inserted(), 8);
        let feeds = db.get_all_feeds().await.unwrap();
        assert!(feeds.iter().all(|f| f.last_fetched_at == Some(start_time())));
    }

    #[tokio::test]
    async fn test_background_scheduler_ingests_and_stops() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let clock = Arc::new(ManualClock::new(start_time()));
        let server = MockServer::start().await;
        serve(
            &server,
            "/feed.xml",
            rss(&[(
                "Only",
                "https://blog.example.com/only",
                "Mon, 01 Jan 2024 10:00:00 +0000",
            )]),
        )
        .await;
        let feed = db
            .register_feed("Blog", &format!("{}/feed.xml", server.uri()), Uuid::nil())
            .await
            .unwrap();

        let handle = scheduler(&db, &clock, settings(60, ItemErrorPolicy::AbortFeed)).start();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        handle.stop().await.unwrap();

        assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 1);
        let feed = db.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(feed.last_fetched_at, Some(start_time()));
    }
}
