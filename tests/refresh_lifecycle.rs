//! Integration tests for refreshing feeds against a mock HTTP server:
//! status transitions, staleness, duplicate healing, icons.

use std::io::Cursor;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use newsroll::clock::{Clock, FixedClock};
use newsroll::net::ReqwestNetwork;
use newsroll::refresh::{RefreshError, RefreshOutcome, RefreshReport, Refresher};
use newsroll::storage::{Changeset, Database, FeedStatus, NewFeed, NewItem};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <pubDate>Mon, 01 Jan 2024 09:00:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title>{items}</channel></rss>"#
    )
}

struct Harness {
    server: MockServer,
    db: Database,
    clock: Arc<FixedClock>,
    refresher: Refresher,
    feed_id: i64,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let db = Database::open(":memory:").await.unwrap();
        let feed_id = db
            .insert_feed(&NewFeed {
                url: format!("{}/feed.xml", server.uri()),
                title: "Test".into(),
                site_url: None,
                folder_id: None,
            })
            .await
            .unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap(),
        ));
        let refresher = Refresher::new(Arc::new(db.clone()), Arc::new(ReqwestNetwork::default()))
            .with_clock(clock.clone());
        Self {
            server,
            db,
            clock,
            refresher,
            feed_id,
        }
    }

    async fn serve(&self, status: u16, body: &str) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }

    async fn refreshed(&self) -> RefreshReport {
        match self.refresher.refresh(self.feed_id).await.unwrap() {
            RefreshOutcome::Refreshed(report) => report,
            other => panic!("expected a refresh, got {:?}", other),
        }
    }
}

// ============================================================================
// Status Transitions
// ============================================================================

#[tokio::test]
async fn test_failed_fetch_sets_error_then_recovers() {
    let h = Harness::new().await;
    h.serve(500, "oops").await;

    let err = h.refresher.refresh(h.feed_id).await.unwrap_err();
    assert!(matches!(err, RefreshError::SourceUnreachable { .. }));

    let feed = h.db.load_feed(h.feed_id).await.unwrap().unwrap();
    assert_eq!(feed.status, FeedStatus::Error);
    assert!(feed.error.as_deref().is_some_and(|e| e.contains("500")));
    assert_eq!(feed.last_refresh, None);
    assert!(h.db.load_items(h.feed_id).await.unwrap().is_empty());

    h.serve(200, &rss(&[("One", "https://example.com/1")])).await;
    let report = h.refreshed().await;
    assert_eq!(report.inserted, 1);

    let feed = h.db.load_feed(h.feed_id).await.unwrap().unwrap();
    assert_eq!(feed.status, FeedStatus::Idle);
    assert_eq!(feed.error, None);
    assert_eq!(feed.last_refresh, Some(h.clock.now()));
}

#[tokio::test]
async fn test_json_feed_is_unsupported() {
    let h = Harness::new().await;
    h.serve(200, r#"{"version": "https://jsonfeed.org/version/1", "items": []}"#)
        .await;

    let err = h.refresher.refresh(h.feed_id).await.unwrap_err();
    assert!(matches!(err, RefreshError::UnsupportedFormat(_)));

    let feed = h.db.load_feed(h.feed_id).await.unwrap().unwrap();
    assert_eq!(feed.status, FeedStatus::Error);
    assert!(feed
        .error
        .as_deref()
        .is_some_and(|e| e.contains("try a different feed URL")));
}

#[tokio::test]
async fn test_malformed_document_keeps_existing_items() {
    let h = Harness::new().await;
    h.serve(200, &rss(&[("One", "https://example.com/1")])).await;
    h.refreshed().await;
    let stamped = h.db.load_feed(h.feed_id).await.unwrap().unwrap().last_refresh;

    h.clock.advance(Duration::hours(1));
    h.serve(200, "<html><body>Moved</body></html>").await;
    let err = h.refresher.refresh(h.feed_id).await.unwrap_err();
    assert!(matches!(err, RefreshError::Malformed(_)));

    let feed = h.db.load_feed(h.feed_id).await.unwrap().unwrap();
    assert_eq!(feed.status, FeedStatus::Error);
    assert_eq!(feed.last_refresh, stamped);
    assert_eq!(h.db.load_items(h.feed_id).await.unwrap().len(), 1);
}

// ============================================================================
// Staleness
// ============================================================================

#[tokio::test]
async fn test_refresh_if_stale_respects_interval() {
    let h = Harness::new().await;
    h.serve(200, &rss(&[("One", "https://example.com/1")])).await;
    let interval = Duration::seconds(60);

    // Never refreshed counts as stale
    assert!(matches!(
        h.refresher.refresh_if_stale(h.feed_id, interval).await.unwrap(),
        RefreshOutcome::Refreshed(_)
    ));
    assert_eq!(h.request_count().await, 1);

    h.clock.advance(Duration::seconds(59));
    assert_eq!(
        h.refresher.refresh_if_stale(h.feed_id, interval).await.unwrap(),
        RefreshOutcome::Fresh
    );
    assert_eq!(h.request_count().await, 1);

    h.clock.advance(Duration::seconds(1));
    assert!(matches!(
        h.refresher.refresh_if_stale(h.feed_id, interval).await.unwrap(),
        RefreshOutcome::Refreshed(_)
    ));
    assert_eq!(h.request_count().await, 2);

    // An unconditional refresh ignores the interval
    h.refreshed().await;
    assert_eq!(h.request_count().await, 3);
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_repeated_refresh_adds_only_new_items() {
    let h = Harness::new().await;
    h.serve(
        200,
        &rss(&[("One", "https://example.com/1"), ("Two", "https://example.com/2")]),
    )
    .await;
    assert_eq!(h.refreshed().await.inserted, 2);
    assert_eq!(
        h.refreshed().await,
        RefreshReport {
            feed_id: h.feed_id,
            ..RefreshReport::default()
        }
    );

    // Item 1 fell off the feed, item 3 is new
    h.serve(
        200,
        &rss(&[("Two", "https://example.com/2"), ("Three", "https://example.com/3")]),
    )
    .await;
    assert_eq!(h.refreshed().await.inserted, 1);

    let urls: Vec<String> = h
        .db
        .load_items(h.feed_id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.url)
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://example.com/1",
            "https://example.com/2",
            "https://example.com/3"
        ]
    );
}

#[tokio::test]
async fn test_refresh_heals_duplicates_and_keeps_read_state() {
    let h = Harness::new().await;
    h.serve(200, &rss(&[("Two", "https://example.com/2")])).await;
    h.refreshed().await;
    let original = h.db.load_items(h.feed_id).await.unwrap()[0].clone();

    // A stray copy of the same item, already read
    let mut stray = Changeset::new(h.feed_id);
    stray.insert([NewItem {
        title: original.title.clone(),
        description: None,
        url: original.url.clone(),
        published: original.published,
    }]);
    h.db.commit_changes(&stray).await.unwrap();
    let copy_id = h.db.load_items(h.feed_id).await.unwrap()[1].id;
    h.refresher.set_item_read(copy_id, true).await.unwrap();

    let report = h.refreshed().await;
    assert_eq!(report.deleted, 1);
    assert_eq!(report.marked_read, 1);
    assert_eq!(report.inserted, 0);

    let items = h.db.load_items(h.feed_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, original.id);
    assert!(items[0].read);
}

#[tokio::test]
async fn test_subsecond_dates_collapse_to_one_item() {
    let h = Harness::new().await;
    h.serve(
        200,
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Test</title>
    <id>urn:example</id>
    <updated>2024-01-01T10:00:00Z</updated>
    <entry>
        <title>Same</title>
        <id>urn:example:1</id>
        <link href="https://example.com/a"/>
        <updated>2024-01-01T10:00:00.100Z</updated>
    </entry>
    <entry>
        <title>Same</title>
        <id>urn:example:2</id>
        <link href="https://example.com/a"/>
        <updated>2024-01-01T10:00:00.900Z</updated>
    </entry>
</feed>"#,
    )
    .await;

    assert_eq!(h.refreshed().await.inserted, 1);
    let items = h.db.load_items(h.feed_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].published,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
    );

    // Nothing left for the next pass to heal
    assert_eq!(
        h.refreshed().await,
        RefreshReport {
            feed_id: h.feed_id,
            ..RefreshReport::default()
        }
    );
}

#[tokio::test]
async fn test_articles_without_link_are_skipped() {
    let h = Harness::new().await;
    h.serve(
        200,
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title>
            <item><title>Linked</title><link>https://example.com/1</link></item>
            <item><title>Orphan</title><description>no link here</description></item>
        </channel></rss>"#,
    )
    .await;

    let report = h.refreshed().await;
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped_missing_url, 1);
}

// ============================================================================
// Icons
// ============================================================================

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 120, 200]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_declared_icon_is_stored_once() {
    let h = Harness::new().await;
    let body = format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title>
            <image><url>{}/logo.png</url><title>Test</title><link>https://example.com/</link></image>
            <item><title>One</title><link>https://example.com/1</link></item>
        </channel></rss>"#,
        h.server.uri()
    );
    h.serve(200, &body).await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png(100, 50)))
        .expect(1)
        .mount(&h.server)
        .await;

    assert!(h.refreshed().await.icon_updated);
    assert!(!h.refreshed().await.icon_updated);

    let feed = h.db.load_feed(h.feed_id).await.unwrap().unwrap();
    assert!(feed.has_icon());
    let icon = image::load_from_memory(feed.icon.as_deref().unwrap()).unwrap();
    assert_eq!((icon.width(), icon.height()), (64, 64));
}

#[tokio::test]
async fn test_missing_icon_does_not_fail_refresh() {
    let h = Harness::new().await;
    h.serve(
        200,
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title>
            <image><url>https://127.0.0.1:1/nowhere.png</url><title>Test</title><link>https://example.com/</link></image>
            <item><title>One</title><link>https://example.com/1</link></item>
        </channel></rss>"#,
    )
    .await;

    let report = h.refreshed().await;
    assert_eq!(report.inserted, 1);
    assert!(!report.icon_updated);
    assert_eq!(
        h.db.load_feed(h.feed_id).await.unwrap().unwrap().status,
        FeedStatus::Idle
    );
}

// ============================================================================
// Refresh All
// ============================================================================

#[tokio::test]
async fn test_refresh_all_reports_each_feed() {
    let h = Harness::new().await;
    h.serve(200, &rss(&[("One", "https://example.com/1")])).await;
    let broken_id = h
        .db
        .insert_feed(&NewFeed {
            url: format!("{}/broken.xml", h.server.uri()),
            title: "Broken".into(),
            site_url: None,
            folder_id: None,
        })
        .await
        .unwrap();

    let mut results = h.refresher.refresh_all(None).await.unwrap();
    results.sort_by_key(|r| r.feed_id);
    assert_eq!(results.len(), 2);

    let good = results.iter().find(|r| r.feed_id == h.feed_id).unwrap();
    assert!(matches!(good.result, Ok(RefreshOutcome::Refreshed(_))));
    let broken = results.iter().find(|r| r.feed_id == broken_id).unwrap();
    assert!(matches!(
        broken.result,
        Err(RefreshError::SourceUnreachable { .. })
    ));

    // Only the failed feed is still stale
    let results = h
        .refresher
        .refresh_all(Some(Duration::minutes(5)))
        .await
        .unwrap();
    for r in results {
        if r.feed_id == h.feed_id {
            assert_eq!(r.result.unwrap(), RefreshOutcome::Fresh);
        } else {
            assert!(r.result.is_err());
        }
    }
}
