// tests/fetcher_http.rs
//
// HttpFetcher against a wiremock server: cache-busting, failure tolerance,
// timeouts, and the un-busted admin read.

use std::time::Duration;

use serde_json::json;
use village_live_sync::fetcher::{HttpFetcher, SnapshotSource};
use village_live_sync::SyncError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(server: &MockServer) -> HttpFetcher {
    HttpFetcher::new(&format!("{}/villagesite/data.json", server.uri()))
        .expect("valid url")
        .with_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn poll_read_parses_and_busts_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/villagesite/data.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "last_updated": "2024-01-01T00:00:00Z",
            "data": { "prices": [ { "crop": "Rice", "price": "2000", "market": "X", "trend": "up" } ] }
        })))
        .mount(&server)
        .await;

    let snap = fetcher(&server)
        .fetch_snapshot()
        .await
        .expect("snapshot on 200");
    assert_eq!(snap.data.prices().unwrap()[0].crop, "Rice");

    let reqs = server.received_requests().await.expect("recording on");
    assert_eq!(reqs.len(), 1);
    let t = reqs[0]
        .url
        .query_pairs()
        .find(|(k, _)| k == "t")
        .map(|(_, v)| v.into_owned())
        .expect("cache buster present");
    assert!(t.parse::<i64>().is_ok(), "t should be epoch ms, got {t}");
}

#[tokio::test]
async fn non_success_status_is_no_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(fetcher(&server).fetch_snapshot().await.is_none());
}

#[tokio::test]
async fn malformed_json_is_no_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
        .mount(&server)
        .await;

    assert!(fetcher(&server).fetch_snapshot().await.is_none());
}

#[tokio::test]
async fn slow_host_times_out_to_no_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "last_updated": 1, "data": {} }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    assert!(fetcher(&server).fetch_snapshot().await.is_none());
}

#[tokio::test]
async fn unreachable_host_is_no_update() {
    // Nothing listens on port 9 (discard) in test environments.
    let f = HttpFetcher::new("http://127.0.0.1:9/data.json")
        .unwrap()
        .with_timeout(Duration::from_millis(300));
    assert!(f.fetch_snapshot().await.is_none());
}

#[tokio::test]
async fn admin_read_has_no_cache_buster_and_reports_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = fetcher(&server).fetch_current().await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteRead(_)), "got {err:?}");

    let reqs = server.received_requests().await.unwrap();
    assert_eq!(reqs.len(), 1);
    assert!(reqs[0].url.query().is_none());
}
