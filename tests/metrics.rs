// tests/metrics.rs
use std::sync::Arc;

use axum::body::{self, Body};
use http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use village_live_sync::fetcher::StaticSource;
use village_live_sync::freshness::ChangeDetector;
use village_live_sync::metrics::Metrics;
use village_live_sync::admin::JsonBlobStore;
use village_live_sync::{CheckTrigger, LiveSync, SyncConfig};

#[tokio::test]
async fn metrics_endpoint_contains_poll_series() {
    let cfg = SyncConfig {
        marker_path: None,
        ..SyncConfig::default()
    };
    let metrics = Metrics::init(cfg.poll_interval_secs).expect("recorder");
    // Second init in the same process reuses the installed recorder.
    Metrics::init(cfg.poll_interval_secs).expect("idempotent init");

    let source = Arc::new(StaticSource::new(
        serde_json::from_value(json!({ "last_updated": 10, "data": {} })).unwrap(),
    ));
    let live = LiveSync::with_parts(
        &cfg,
        source,
        Arc::new(JsonBlobStore::new("http://127.0.0.1:9/unused").unwrap()),
        ChangeDetector::in_memory(),
    );
    live.poller.check_now(CheckTrigger::Startup).await;
    live.poller.check_now(CheckTrigger::Interval).await;

    let app: axum::Router = metrics.router();
    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "live_checks_total",
        "live_reconciliations_total",
        "live_last_marker_ms",
        "live_poll_interval_secs",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
}
