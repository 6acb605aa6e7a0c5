// src/freshness.rs
//! Change detection: decides whether a fetched snapshot is newer than what is
//! already on the page.
//!
//! `last_updated` is normalized to an epoch-millisecond [`FreshnessMarker`].
//! The last-seen marker only ever moves forward; unparsable markers are
//! ignored and leave the previous marker in place.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use crate::snapshot::DataSnapshot;

pub const DEFAULT_MARKER_PATH: &str = "state/last_data_update.json";

/// Largest magnitude a browser `Date` can hold (±100,000,000 days).
pub const MAX_MARKER_MS: i64 = 8_640_000_000_000_000;

/// Offset-less date-time layouts, read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Epoch milliseconds of a snapshot's `last_updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FreshnessMarker(pub i64);

impl FreshnessMarker {
    pub fn millis(self) -> i64 {
        self.0
    }

    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self(ts.timestamp_millis())
    }

    /// `Some` only inside the range a browser `Date` accepts.
    pub fn checked(ms: i64) -> Option<Self> {
        (-MAX_MARKER_MS..=MAX_MARKER_MS).contains(&ms).then_some(Self(ms))
    }
}

impl fmt::Display for FreshnessMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Utc.timestamp_millis_opt(self.0).single() {
            Some(ts) => write!(f, "{}", crate::snapshot::iso_millis(ts)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Parse a published `last_updated` value.
///
/// Accepts RFC 3339 strings, offset-less date-times with `T` or a space
/// separator (UTC), plain `YYYY-MM-DD` dates (midnight UTC) and JSON numbers
/// (epoch ms, fractions truncated). Numbers beyond [`MAX_MARKER_MS`] are
/// unparsable.
pub fn parse_marker(raw: &Value) -> Option<FreshnessMarker> {
    match raw {
        Value::Number(n) => match n.as_i64() {
            Some(ms) => FreshnessMarker::checked(ms),
            None => n
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() <= MAX_MARKER_MS as f64)
                .and_then(|f| FreshnessMarker::checked(f.trunc() as i64)),
        },
        Value::String(s) => parse_marker_str(s.trim()),
        _ => None,
    }
}

fn parse_marker_str(s: &str) -> Option<FreshnessMarker> {
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return FreshnessMarker::checked(ts.timestamp_millis());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return FreshnessMarker::checked(naive.and_utc().timestamp_millis());
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = day.and_hms_opt(0, 0, 0)?;
        return FreshnessMarker::checked(midnight.and_utc().timestamp_millis());
    }
    None
}

/// Where the last applied marker lives between checks (and restarts).
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn load(&self) -> Option<FreshnessMarker>;
    async fn save(&self, marker: FreshnessMarker) -> std::io::Result<()>;
}

/// Process-lifetime marker; forgotten on restart.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    inner: Mutex<Option<FreshnessMarker>>,
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn load(&self) -> Option<FreshnessMarker> {
        *self.inner.lock().expect("marker mutex poisoned")
    }

    async fn save(&self, marker: FreshnessMarker) -> std::io::Result<()> {
        *self.inner.lock().expect("marker mutex poisoned") = Some(marker);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedMarker {
    last_data_update: Option<FreshnessMarker>,
}

/// Marker persisted as a small JSON file, read at startup.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    path: PathBuf,
}

impl FileMarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MarkerStore for FileMarkerStore {
    async fn load(&self) -> Option<FreshnessMarker> {
        let s = fs::read_to_string(&self.path).await.ok()?;
        serde_json::from_str::<PersistedMarker>(&s)
            .unwrap_or_default()
            .last_data_update
            .and_then(|m| FreshnessMarker::checked(m.millis()))
    }

    async fn save(&self, marker: FreshnessMarker) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(&PersistedMarker {
            last_data_update: Some(marker),
        })?;
        fs::write(&self.path, body).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Strictly newer than anything seen; already recorded.
    Newer(FreshnessMarker),
    /// Same as, or older than, the last seen marker.
    NotNewer {
        seen: FreshnessMarker,
        last: FreshnessMarker,
    },
    /// `last_updated` missing or not a recognizable timestamp.
    Unparsable,
}

pub struct ChangeDetector {
    store: Box<dyn MarkerStore>,
    last: Option<FreshnessMarker>,
}

impl ChangeDetector {
    /// Seeds the last-seen marker from `store`.
    pub async fn new(store: Box<dyn MarkerStore>) -> Self {
        let last = store.load().await;
        if let Some(m) = last {
            tracing::debug!(target: "poller", marker = %m, "restored freshness marker");
        }
        Self { store, last }
    }

    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryMarkerStore::default()),
            last: None,
        }
    }

    pub fn last_seen(&self) -> Option<FreshnessMarker> {
        self.last
    }

    /// Compare `snapshot` against the last seen marker. On `Newer` the marker
    /// is stored before returning, so the caller reconciles at most once per
    /// marker value. A failed save is logged and does not change the result.
    pub async fn observe(&mut self, snapshot: &DataSnapshot) -> Detection {
        let Some(seen) = parse_marker(&snapshot.last_updated) else {
            tracing::warn!(
                target: "poller",
                raw = %snapshot.last_updated,
                "unparsable last_updated; keeping previous marker"
            );
            return Detection::Unparsable;
        };

        if let Some(last) = self.last {
            if seen <= last {
                return Detection::NotNewer { seen, last };
            }
        }

        self.last = Some(seen);
        if let Err(e) = self.store.save(seen).await {
            tracing::warn!(target: "poller", error = %e, "persist freshness marker");
        }
        Detection::Newer(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(last_updated: Value) -> DataSnapshot {
        DataSnapshot {
            last_updated,
            ..Default::default()
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl MarkerStore for BrokenStore {
        async fn load(&self) -> Option<FreshnessMarker> {
            None
        }

        async fn save(&self, _marker: FreshnessMarker) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    #[test]
    fn parses_supported_marker_shapes() {
        let iso = parse_marker(&json!("2024-01-01T00:00:00Z")).unwrap();
        assert_eq!(iso.millis(), 1_704_067_200_000);
        assert_eq!(parse_marker(&json!("2024-01-01")), Some(iso));
        assert_eq!(parse_marker(&json!("2024-01-01T00:00:00.000")), Some(iso));
        assert_eq!(parse_marker(&json!("2024-01-01 00:00:00")), Some(iso));
        assert_eq!(
            parse_marker(&json!("2024-01-01T05:30:00+05:30")),
            Some(iso)
        );
        assert_eq!(parse_marker(&json!(1_704_067_200_000i64)), Some(iso));
        assert_eq!(parse_marker(&json!(1_704_067_200_000.9)), Some(iso));
    }

    #[test]
    fn space_separated_datetime_keeps_time_of_day() {
        let m = parse_marker(&json!("2024-01-01 10:00:00")).unwrap();
        assert_eq!(m, parse_marker(&json!("2024-01-01T10:00:00Z")).unwrap());
    }

    #[test]
    fn rejects_junk_markers() {
        assert_eq!(parse_marker(&json!("yesterday")), None);
        assert_eq!(parse_marker(&json!("")), None);
        assert_eq!(parse_marker(&Value::Null), None);
        assert_eq!(parse_marker(&json!({ "ts": 1 })), None);
    }

    #[test]
    fn rejects_numbers_outside_date_range() {
        assert_eq!(parse_marker(&json!(1e20)), None);
        assert_eq!(parse_marker(&json!(-1e20)), None);
        assert_eq!(parse_marker(&json!(u64::MAX)), None);
        assert_eq!(parse_marker(&json!(i64::MAX)), None);
        assert_eq!(parse_marker(&json!(MAX_MARKER_MS + 1)), None);
        assert_eq!(
            parse_marker(&json!(MAX_MARKER_MS)),
            Some(FreshnessMarker(MAX_MARKER_MS))
        );
    }

    #[tokio::test]
    async fn out_of_range_marker_does_not_block_later_updates() {
        let mut det = ChangeDetector::in_memory();
        det.observe(&snap(json!("2024-01-01T00:00:00Z"))).await;
        assert_eq!(det.observe(&snap(json!(1e20))).await, Detection::Unparsable);
        assert!(matches!(
            det.observe(&snap(json!("2030-01-01T00:00:00Z"))).await,
            Detection::Newer(_)
        ));
        assert_eq!(
            det.last_seen(),
            parse_marker(&json!("2030-01-01T00:00:00Z"))
        );
    }

    #[tokio::test]
    async fn first_parsable_marker_is_newer() {
        let mut det = ChangeDetector::in_memory();
        let d = det.observe(&snap(json!("2024-01-01T00:00:00Z"))).await;
        assert!(matches!(d, Detection::Newer(_)));
        assert_eq!(
            det.last_seen().map(|m| m.to_string()).as_deref(),
            Some("2024-01-01T00:00:00.000Z")
        );
    }

    #[tokio::test]
    async fn same_or_older_marker_is_noop() {
        let mut det = ChangeDetector::in_memory();
        det.observe(&snap(json!("2024-02-01T00:00:00Z"))).await;
        assert!(matches!(
            det.observe(&snap(json!("2024-02-01T00:00:00Z"))).await,
            Detection::NotNewer { .. }
        ));
        assert!(matches!(
            det.observe(&snap(json!("2024-01-15T00:00:00Z"))).await,
            Detection::NotNewer { .. }
        ));
        assert_eq!(
            det.last_seen(),
            parse_marker(&json!("2024-02-01T00:00:00Z"))
        );
    }

    #[tokio::test]
    async fn unparsable_marker_keeps_previous() {
        let mut det = ChangeDetector::in_memory();
        det.observe(&snap(json!("2024-02-01"))).await;
        let before = det.last_seen();
        assert_eq!(det.observe(&snap(json!("soon"))).await, Detection::Unparsable);
        assert_eq!(det.last_seen(), before);
    }

    #[tokio::test]
    async fn failed_save_still_reports_newer() {
        let mut det = ChangeDetector::new(Box::new(BrokenStore)).await;
        let first = det.observe(&snap(json!("2024-04-01T00:00:00Z"))).await;
        assert!(matches!(first, Detection::Newer(_)));
        assert_eq!(det.last_seen(), parse_marker(&json!("2024-04-01T00:00:00Z")));

        let second = det.observe(&snap(json!("2024-04-02T00:00:00Z"))).await;
        assert!(matches!(second, Detection::Newer(_)));
        assert_eq!(det.last_seen(), parse_marker(&json!("2024-04-02T00:00:00Z")));
    }

    #[tokio::test]
    async fn file_store_survives_new_detector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/marker.json");

        let mut det = ChangeDetector::new(Box::new(FileMarkerStore::new(&path))).await;
        assert!(det.last_seen().is_none());
        det.observe(&snap(json!("2024-03-01T10:00:00Z"))).await;

        let mut again = ChangeDetector::new(Box::new(FileMarkerStore::new(&path))).await;
        assert_eq!(
            again.last_seen(),
            parse_marker(&json!("2024-03-01T10:00:00Z"))
        );
        assert!(matches!(
            again.observe(&snap(json!("2024-03-01T10:00:00Z"))).await,
            Detection::NotNewer { .. }
        ));
    }

    #[tokio::test]
    async fn corrupt_marker_file_reads_as_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(FileMarkerStore::new(&path).load().await.is_none());

        std::fs::write(&path, r#"{ "last_data_update": 9223372036854775807 }"#).unwrap();
        assert!(FileMarkerStore::new(&path).load().await.is_none());
    }
}
