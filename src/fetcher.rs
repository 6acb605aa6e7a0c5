// src/fetcher.rs
//! Reads of the shared data document.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::{Client, Url};

use crate::error::{Result, SyncError};
use crate::snapshot::DataSnapshot;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Poll read. Any failure is logged and reported as "no update".
    async fn fetch_snapshot(&self) -> Option<DataSnapshot>;

    /// Read used before an admin merge; failures are returned to the caller.
    async fn fetch_current(&self) -> Result<DataSnapshot>;

    fn name(&self) -> &'static str;
}

/// GETs the configured URL over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    url: Url,
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|_| SyncError::InvalidUrl(url.to_string()))?;
        Ok(Self {
            url,
            client: Client::new(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Configured URL plus `t=<epoch ms>` so intermediaries can't serve a
    /// stale copy.
    pub fn cache_busted_url(&self, epoch_ms: i64) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("t", &epoch_ms.to_string());
        url
    }

    async fn get_snapshot(&self, url: Url) -> Result<DataSnapshot> {
        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        Ok(DataSnapshot::from_slice(&body)?)
    }
}

#[async_trait]
impl SnapshotSource for HttpFetcher {
    async fn fetch_snapshot(&self) -> Option<DataSnapshot> {
        let url = self.cache_busted_url(chrono::Utc::now().timestamp_millis());
        match self.get_snapshot(url).await {
            Ok(snap) => Some(snap),
            Err(e) => {
                tracing::warn!(target: "fetch", error = %e, url = %self.url, "update check failed");
                counter!("live_fetch_failures_total").increment(1);
                None
            }
        }
    }

    async fn fetch_current(&self) -> Result<DataSnapshot> {
        self.get_snapshot(self.url.clone())
            .await
            .map_err(|e| SyncError::RemoteRead(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// In-process source holding a swappable document. `None` behaves like an
/// unreachable host.
#[derive(Debug, Default)]
pub struct StaticSource {
    current: Mutex<Option<DataSnapshot>>,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub fn new(snapshot: DataSnapshot) -> Self {
        Self {
            current: Mutex::new(Some(snapshot)),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn set(&self, snapshot: Option<DataSnapshot>) {
        *self.current.lock().expect("source mutex poisoned") = snapshot;
    }

    /// Number of reads served or refused so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn read(&self) -> Option<DataSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.current.lock().expect("source mutex poisoned").clone()
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn fetch_snapshot(&self) -> Option<DataSnapshot> {
        self.read()
    }

    async fn fetch_current(&self) -> Result<DataSnapshot> {
        self.read()
            .ok_or_else(|| SyncError::RemoteRead("source offline".into()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
