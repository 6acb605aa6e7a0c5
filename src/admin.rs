// src/admin.rs
//! Admin publishing: read the shared document, merge a new record in, and try
//! to persist the result to an external JSON-blob store.
//!
//! Persistence is best-effort. The local page is updated optimistically once
//! the merge succeeds, whether or not the remote write does; a failed write is
//! reported with a toast but never rolled back locally.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use metrics::counter;
use reqwest::{header, Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::fs;

use crate::error::{Result, SyncError};
use crate::fetcher::SnapshotSource;
use crate::notifier::Notifier;
use crate::page::ToastLevel;
use crate::reconcile::Reconciler;
use crate::snapshot::{iso_millis, DataSnapshot, PriceRecord, ANNOUNCEMENTS, PRICES};

/// Records kept per category after a merge.
pub const CATEGORY_CAP: usize = 20;
pub const DEFAULT_BLOB_ENDPOINT: &str = "https://jsonblob.com/api/jsonBlob";
pub const DEFAULT_BLOB_ID_PATH: &str = "state/data_blob_id";

/// Who is submitting. Produced by whatever authenticates the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminSession {
    pub is_admin: bool,
    pub user_name: Option<String>,
}

impl AdminSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn admin(user_name: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            user_name: Some(user_name.into()),
        }
    }
}

/// Insert `record` (stamped with `timestamp`) at the front of `category`,
/// keep the newest [`CATEGORY_CAP`] records, and stamp the document.
pub fn merge_record(
    doc: &mut DataSnapshot,
    category: &str,
    mut record: Map<String, Value>,
    now: DateTime<Utc>,
) {
    record.insert("timestamp".to_string(), Value::String(iso_millis(now)));
    let items = doc.data.category_mut(category);
    items.insert(0, Value::Object(record));
    items.truncate(CATEGORY_CAP);
    doc.stamp(now);
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist the full document; returns the store's identifier for it.
    async fn save(&self, document: &DataSnapshot) -> Result<String>;
}

/// POSTs documents to a jsonblob-style endpoint.
#[derive(Debug, Clone)]
pub struct JsonBlobStore {
    endpoint: Url,
    client: Client,
    timeout: Duration,
}

impl JsonBlobStore {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| SyncError::InvalidUrl(endpoint.to_string()))?;
        Ok(Self {
            endpoint,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl BlobStore for JsonBlobStore {
    async fn save(&self, document: &DataSnapshot) -> Result<String> {
        let body = serde_json::to_vec_pretty(document)?;
        let resp = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::RemoteWrite(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::RemoteWrite(format!("HTTP {status}")));
        }

        // jsonblob reports the new blob in `Location`; fall back to the body.
        let from_location = resp
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if let Some(id) = from_location {
            return Ok(id);
        }
        let text = resp
            .text()
            .await
            .map_err(|e| SyncError::RemoteWrite(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

/// Remembers the last blob id the store handed back.
#[derive(Debug, Clone)]
pub struct BlobIdStore {
    path: PathBuf,
}

impl BlobIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub async fn save(&self, id: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&self.path, id).await
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnouncementForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceForm {
    #[serde(default)]
    pub crop: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub market: String,
}

/// Result of a push that got as far as the write attempt.
#[derive(Debug, Clone)]
pub struct PushReceipt {
    pub category: String,
    /// Document as merged and sent.
    pub document: DataSnapshot,
    /// `Some` when the store accepted the write.
    pub blob_id: Option<String>,
}

impl PushReceipt {
    pub fn persisted(&self) -> bool {
        self.blob_id.is_some()
    }
}

pub struct AdminPublisher {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn BlobStore>,
    blob_ids: Option<BlobIdStore>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn Notifier>,
    district: String,
}

impl AdminPublisher {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn BlobStore>,
        reconciler: Arc<Reconciler>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            store,
            blob_ids: None,
            reconciler,
            notifier,
            district: String::new(),
        }
    }

    pub fn with_blob_ids(mut self, ids: BlobIdStore) -> Self {
        self.blob_ids = Some(ids);
        self
    }

    pub fn with_district(mut self, district: impl Into<String>) -> Self {
        self.district = district.into();
        self
    }

    fn toast(&self, level: ToastLevel, message: &str) {
        self.notifier.toast(level, message, Instant::now());
    }

    /// Authorize, read, merge, and attempt to persist. Returns `Ok` once the
    /// write was attempted, even if it failed (see [`PushReceipt::persisted`]).
    pub async fn push(
        &self,
        session: &AdminSession,
        category: &str,
        record: Map<String, Value>,
    ) -> Result<PushReceipt> {
        if !session.is_admin {
            counter!("live_admin_pushes_total", "outcome" => "unauthorized").increment(1);
            self.toast(ToastLevel::Error, &self.notifier.messages().login_required);
            return Err(SyncError::Unauthorized);
        }

        let mut doc = match self.source.fetch_current().await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(target: "admin", error = %e, category, "read before merge failed");
                counter!("live_admin_pushes_total", "outcome" => "read_failed").increment(1);
                self.toast(ToastLevel::Error, &self.notifier.messages().save_failed);
                return Err(e);
            }
        };

        merge_record(&mut doc, category, record, Utc::now());
        self.toast(ToastLevel::Info, &self.notifier.messages().saving);

        let blob_id = match self.store.save(&doc).await {
            Ok(id) => {
                if let Some(ids) = &self.blob_ids {
                    if let Err(e) = ids.save(&id).await {
                        tracing::warn!(target: "admin", error = %e, "store blob id");
                    }
                }
                tracing::info!(target: "admin", category, blob_id = %id, "update published");
                counter!("live_admin_pushes_total", "outcome" => "persisted").increment(1);
                self.toast(ToastLevel::Success, &self.notifier.messages().saved);
                Some(id)
            }
            Err(e) => {
                tracing::error!(target: "admin", error = %e, category, "remote write failed; local view diverges");
                counter!("live_admin_pushes_total", "outcome" => "write_failed").increment(1);
                self.toast(ToastLevel::Error, &self.notifier.messages().save_failed);
                None
            }
        };

        Ok(PushReceipt {
            category: category.to_string(),
            document: doc,
            blob_id,
        })
    }

    /// Announcement form handler. Title and text are both required.
    pub async fn submit_announcement(
        &self,
        session: &AdminSession,
        form: AnnouncementForm,
    ) -> Result<PushReceipt> {
        let title = form.title.trim();
        let text = form.text.trim();
        if title.is_empty() || text.is_empty() {
            self.toast(ToastLevel::Error, &self.notifier.messages().announcement_fields_required);
            return Err(SyncError::InvalidForm("title and text are required"));
        }

        let author = session
            .user_name
            .clone()
            .unwrap_or_else(|| self.notifier.messages().default_author.clone());
        let mut record = Map::new();
        record.insert("title".into(), title.into());
        record.insert("text".into(), text.into());
        record.insert("date".into(), local_date().into());
        record.insert("author".into(), author.into());

        let receipt = self.push(session, ANNOUNCEMENTS, record).await?;
        self.reconciler.echo_announcement(text, Instant::now());
        Ok(receipt)
    }

    /// Price form handler. Crop and price are required; an empty market
    /// defaults to the district market.
    pub async fn submit_price(&self, session: &AdminSession, form: PriceForm) -> Result<PushReceipt> {
        let crop = form.crop.trim();
        let price = form.price.trim();
        if crop.is_empty() || price.is_empty() {
            self.toast(ToastLevel::Error, &self.notifier.messages().price_fields_required);
            return Err(SyncError::InvalidForm("crop and price are required"));
        }
        let market = match form.market.trim() {
            "" => format!(
                "{} {}",
                self.district,
                self.notifier.messages().market_suffix
            )
            .trim()
            .to_string(),
            m => m.to_string(),
        };

        let price_rec = PriceRecord {
            crop: crop.to_string(),
            price: price.to_string(),
            market,
            date: local_date(),
            trend: Some("stable".to_string()),
            is_new: false,
        };
        let record = match serde_json::to_value(&price_rec)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let receipt = self.push(session, PRICES, record).await?;
        self.reconciler.insert_price_row(&price_rec, Instant::now());
        Ok(receipt)
    }
}

fn local_date() -> String {
    Local::now().format("%-d/%-m/%Y").to_string()
}
