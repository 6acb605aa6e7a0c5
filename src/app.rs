// src/app.rs
//! Wiring: one owned instance of every component, built from config.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::admin::{AdminPublisher, BlobIdStore, BlobStore, JsonBlobStore};
use crate::api::AppState;
use crate::config::SyncConfig;
use crate::fetcher::{HttpFetcher, SnapshotSource};
use crate::freshness::ChangeDetector;
use crate::notifier::BannerNotifier;
use crate::page::{Page, PageHandle};
use crate::poller::{Poller, PollerHandle};
use crate::reconcile::Reconciler;

pub struct LiveSync {
    pub page: PageHandle,
    pub reconciler: Arc<Reconciler>,
    pub notifier: Arc<BannerNotifier>,
    pub poller: Arc<Poller>,
    pub publisher: Arc<AdminPublisher>,
    admin_token: Option<String>,
}

impl LiveSync {
    /// Production wiring: HTTP fetcher and jsonblob store from `cfg`.
    pub async fn from_config(cfg: &SyncConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(&cfg.data_url)
            .with_context(|| format!("data_url {:?}", cfg.data_url))?
            .with_timeout(cfg.fetch_timeout());
        let store = JsonBlobStore::new(&cfg.blob_store_url)
            .with_context(|| format!("blob_store_url {:?}", cfg.blob_store_url))?
            .with_timeout(cfg.fetch_timeout());
        let detector = ChangeDetector::new(cfg.marker_store()).await;
        Ok(Self::with_parts(
            cfg,
            Arc::new(fetcher),
            Arc::new(store),
            detector,
        ))
    }

    /// Wiring with caller-supplied source, store and detector.
    pub fn with_parts(
        cfg: &SyncConfig,
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn BlobStore>,
        detector: ChangeDetector,
    ) -> Self {
        let page = PageHandle::new(Page::standard());
        let reconciler = Arc::new(Reconciler::new(Arc::new(page.clone())));
        let notifier = Arc::new(BannerNotifier::new(page.clone(), cfg.messages.clone()));

        let poller = Arc::new(Poller::new(
            source.clone(),
            detector,
            reconciler.clone(),
            notifier.clone(),
        ));
        let publisher = Arc::new(
            AdminPublisher::new(source, store, reconciler.clone(), notifier.clone())
                .with_blob_ids(BlobIdStore::new(&cfg.blob_id_path))
                .with_district(cfg.district.clone()),
        );

        Self {
            page,
            reconciler,
            notifier,
            poller,
            publisher,
            admin_token: cfg.admin_token.clone(),
        }
    }

    pub fn start(&self, cfg: &SyncConfig) -> PollerHandle {
        self.poller.clone().start(cfg.poll_interval())
    }

    /// State for the HTTP surface, bound to a running poller.
    pub fn app_state(&self, handle: &PollerHandle) -> AppState {
        AppState {
            page: self.page.clone(),
            publisher: self.publisher.clone(),
            checks: handle.requester(),
            admin_token: self.admin_token.clone(),
        }
    }
}
