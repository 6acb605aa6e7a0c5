// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::admin::{DEFAULT_BLOB_ENDPOINT, DEFAULT_BLOB_ID_PATH};
use crate::fetcher::DEFAULT_FETCH_TIMEOUT;
use crate::freshness::{FileMarkerStore, MarkerStore, MemoryMarkerStore, DEFAULT_MARKER_PATH};
use crate::notifier::Messages;
use crate::poller::DEFAULT_POLL_INTERVAL;

pub const ENV_CONFIG_PATH: &str = "LIVE_SYNC_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/live_sync.toml";
pub const DEFAULT_DATA_URL: &str = "https://abhishek200215.github.io/villagesite/data.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Shared data document polled for updates.
    pub data_url: String,
    pub poll_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    /// File holding the last applied marker. `None` keeps it in memory only.
    pub marker_path: Option<String>,
    pub blob_store_url: String,
    pub blob_id_path: String,
    /// Bearer token that grants an admin session on the HTTP surface.
    pub admin_token: Option<String>,
    /// Used for the default market name on price submissions.
    pub district: String,
    pub bind_addr: String,
    pub messages: Messages,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_url: DEFAULT_DATA_URL.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            marker_path: Some(DEFAULT_MARKER_PATH.to_string()),
            blob_store_url: DEFAULT_BLOB_ENDPOINT.to_string(),
            blob_id_path: DEFAULT_BLOB_ID_PATH.to_string(),
            admin_token: None,
            district: String::new(),
            bind_addr: "127.0.0.1:8000".to_string(),
            messages: Messages::default(),
        }
    }
}

impl SyncConfig {
    /// Load from an explicit TOML file, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading live sync config from {}", path.display()))?;
        let mut cfg: SyncConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $LIVE_SYNC_CONFIG_PATH
    /// 2) config/live_sync.toml
    /// 3) built-in defaults
    ///
    /// Env overrides apply in every case.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().map(|v| v.trim().to_string())
        }

        if let Some(v) = var("LIVE_DATA_URL").filter(|v| !v.is_empty()) {
            self.data_url = v;
        }
        if let Some(v) = var("CHECK_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.poll_interval_secs = v;
        }
        if let Some(v) = var("FETCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = var("MARKER_PATH") {
            // "" or "memory" disables persistence
            self.marker_path = match v.as_str() {
                "" | "memory" => None,
                _ => Some(v),
            };
        }
        if let Some(v) = var("BLOB_STORE_URL").filter(|v| !v.is_empty()) {
            self.blob_store_url = v;
        }
        if let Some(v) = var("ADMIN_TOKEN").filter(|v| !v.is_empty()) {
            self.admin_token = Some(v);
        }
        if let Some(v) = var("DISTRICT") {
            self.district = v;
        }
        if let Some(v) = var("BIND_ADDR").filter(|v| !v.is_empty()) {
            self.bind_addr = v;
        }
    }

    fn sanitize(&mut self) {
        if self.poll_interval_secs == 0 {
            self.poll_interval_secs = DEFAULT_POLL_INTERVAL.as_secs();
        }
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = DEFAULT_FETCH_TIMEOUT.as_secs();
        }
        if self
            .admin_token
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            self.admin_token = None;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn marker_store(&self) -> Box<dyn MarkerStore> {
        match &self.marker_path {
            Some(p) => Box::new(FileMarkerStore::new(p)),
            None => Box::new(MemoryMarkerStore::default()),
        }
    }
}
