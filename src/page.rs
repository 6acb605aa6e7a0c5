// src/page.rs
//! In-memory page: the regions the reconciler writes into plus the layer of
//! banners and toasts the notifier inserts.
//!
//! Time-limited effects (flash classes, banner auto-dismiss) carry a deadline
//! instead of a timer; anything past its deadline is invisible in views and
//! dropped by [`PageHandle::expire_due`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;

/// Stable element ids the reconciler targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    Announcement,
    Prices,
    Services,
    Jobs,
}

impl Region {
    pub const ALL: [Region; 4] = [
        Region::Announcement,
        Region::Prices,
        Region::Services,
        Region::Jobs,
    ];

    pub fn element_id(self) -> &'static str {
        match self {
            Region::Announcement => "announcement-text",
            Region::Prices => "prices-table-body",
            Region::Services => "services-grid",
            Region::Jobs => "jobs-list",
        }
    }
}

/// One rendered child of a list region (table row, grid card, list item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub classes: Vec<String>,
    pub html: String,
}

/// A single page mutation. Produced by `reconcile::plan`, applied by a
/// [`PageSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    SetText {
        region: Region,
        text: String,
    },
    /// Add `class` to the region element, removed again after `hold`.
    FlashClass {
        region: Region,
        class: &'static str,
        hold: Duration,
    },
    /// Full overwrite of the region's children.
    ReplaceRows {
        region: Region,
        rows: Vec<Row>,
    },
    /// Insert before the first child; optionally highlight the new row.
    PrependRow {
        region: Region,
        row: Row,
        highlight: Option<(&'static str, Duration)>,
    },
}

impl Patch {
    pub fn region(&self) -> Region {
        match self {
            Patch::SetText { region, .. }
            | Patch::FlashClass { region, .. }
            | Patch::ReplaceRows { region, .. }
            | Patch::PrependRow { region, .. } => *region,
        }
    }
}

/// Anything that can take a patch list. The page handle is the production
/// sink; tests substitute recorders.
pub trait PageSink: Send + Sync {
    fn apply(&self, patches: &[Patch], now: Instant);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "level")]
pub enum NotificationKind {
    UpdateBanner,
    Toast(ToastLevel),
}

#[derive(Debug, Clone)]
struct Transient {
    class: String,
    until: Instant,
}

#[derive(Debug, Clone)]
struct RowState {
    row: Row,
    transient: Vec<Transient>,
}

#[derive(Debug, Clone, Default)]
struct RegionState {
    text: Option<String>,
    rows: Vec<RowState>,
    transient: Vec<Transient>,
}

#[derive(Debug, Clone)]
struct Notification {
    id: u64,
    kind: NotificationKind,
    message: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct Page {
    regions: BTreeMap<Region, RegionState>,
    notifications: Vec<Notification>,
    next_id: u64,
}

impl Page {
    /// Page with every known region present.
    pub fn standard() -> Self {
        Self::with_regions(&Region::ALL)
    }

    /// Page carrying only `regions`; patches for other regions are ignored.
    pub fn with_regions(regions: &[Region]) -> Self {
        Self {
            regions: regions
                .iter()
                .map(|r| (*r, RegionState::default()))
                .collect(),
            ..Default::default()
        }
    }

    fn apply_one(&mut self, patch: &Patch, now: Instant) {
        let Some(state) = self.regions.get_mut(&patch.region()) else {
            tracing::trace!(
                target: "reconcile",
                element = patch.region().element_id(),
                "region not on page; patch ignored"
            );
            return;
        };
        match patch {
            Patch::SetText { text, .. } => state.text = Some(text.clone()),
            Patch::FlashClass { class, hold, .. } => {
                state.transient.retain(|t| t.class != *class);
                state.transient.push(Transient {
                    class: (*class).to_string(),
                    until: now + *hold,
                });
            }
            Patch::ReplaceRows { rows, .. } => {
                state.rows = rows
                    .iter()
                    .cloned()
                    .map(|row| RowState {
                        row,
                        transient: Vec::new(),
                    })
                    .collect();
            }
            Patch::PrependRow { row, highlight, .. } => {
                let transient = highlight
                    .iter()
                    .map(|(class, hold)| Transient {
                        class: (*class).to_string(),
                        until: now + *hold,
                    })
                    .collect();
                state.rows.insert(
                    0,
                    RowState {
                        row: row.clone(),
                        transient,
                    },
                );
            }
        }
    }

    fn push_notification(
        &mut self,
        kind: NotificationKind,
        message: String,
        now: Instant,
        ttl: Duration,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.notifications.push(Notification {
            id,
            kind,
            message,
            expires_at: now + ttl,
        });
        id
    }

    fn expire_due(&mut self, now: Instant) {
        for state in self.regions.values_mut() {
            state.transient.retain(|t| t.until > now);
            for row in &mut state.rows {
                row.transient.retain(|t| t.until > now);
            }
        }
        self.notifications.retain(|n| n.expires_at > now);
    }

    fn view(&self, now: Instant) -> PageView {
        let live = |ts: &[Transient]| {
            ts.iter()
                .filter(|t| t.until > now)
                .map(|t| t.class.clone())
                .collect::<Vec<_>>()
        };
        let regions = self
            .regions
            .iter()
            .map(|(region, state)| {
                let rows = state
                    .rows
                    .iter()
                    .map(|r| {
                        let mut classes = r.row.classes.clone();
                        classes.extend(live(&r.transient));
                        Row {
                            classes,
                            html: r.row.html.clone(),
                        }
                    })
                    .collect();
                (
                    region.element_id(),
                    RegionView {
                        text: state.text.clone(),
                        classes: live(&state.transient),
                        rows,
                    },
                )
            })
            .collect();
        let notifications = self
            .notifications
            .iter()
            .filter(|n| n.expires_at > now)
            .map(|n| NotificationView {
                id: n.id,
                kind: n.kind,
                message: n.message.clone(),
            })
            .collect();
        PageView {
            regions,
            notifications,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionView {
    pub text: Option<String>,
    pub classes: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationView {
    pub id: u64,
    pub kind: NotificationKind,
    pub message: String,
}

/// What a reader would see at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    pub regions: BTreeMap<&'static str, RegionView>,
    pub notifications: Vec<NotificationView>,
}

impl PageView {
    pub fn region(&self, region: Region) -> Option<&RegionView> {
        self.regions.get(region.element_id())
    }

    pub fn banners(&self) -> impl Iterator<Item = &NotificationView> {
        self.notifications
            .iter()
            .filter(|n| n.kind == NotificationKind::UpdateBanner)
    }

    pub fn toasts(&self) -> impl Iterator<Item = &NotificationView> {
        self.notifications
            .iter()
            .filter(|n| matches!(n.kind, NotificationKind::Toast(_)))
    }
}

/// Shared handle to the page.
#[derive(Debug, Clone)]
pub struct PageHandle {
    inner: Arc<Mutex<Page>>,
}

impl PageHandle {
    pub fn new(page: Page) -> Self {
        Self {
            inner: Arc::new(Mutex::new(page)),
        }
    }

    pub fn view(&self, now: Instant) -> PageView {
        self.inner.lock().expect("page mutex poisoned").view(now)
    }

    pub fn expire_due(&self, now: Instant) {
        self.inner.lock().expect("page mutex poisoned").expire_due(now);
    }

    pub fn push_notification(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
        now: Instant,
        ttl: Duration,
    ) -> u64 {
        self.inner
            .lock()
            .expect("page mutex poisoned")
            .push_notification(kind, message.into(), now, ttl)
    }

    /// Explicit close by the reader. Returns false if already gone.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut page = self.inner.lock().expect("page mutex poisoned");
        let before = page.notifications.len();
        page.notifications.retain(|n| n.id != id);
        page.notifications.len() != before
    }

    /// Periodically drop expired flashes and notifications.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let page = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                page.expire_due(tokio::time::Instant::now().into_std());
            }
        })
    }
}

impl PageSink for PageHandle {
    fn apply(&self, patches: &[Patch], now: Instant) {
        let mut page = self.inner.lock().expect("page mutex poisoned");
        for p in patches {
            page.apply_one(p, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(html: &str) -> Row {
        Row {
            classes: vec![],
            html: html.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_notifications() {
        let page = PageHandle::new(Page::standard());
        let now = tokio::time::Instant::now().into_std();
        page.push_notification(
            NotificationKind::UpdateBanner,
            "New data available",
            now,
            Duration::from_secs(5),
        );
        let sweeper = page.spawn_sweeper(Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(page.inner.lock().unwrap().notifications.len(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(page.inner.lock().unwrap().notifications.is_empty());
        sweeper.abort();
    }

    #[test]
    fn flash_class_expires_after_hold() {
        let page = PageHandle::new(Page::standard());
        let t0 = Instant::now();
        page.apply(
            &[
                Patch::SetText {
                    region: Region::Announcement,
                    text: "Water supply off".into(),
                },
                Patch::FlashClass {
                    region: Region::Announcement,
                    class: "updated",
                    hold: Duration::from_secs(2),
                },
            ],
            t0,
        );
        let v = page.view(t0 + Duration::from_millis(1999));
        let ann = v.region(Region::Announcement).unwrap();
        assert_eq!(ann.text.as_deref(), Some("Water supply off"));
        assert_eq!(ann.classes, vec!["updated".to_string()]);

        let later = page.view(t0 + Duration::from_secs(2));
        assert!(later.region(Region::Announcement).unwrap().classes.is_empty());
    }

    #[test]
    fn missing_region_is_ignored() {
        let page = PageHandle::new(Page::with_regions(&[Region::Prices]));
        let t0 = Instant::now();
        page.apply(
            &[Patch::SetText {
                region: Region::Announcement,
                text: "ignored".into(),
            }],
            t0,
        );
        let v = page.view(t0);
        assert!(v.region(Region::Announcement).is_none());
        assert_eq!(v.regions.len(), 1);
    }

    #[test]
    fn prepend_keeps_existing_rows_and_highlights_new_one() {
        let page = PageHandle::new(Page::standard());
        let t0 = Instant::now();
        page.apply(
            &[Patch::ReplaceRows {
                region: Region::Prices,
                rows: vec![row("a"), row("b")],
            }],
            t0,
        );
        page.apply(
            &[Patch::PrependRow {
                region: Region::Prices,
                row: row("new"),
                highlight: Some(("new-update", Duration::from_secs(3))),
            }],
            t0,
        );
        let v = page.view(t0 + Duration::from_secs(1));
        let rows = &v.region(Region::Prices).unwrap().rows;
        assert_eq!(
            rows.iter().map(|r| r.html.as_str()).collect::<Vec<_>>(),
            vec!["new", "a", "b"]
        );
        assert_eq!(rows[0].classes, vec!["new-update".to_string()]);

        page.expire_due(t0 + Duration::from_secs(3));
        let v = page.view(t0 + Duration::from_secs(3));
        assert!(v.region(Region::Prices).unwrap().rows[0].classes.is_empty());
    }

    #[test]
    fn notifications_expire_or_dismiss_whichever_first() {
        let page = PageHandle::new(Page::standard());
        let t0 = Instant::now();
        let ttl = Duration::from_secs(5);
        let a = page.push_notification(NotificationKind::UpdateBanner, "one", t0, ttl);
        let b = page.push_notification(NotificationKind::UpdateBanner, "two", t0, ttl);
        assert_eq!(page.view(t0).banners().count(), 2);

        assert!(page.dismiss(a));
        assert!(!page.dismiss(a));
        let v = page.view(t0 + Duration::from_secs(1));
        assert_eq!(v.banners().map(|n| n.id).collect::<Vec<_>>(), vec![b]);

        assert_eq!(page.view(t0 + ttl).banners().count(), 0);
    }
}
