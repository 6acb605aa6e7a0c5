// src/reconcile.rs
//! Reconciliation: turn a changed snapshot into page patches and subscriber
//! callbacks.
//!
//! [`plan`] is pure and decides *what* to render; the [`Reconciler`] owns the
//! subscriber list and hands the plan to a [`PageSink`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use html_escape::encode_text as esc;
use metrics::counter;

use crate::page::{PageSink, Patch, Region, Row};
use crate::snapshot::{JobRecord, PriceRecord, ServiceRecord, SnapshotData, Trend};

/// Full rebuilds show at most this many price rows.
pub const PRICE_ROW_LIMIT: usize = 10;
pub const ANNOUNCEMENT_FLASH: Duration = Duration::from_secs(2);
pub const NEW_ROW_HIGHLIGHT: Duration = Duration::from_secs(3);

/// Compute the patches for one reconciliation. Categories are independent;
/// absent or empty ones produce nothing.
pub fn plan(data: &SnapshotData) -> Vec<Patch> {
    let mut patches = Vec::new();

    if let Some(latest) = data.latest_announcement() {
        patches.push(Patch::SetText {
            region: Region::Announcement,
            text: latest.display_text().to_string(),
        });
        patches.push(Patch::FlashClass {
            region: Region::Announcement,
            class: "updated",
            hold: ANNOUNCEMENT_FLASH,
        });
    }

    if let Some(prices) = data.prices() {
        patches.push(Patch::ReplaceRows {
            region: Region::Prices,
            rows: prices
                .iter()
                .take(PRICE_ROW_LIMIT)
                .map(|p| price_row(p, p.trend()))
                .collect(),
        });
    }

    if let Some(services) = data.services() {
        patches.push(Patch::ReplaceRows {
            region: Region::Services,
            rows: services.iter().map(service_card).collect(),
        });
    }

    if let Some(jobs) = data.jobs() {
        patches.push(Patch::ReplaceRows {
            region: Region::Jobs,
            rows: jobs.iter().map(job_item).collect(),
        });
    }

    patches
}

/// Render a price table row with the given trend indicator.
pub fn price_row(p: &PriceRecord, trend: Trend) -> Row {
    let html = format!(
        "<td><strong>{}</strong></td>\
         <td><span class=\"price-value\">{}</span></td>\
         <td>{}</td>\
         <td><span class=\"{}\"><i class=\"fas fa-{}\"></i> {}</span></td>\
         <td>{}</td>",
        esc(&p.crop),
        esc(&p.price),
        esc(&p.market),
        trend.css_class(),
        trend.icon(),
        trend.label(),
        esc(&p.date),
    );
    let classes = if p.is_new {
        vec!["new-price".to_string()]
    } else {
        Vec::new()
    };
    Row { classes, html }
}

fn service_card(s: &ServiceRecord) -> Row {
    Row {
        classes: vec!["service-card".to_string()],
        html: format!(
            "<i class=\"fas fa-{}\"></i><h4>{}</h4><p>{}</p><span class=\"service-contact\">{}</span>",
            esc(&s.icon),
            esc(&s.name),
            esc(&s.description),
            esc(&s.contact),
        ),
    }
}

fn job_item(j: &JobRecord) -> Row {
    Row {
        classes: vec!["job-item".to_string()],
        html: format!(
            "<strong>{}</strong><p>{}</p><span class=\"job-contact\">{}</span><small>{}</small>",
            esc(&j.title),
            esc(&j.description),
            esc(&j.contact),
            esc(&j.date),
        ),
    }
}

/// Subscriber invoked with the full category-keyed data on every
/// reconciliation.
pub type UpdateCallback = dyn Fn(&SnapshotData) -> anyhow::Result<()> + Send + Sync;

type SubscriberList = Mutex<Vec<(u64, Arc<UpdateCallback>)>>;

/// Revocation handle returned by [`Reconciler::subscribe`]. Dropping it keeps
/// the subscription alive.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    list: Weak<SubscriberList>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(list) = self.list.upgrade() {
            list.lock()
                .expect("subscriber mutex poisoned")
                .retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub patches: usize,
    pub callbacks_run: usize,
    pub callback_failures: usize,
}

pub struct Reconciler {
    sink: Arc<dyn PageSink>,
    subscribers: Arc<SubscriberList>,
    next_id: AtomicU64,
}

impl Reconciler {
    pub fn new(sink: Arc<dyn PageSink>) -> Self {
        Self {
            sink,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SnapshotData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Arc<UpdateCallback> = Arc::new(callback);
        self.subscribers
            .lock()
            .expect("subscriber mutex poisoned")
            .push((id, callback));
        Subscription {
            id,
            list: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber mutex poisoned")
            .len()
    }

    /// Run every subscriber, then patch the page. A failing or panicking
    /// subscriber is logged and skipped.
    pub fn apply(&self, data: &SnapshotData, now: Instant) -> ReconcileReport {
        // Clone out so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<(u64, Arc<UpdateCallback>)> = self
            .subscribers
            .lock()
            .expect("subscriber mutex poisoned")
            .clone();

        let mut report = ReconcileReport::default();
        for (id, cb) in callbacks {
            report.callbacks_run += 1;
            match catch_unwind(AssertUnwindSafe(|| cb(data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.callback_failures += 1;
                    tracing::error!(target: "reconcile", subscriber = id, error = ?e, "callback error");
                }
                Err(_) => {
                    report.callback_failures += 1;
                    tracing::error!(target: "reconcile", subscriber = id, "callback panicked");
                }
            }
        }
        if report.callback_failures > 0 {
            counter!("live_callback_failures_total").increment(report.callback_failures as u64);
        }

        let patches = plan(data);
        report.patches = patches.len();
        self.sink.apply(&patches, now);
        report
    }

    /// Optimistic insert after an admin price push: one row at the top,
    /// highlighted briefly, without rebuilding the table.
    pub fn insert_price_row(&self, record: &PriceRecord, now: Instant) {
        let patch = Patch::PrependRow {
            region: Region::Prices,
            row: price_row(record, Trend::New),
            highlight: Some(("new-update", NEW_ROW_HIGHLIGHT)),
        };
        self.sink.apply(std::slice::from_ref(&patch), now);
    }

    /// Optimistic echo after an admin announcement push.
    pub fn echo_announcement(&self, text: &str, now: Instant) {
        let patch = Patch::SetText {
            region: Region::Announcement,
            text: text.to_string(),
        };
        self.sink.apply(std::slice::from_ref(&patch), now);
    }
}
