// src/poller.rs
//! Poll loop: a fixed-interval timer plus external triggers (page visible
//! again, network back online), all funnelled into [`Poller::check_now`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::fetcher::SnapshotSource;
use crate::freshness::{ChangeDetector, Detection, FreshnessMarker};
use crate::notifier::Notifier;
use crate::reconcile::Reconciler;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("live_checks_total", "Update checks started, by trigger.");
        describe_counter!(
            "live_checks_skipped_total",
            "Checks skipped because another was still in flight."
        );
        describe_counter!(
            "live_fetch_failures_total",
            "Poll reads that failed (network, status, parse)."
        );
        describe_counter!(
            "live_reconciliations_total",
            "Snapshots applied to the page."
        );
        describe_counter!(
            "live_callback_failures_total",
            "Subscriber callbacks that errored or panicked."
        );
        describe_counter!("live_admin_pushes_total", "Admin pushes, by outcome.");
        describe_gauge!(
            "live_last_marker_ms",
            "Freshness marker (epoch ms) of the last applied snapshot."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckTrigger {
    Startup,
    Interval,
    VisibilityRegained,
    Online,
    Manual,
}

impl CheckTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckTrigger::Startup => "startup",
            CheckTrigger::Interval => "interval",
            CheckTrigger::VisibilityRegained => "visibility",
            CheckTrigger::Online => "online",
            CheckTrigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Newer data reconciled and announced.
    Applied(FreshnessMarker),
    /// Fetched fine, nothing newer.
    Unchanged,
    /// Fetch failed; try again next cycle.
    NoData,
    /// Another check was still outstanding.
    Skipped,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Poller {
    source: Arc<dyn SnapshotSource>,
    detector: Mutex<ChangeDetector>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn Notifier>,
    in_flight: AtomicBool,
}

impl Poller {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        detector: ChangeDetector,
        reconciler: Arc<Reconciler>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            detector: Mutex::new(detector),
            reconciler,
            notifier,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub async fn last_seen(&self) -> Option<FreshnessMarker> {
        self.detector.lock().await.last_seen()
    }

    /// One fetch → detect → reconcile cycle. Overlapping calls are skipped.
    pub async fn check_now(&self, trigger: CheckTrigger) -> CheckOutcome {
        ensure_metrics_described();

        if self.in_flight.swap(true, Ordering::AcqRel) {
            counter!("live_checks_skipped_total").increment(1);
            tracing::debug!(target: "poller", trigger = trigger.as_str(), "check already in flight; skipping");
            return CheckOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);
        counter!("live_checks_total", "trigger" => trigger.as_str()).increment(1);

        let Some(snapshot) = self.source.fetch_snapshot().await else {
            return CheckOutcome::NoData;
        };

        let detection = self.detector.lock().await.observe(&snapshot).await;

        match detection {
            Detection::Newer(marker) => {
                let now = Instant::now();
                let report = self.reconciler.apply(&snapshot.data, now);
                self.notifier.update_applied(now);

                counter!("live_reconciliations_total").increment(1);
                gauge!("live_last_marker_ms").set(marker.millis() as f64);
                tracing::info!(
                    target: "poller",
                    trigger = trigger.as_str(),
                    source = self.source.name(),
                    %marker,
                    patches = report.patches,
                    callback_failures = report.callback_failures,
                    "applied newer data"
                );
                CheckOutcome::Applied(marker)
            }
            Detection::NotNewer { seen, last } => {
                tracing::trace!(target: "poller", %seen, %last, "no change");
                CheckOutcome::Unchanged
            }
            Detection::Unparsable => CheckOutcome::Unchanged,
        }
    }

    /// Spawn the schedule: an immediate check, then one every `interval`, plus
    /// whatever triggers arrive through the returned handle.
    pub fn start(self: Arc<Self>, interval: Duration) -> PollerHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<CheckTrigger>();
        tracing::info!(target: "poller", interval_secs = interval.as_secs(), "starting live update checks");

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut first = true;
            loop {
                let trigger = tokio::select! {
                    _ = ticker.tick() => {
                        if std::mem::take(&mut first) {
                            CheckTrigger::Startup
                        } else {
                            CheckTrigger::Interval
                        }
                    }
                    Some(t) = rx.recv() => t,
                };
                // Each check runs on its own task so a slow fetch never
                // delays the schedule; the in-flight guard drops overlaps.
                let poller = self.clone();
                tokio::spawn(async move {
                    poller.check_now(trigger).await;
                });
            }
        });

        PollerHandle {
            requester: CheckRequester { tx },
            task,
        }
    }
}

/// Cloneable way to ask the running poller for a check.
#[derive(Debug, Clone)]
pub struct CheckRequester {
    tx: mpsc::UnboundedSender<CheckTrigger>,
}

impl CheckRequester {
    /// Returns false once the poller has been stopped.
    pub fn request(&self, trigger: CheckTrigger) -> bool {
        self.tx.send(trigger).is_ok()
    }

    /// Re-check only when the page became visible again.
    pub fn visibility_changed(&self, hidden: bool) -> bool {
        if hidden {
            return false;
        }
        self.request(CheckTrigger::VisibilityRegained)
    }

    pub fn online(&self) -> bool {
        self.request(CheckTrigger::Online)
    }
}

/// Running schedule. Dropping the handle leaves the schedule running for the
/// rest of the process; call [`PollerHandle::stop`] to end it.
#[derive(Debug)]
pub struct PollerHandle {
    requester: CheckRequester,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn requester(&self) -> CheckRequester {
        self.requester.clone()
    }

    pub fn trigger(&self, trigger: CheckTrigger) -> bool {
        self.requester.request(trigger)
    }

    pub fn visibility_changed(&self, hidden: bool) -> bool {
        self.requester.visibility_changed(hidden)
    }

    pub fn stop(self) {
        self.task.abort();
        tracing::info!(target: "poller", "live update checks stopped");
    }
}
