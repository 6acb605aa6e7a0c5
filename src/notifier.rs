// src/notifier.rs
//! User-facing notices: the "new data" banner after each reconciliation and
//! the toasts used by the admin flows.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::page::{NotificationKind, PageHandle, ToastLevel};

/// Auto-dismiss delay for banners and toasts.
pub const NOTICE_TTL: Duration = Duration::from_secs(5);

/// Localized strings shown to readers and admins. Defaults are Kannada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub update_applied: String,
    pub login_required: String,
    pub saving: String,
    pub saved: String,
    pub save_failed: String,
    pub announcement_fields_required: String,
    pub price_fields_required: String,
    pub default_author: String,
    /// Appended to the district name when a price form leaves market empty.
    pub market_suffix: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            update_applied: "ಹೊಸ ಮಾಹಿತಿ ನವೀಕರಿಸಲಾಗಿದೆ!".into(),
            login_required: "ನಿರ್ವಾಹಕರಾಗಿ ಲಾಗಿನ್ ಆಗಿ".into(),
            saving: "ನವೀಕರಣ ಸಂಗ್ರಹಿಸಲಾಗುತ್ತಿದೆ...".into(),
            saved: "ನವೀಕರಿಸಲಾಗಿದೆ! ಎಲ್ಲರಿಗೂ ತೋರಿಸಲಾಗುತ್ತಿದೆ...".into(),
            save_failed: "ನವೀಕರಣ ವಿಫಲವಾಗಿದೆ".into(),
            announcement_fields_required: "ಶೀರ್ಷಿಕೆ ಮತ್ತು ವಿವರಣೆ ಅಗತ್ಯ".into(),
            price_fields_required: "ಬೆಳೆ ಮತ್ತು ಬೆಲೆ ಅಗತ್ಯ".into(),
            default_author: "ನಿರ್ವಾಹಕ".into(),
            market_suffix: "ಮಾರುಕಟ್ಟೆ".into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Announce that fresh data has been applied. Returns the notice id.
    fn update_applied(&self, now: Instant) -> u64;
    fn toast(&self, level: ToastLevel, message: &str, now: Instant) -> u64;
    fn messages(&self) -> &Messages;
}

/// Inserts notices into the page's notification layer. Overlapping banners
/// are allowed; each one expires on its own.
#[derive(Debug, Clone)]
pub struct BannerNotifier {
    page: PageHandle,
    messages: Messages,
    ttl: Duration,
}

impl BannerNotifier {
    pub fn new(page: PageHandle, messages: Messages) -> Self {
        Self {
            page,
            messages,
            ttl: NOTICE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Explicit close (click or close button).
    pub fn dismiss(&self, id: u64) -> bool {
        self.page.dismiss(id)
    }
}

impl Notifier for BannerNotifier {
    fn update_applied(&self, now: Instant) -> u64 {
        let id = self.page.push_notification(
            NotificationKind::UpdateBanner,
            self.messages.update_applied.clone(),
            now,
            self.ttl,
        );
        tracing::debug!(target: "notify", id, "update banner shown");
        id
    }

    fn toast(&self, level: ToastLevel, message: &str, now: Instant) -> u64 {
        tracing::debug!(target: "notify", ?level, text = message, "toast");
        self.page
            .push_notification(NotificationKind::Toast(level), message, now, self.ttl)
    }

    fn messages(&self) -> &Messages {
        &self.messages
    }
}
