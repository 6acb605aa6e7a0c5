// src/snapshot.rs
//! Remote document model: the shared `data.json` and its record types.
//!
//! Categories are kept as raw JSON so that an admin read-modify-write never
//! drops fields this crate does not know about. Typed views are produced on
//! demand by the accessors on [`SnapshotData`].

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const ANNOUNCEMENTS: &str = "announcements";
pub const PRICES: &str = "prices";
pub const SERVICES: &str = "services";
pub const JOBS: &str = "jobs";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// Freshness marker as published: ISO-8601 string or numeric epoch.
    #[serde(default)]
    pub last_updated: Value,
    #[serde(default)]
    pub data: SnapshotData,
    /// Any other top-level keys, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataSnapshot {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Set `last_updated` to `now` in the same shape a browser's
    /// `toISOString()` produces.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.last_updated = Value::String(iso_millis(now));
    }
}

pub fn iso_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Category name -> ordered records (newest first).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotData(pub BTreeMap<String, Value>);

impl SnapshotData {
    pub fn get(&self, category: &str) -> Option<&Value> {
        self.0.get(category)
    }

    /// Typed records of a category. `None` when the category is absent, not an
    /// array, or has no record that decodes. Individual records that fail to
    /// decode are skipped.
    pub fn records<T: DeserializeOwned>(&self, category: &str) -> Option<Vec<T>> {
        let items = self.0.get(category)?.as_array()?;
        if items.is_empty() {
            return None;
        }
        let out = items
            .iter()
            .filter_map(|v| match T::deserialize(v) {
                Ok(rec) => Some(rec),
                Err(e) => {
                    tracing::debug!(target: "reconcile", category, error = %e, "skipping malformed record");
                    None
                }
            })
            .collect::<Vec<_>>();
        (!out.is_empty()).then_some(out)
    }

    /// The first record of a category, only if that record itself decodes.
    pub fn first_record<T: DeserializeOwned>(&self, category: &str) -> Option<T> {
        let first = self.0.get(category)?.as_array()?.first()?;
        T::deserialize(first)
            .map_err(|e| {
                tracing::debug!(target: "reconcile", category, error = %e, "first record is malformed");
            })
            .ok()
    }

    pub fn latest_announcement(&self) -> Option<AnnouncementRecord> {
        self.first_record(ANNOUNCEMENTS)
    }

    pub fn announcements(&self) -> Option<Vec<AnnouncementRecord>> {
        self.records(ANNOUNCEMENTS)
    }

    pub fn prices(&self) -> Option<Vec<PriceRecord>> {
        self.records(PRICES)
    }

    pub fn services(&self) -> Option<Vec<ServiceRecord>> {
        self.records(SERVICES)
    }

    pub fn jobs(&self) -> Option<Vec<JobRecord>> {
        self.records(JOBS)
    }

    /// Mutable record list for `category`, created (or reset, if it held a
    /// non-array value) as needed.
    pub fn category_mut(&mut self, category: &str) -> &mut Vec<Value> {
        let slot = self
            .0
            .entry(category.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        match slot {
            Value::Array(items) => items,
            _ => unreachable!("slot was just normalized to an array"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnouncementRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub text: String,
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub author: String,
}

impl AnnouncementRecord {
    /// Banner text: `text`, or `title` when `text` is empty.
    pub fn display_text(&self) -> &str {
        if self.text.is_empty() {
            &self.title
        } else {
            &self.text
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub crop: String,
    /// Displayed verbatim; the feed uses both strings and numbers.
    #[serde(deserialize_with = "lenient_string")]
    pub price: String,
    #[serde(deserialize_with = "lenient_string")]
    pub market: String,
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
    #[serde(rename = "isNew", skip_serializing_if = "std::ops::Not::not")]
    pub is_new: bool,
}

impl PriceRecord {
    pub fn trend(&self) -> Trend {
        Trend::parse(self.trend.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub contact: String,
    #[serde(deserialize_with = "lenient_string")]
    pub icon: String,
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            contact: String::new(),
            icon: "concierge-bell".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub contact: String,
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
}

/// Price movement shown next to each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trend {
    Up,
    Down,
    Stable,
    New,
}

impl Trend {
    /// Absent or unrecognized values fall back to `Stable`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("up") => Trend::Up,
            Some("down") => Trend::Down,
            Some("new") => Trend::New,
            _ => Trend::Stable,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
            Trend::New => "new",
        }
    }

    /// Font Awesome icon name.
    pub fn icon(self) -> &'static str {
        match self {
            Trend::Up => "arrow-up",
            Trend::Down => "arrow-down",
            Trend::Stable => "minus",
            Trend::New => "star",
        }
    }

    /// Kannada label.
    pub fn label(self) -> &'static str {
        match self {
            Trend::Up => "ಹೆಚ್ಚಳ",
            Trend::Down => "ಕಡಿಮೆ",
            Trend::Stable => "ಸ್ಥಿರ",
            Trend::New => "ಹೊಸದು",
        }
    }

    pub fn css_class(self) -> String {
        format!("trend-{}", self.as_str())
    }
}

/// Accept strings, numbers, bools and null for display fields.
fn lenient_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(de)?;
    Ok(match v {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_scenario_document() {
        let raw = json!({
            "last_updated": "2024-01-01T00:00:00Z",
            "data": { "prices": [ { "crop": "Rice", "price": "2000", "market": "X", "trend": "up" } ] }
        });
        let snap: DataSnapshot = serde_json::from_value(raw).unwrap();
        let prices = snap.data.prices().unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].crop, "Rice");
        assert_eq!(prices[0].trend(), Trend::Up);
        assert!(snap.data.announcements().is_none());
    }

    #[test]
    fn numeric_price_is_displayed_verbatim() {
        let rec: PriceRecord = serde_json::from_value(json!({ "crop": "Ragi", "price": 3150 })).unwrap();
        assert_eq!(rec.price, "3150");
        assert_eq!(rec.trend(), Trend::Stable);
    }

    #[test]
    fn unknown_trend_defaults_to_stable() {
        assert_eq!(Trend::parse(Some("sideways")), Trend::Stable);
        assert_eq!(Trend::parse(None), Trend::Stable);
        assert_eq!(Trend::parse(Some(" UP ")), Trend::Up);
        assert_eq!(Trend::New.icon(), "star");
        assert_eq!(Trend::Down.label(), "ಕಡಿಮೆ");
    }

    #[test]
    fn announcement_falls_back_to_title() {
        let a = AnnouncementRecord {
            title: "Gram Sabha".into(),
            ..Default::default()
        };
        assert_eq!(a.display_text(), "Gram Sabha");
    }

    #[test]
    fn empty_or_non_array_category_is_absent() {
        let data: SnapshotData =
            serde_json::from_value(json!({ "jobs": [], "services": "oops" })).unwrap();
        assert!(data.jobs().is_none());
        assert!(data.services().is_none());
    }

    #[test]
    fn category_with_no_decodable_record_is_absent() {
        let data: SnapshotData =
            serde_json::from_value(json!({ "prices": [ "Rice", 2000, null ] })).unwrap();
        assert!(data.prices().is_none());

        let mixed: SnapshotData =
            serde_json::from_value(json!({ "prices": [ "Rice", { "crop": "Ragi" } ] })).unwrap();
        assert_eq!(mixed.prices().unwrap().len(), 1);
    }

    #[test]
    fn latest_announcement_is_strictly_the_first_record() {
        let data: SnapshotData = serde_json::from_value(json!({
            "announcements": [ "stray string", { "text": "second" } ]
        }))
        .unwrap();
        assert!(data.latest_announcement().is_none());

        let ok: SnapshotData = serde_json::from_value(json!({
            "announcements": [ { "text": "first" }, { "text": "second" } ]
        }))
        .unwrap();
        assert_eq!(ok.latest_announcement().unwrap().text, "first");
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = json!({
            "last_updated": 1,
            "site": "village",
            "data": { "events": [ { "name": "fair" } ] }
        });
        let snap: DataSnapshot = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&snap).unwrap(), raw);
    }

    #[test]
    fn category_mut_resets_non_array_values() {
        let mut data: SnapshotData = serde_json::from_value(json!({ "jobs": 5 })).unwrap();
        data.category_mut(JOBS).push(json!({ "title": "Driver" }));
        assert_eq!(data.jobs().unwrap()[0].title, "Driver");
    }
}
