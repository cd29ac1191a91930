use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::feedback::Category;
use crate::ids::RoomId;

/// Per-value counts for one category and window.
///
/// Entries keep the order the store returned them in, which is the order of
/// each value's first occurrence inside the window. `mostly` tie-breaks on
/// that order, so it must survive serialization too.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueCounts(Vec<(String, u64)>);

impl ValueCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to a value's count, appending it if not seen yet.
    pub fn add(&mut self, value: impl Into<String>, n: u64) {
        let value = value.into();
        match self.0.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += n,
            None => self.0.push((value, n)),
        }
    }

    pub fn get(&self, value: &str) -> Option<u64> {
        self.0.iter().find(|(v, _)| v == value).map(|(_, n)| *n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(v, n)| (v.as_str(), *n))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|(_, n)| n).sum()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for ValueCounts {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut counts = Self::new();
        for (value, n) in iter {
            counts.add(value, n);
        }
        counts
    }
}

impl Serialize for ValueCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (value, n) in &self.0 {
            map.serialize_entry(value, n)?;
        }
        map.end()
    }
}

/// Rolling-window summary of one category.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CategoryAggregate {
    pub mostly: Option<String>,
    #[serde(rename = "last5m")]
    pub counts_5m: ValueCounts,
    #[serde(rename = "last30m")]
    pub counts_30m: ValueCounts,
    pub heat: f64,
}

impl CategoryAggregate {
    pub fn empty() -> Self {
        Self {
            mostly: None,
            counts_5m: ValueCounts::new(),
            counts_30m: ValueCounts::new(),
            heat: 0.0,
        }
    }
}

/// Aggregate pushed to subscribers as the `aggregate` event payload.
/// Derived from the event store on demand and never cached.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub room_id: RoomId,
    pub generated_at: DateTime<Utc>,
    pub by_category: BTreeMap<Category, CategoryAggregate>,
}

impl AggregateSnapshot {
    pub fn category(&self, category: Category) -> Option<&CategoryAggregate> {
        self.by_category.get(&category)
    }
}
