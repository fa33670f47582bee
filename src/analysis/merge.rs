//! Merge engine: two independently time-indexed provider series into one
//! row per hour.
//!
//! Open-Meteo (provider A) defines the hours that exist. WeatherAPI
//! (provider B) points enrich the matching hour; what happens to a B point
//! with no A hour is decided by `UnmatchedPolicy`. Output rows are unique
//! per `TimeKey` and kept in ascending order, independent of the order the
//! series arrived in.

use crate::model::{Coordinate, HourlyRecord, PredictedFields, ProviderFields, ProviderPoint};
use crate::time_key::TimeKey;
use serde::Deserialize;
use std::collections::BTreeMap;

/// What to do with a provider-B hour that provider A never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    /// Discard it. The table covers exactly provider A's hours.
    #[default]
    Drop,
    /// Add a row with the provider-A fields unset.
    Create,
}

/// Counters describing one merge, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    /// Distinct hours contributed by provider A.
    pub primary_hours: usize,
    /// Provider-B points that landed on an existing hour.
    pub matched: usize,
    /// Provider-B points with no provider-A hour.
    pub unmatched_secondary: usize,
    /// Rows created for unmatched provider-B points (`Create` policy only).
    pub created: usize,
}

/// The reconciled per-hour table for one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    coordinate: Coordinate,
    records: Vec<HourlyRecord>,
}

impl MergedTable {
    /// An empty table for `coordinate`.
    pub fn new(coordinate: Coordinate) -> Self {
        MergedTable { coordinate, records: Vec::new() }
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// Rows in ascending `TimeKey` order.
    pub fn records(&self) -> &[HourlyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, time: &TimeKey) -> Option<&HourlyRecord> {
        self.records
            .binary_search_by_key(time, |r| r.time)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Drops every row.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Unsets every predicted field, keeping provider data.
    pub fn clear_predictions(&mut self) {
        for record in &mut self.records {
            record.predicted = PredictedFields::default();
        }
    }

    /// Copies the set fields of each prediction onto the matching row.
    ///
    /// Returns how many rows were updated; predictions for hours not in the
    /// table are ignored.
    pub fn apply_predictions<'a, I>(&mut self, predictions: I) -> usize
    where
        I: IntoIterator<Item = (&'a TimeKey, &'a PredictedFields)>,
    {
        let mut applied = 0;
        for (time, predicted) in predictions {
            let Ok(index) = self.records.binary_search_by_key(time, |r| r.time) else {
                continue;
            };
            let target = &mut self.records[index].predicted;
            if let Some(v) = predicted.temperature {
                target.temperature = Some(v);
            }
            if let Some(v) = predicted.feels_like {
                target.feels_like = Some(v);
            }
            if let Some(v) = predicted.precipitation {
                target.precipitation = Some(v);
            }
            applied += 1;
        }
        applied
    }
}

/// Merges the two series using the default `Drop` policy.
pub fn merge(coordinate: Coordinate, series_a: &[ProviderPoint], series_b: &[ProviderPoint]) -> MergedTable {
    merge_with_policy(coordinate, series_a, series_b, UnmatchedPolicy::Drop).0
}

/// Builds the merged table.
///
/// 1. Every provider-A point creates (or, for a repeated hour, overwrites)
///    the provider-A fields of its row.
/// 2. Every provider-B point sets the provider-B fields of the row with the
///    same `TimeKey`; unmatched points follow `policy`.
/// 3. Rows come out in ascending `TimeKey` order with no duplicates.
pub fn merge_with_policy(
    coordinate: Coordinate,
    series_a: &[ProviderPoint],
    series_b: &[ProviderPoint],
    policy: UnmatchedPolicy,
) -> (MergedTable, MergeStats) {
    let mut rows: BTreeMap<TimeKey, HourlyRecord> = BTreeMap::new();
    let mut stats = MergeStats::default();

    for point in series_a {
        rows.entry(point.time)
            .or_insert_with(|| HourlyRecord::empty(coordinate, point.time))
            .open_meteo = ProviderFields::from_point(point);
    }
    stats.primary_hours = rows.len();

    for point in series_b {
        match rows.get_mut(&point.time) {
            Some(record) => {
                record.weather_api = ProviderFields::from_point(point);
                stats.matched += 1;
            }
            None => {
                stats.unmatched_secondary += 1;
                if policy == UnmatchedPolicy::Create {
                    let mut record = HourlyRecord::empty(coordinate, point.time);
                    record.weather_api = ProviderFields::from_point(point);
                    rows.insert(point.time, record);
                    stats.created += 1;
                }
            }
        }
    }

    let table = MergedTable {
        coordinate,
        records: rows.into_values().collect(),
    };
    (table, stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
