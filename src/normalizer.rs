//! Reading normalizer: flattens telemetry documents into decoded readings
//! and repairs sensor dropouts.
//!
//! A raw level of `0` is a dropout sentinel. It is replaced by the last
//! non-zero level seen so far; zeros before the first good reading pass
//! through unchanged. Items that fail to decode are logged, recorded as
//! [`SkippedItem`]s and dropped. Nothing here returns an error to the caller.
//!
//! Arrival order is preserved. No sorting happens here because the resampler
//! buckets by timestamp value.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SkippedItem;
use crate::models::{NormalizedPoint, RawReading, TelemetryRecord};

// ---

/// Running "last known good level" used to patch dropout zeros.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropoutRepair {
    last_good: Option<i64>,
}

impl DropoutRepair {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Repair one raw level.
    pub fn repair(&mut self, raw_level: i64) -> i64 {
        // ---
        match (raw_level, self.last_good) {
            (0, Some(good)) => good,
            (0, None) => 0,
            (level, _) => {
                self.last_good = Some(level);
                level
            }
        }
    }
}

/// Dropout repair over a plain level sequence.
pub fn repair_dropouts(levels: &[i64]) -> Vec<i64> {
    // ---
    let mut repair = DropoutRepair::new();
    levels.iter().map(|&l| repair.repair(l)).collect()
}

/// Normalized readings plus diagnostics for the items that were dropped.
#[derive(Debug, Clone, Default)]
pub struct NormalizedSeries {
    pub points: Vec<NormalizedPoint>,
    pub skipped: Vec<SkippedItem>,
}

impl NormalizedSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Incremental normalizer; feed items in arrival order, then [`finish`].
///
/// [`finish`]: Normalizer::finish
#[derive(Debug, Default)]
pub struct Normalizer {
    repair: DropoutRepair,
    next_index: usize,
    series: NormalizedSeries,
}

impl Normalizer {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and repair one embedded telemetry item.
    pub fn push_item(&mut self, item: &Value) {
        // ---
        let index = self.next_index;
        self.next_index += 1;

        match RawReading::from_item(item) {
            Ok(reading) => {
                let level = self.repair.repair(reading.raw_level);
                self.series.points.push(NormalizedPoint {
                    timestamp: reading.timestamp,
                    level,
                    speed: reading.speed,
                });
            }
            Err(error) => {
                warn!(index, %error, "Skipping telemetry item");
                self.series.skipped.push(SkippedItem { index, error });
            }
        }
    }

    /// Feed every embedded reading of one document.
    pub fn push_record(&mut self, record: &TelemetryRecord) {
        // ---
        for item in &record.geo_data {
            self.push_item(item);
        }
    }

    pub fn finish(self) -> NormalizedSeries {
        // ---
        debug!(
            points = self.series.points.len(),
            skipped = self.series.skipped.len(),
            "Normalization complete"
        );
        self.series
    }
}

/// Normalize a sequence of telemetry documents.
pub fn normalize<I>(records: I) -> NormalizedSeries
where
    I: IntoIterator<Item = TelemetryRecord>,
{
    // ---
    let mut normalizer = Normalizer::new();
    for record in records {
        normalizer.push_record(&record);
    }
    normalizer.finish()
}

/// Normalize an already-flattened sequence of embedded readings.
pub fn normalize_items<'a, I>(items: I) -> NormalizedSeries
where
    I: IntoIterator<Item = &'a Value>,
{
    // ---
    let mut normalizer = Normalizer::new();
    for item in items {
        normalizer.push_item(item);
    }
    normalizer.finish()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::error::RecordParseError;
    use serde_json::json;

    fn item(millis: i64, level: i64) -> Value {
        json!({
            "timeStamp": { "$date": { "$numberLong": millis.to_string() } },
            "fuelLevelE2": level,
            "speed": 0.0
        })
    }

    #[test]
    fn test_dropouts_take_last_good_value() {
        // ---
        assert_eq!(repair_dropouts(&[50, 0, 0, 60, 0]), vec![50, 50, 50, 60, 60]);
    }

    #[test]
    fn test_leading_zeros_pass_through() {
        // ---
        assert_eq!(repair_dropouts(&[0, 0, 30]), vec![0, 0, 30]);
        assert_eq!(repair_dropouts(&[0, 0, 30, 0]), vec![0, 0, 30, 30]);
    }

    #[test]
    fn test_bad_items_are_skipped_not_fatal() {
        // ---
        let items = vec![
            item(1_000, 50),
            json!({ "fuelLevelE2": 0, "speed": 0.0 }),
            item(2_000, 0),
            json!("garbage"),
            item(3_000, 70),
        ];

        let series = normalize_items(&items);

        let levels: Vec<i64> = series.points.iter().map(|p| p.level).collect();
        assert_eq!(levels, vec![50, 50, 70]);
        assert_eq!(series.skipped.len(), 2);
        assert_eq!(series.skipped[0].index, 1);
        assert_eq!(
            series.skipped[0].error,
            RecordParseError::MissingField { field: "timeStamp" }
        );
        assert_eq!(series.skipped[1].index, 3);
        assert_eq!(series.skipped[1].error, RecordParseError::NotAnObject);
    }

    #[test]
    fn test_skipped_item_does_not_reset_repair_state() {
        // ---
        let items = vec![
            item(1_000, 40),
            json!({ "timeStamp": 2_000, "fuelLevelE2": "n/a", "speed": 0 }),
            item(3_000, 0),
        ];

        let series = normalize_items(&items);
        let levels: Vec<i64> = series.points.iter().map(|p| p.level).collect();
        assert_eq!(levels, vec![40, 40]);
    }

    #[test]
    fn test_records_flatten_in_arrival_order() {
        // ---
        let first = TelemetryRecord {
            vehicle_no: Some("LL-2501".into()),
            geo_data: vec![item(5_000, 10), item(6_000, 0)],
        };
        let second = TelemetryRecord {
            vehicle_no: Some("LL-2501".into()),
            geo_data: vec![item(1_000, 0), item(2_000, 20)],
        };

        let series = normalize(vec![first, second]);

        let millis: Vec<i64> = series
            .points
            .iter()
            .map(|p| p.timestamp.timestamp_millis())
            .collect();
        assert_eq!(millis, vec![5_000, 6_000, 1_000, 2_000]);

        let levels: Vec<i64> = series.points.iter().map(|p| p.level).collect();
        assert_eq!(levels, vec![10, 10, 10, 20]);
    }
}
