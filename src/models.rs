//! Data models for the fuel pipeline.
//!
//! Telemetry arrives as loosely typed documents (exported from a document
//! store), so decoding works on [`serde_json::Value`] and tolerates both the
//! plain and the extended-JSON wrapped encodings of timestamps and numbers.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RecordParseError;

// ---

pub const FIELD_TIMESTAMP: &str = "timeStamp";
pub const FIELD_LEVEL: &str = "fuelLevelE2";
pub const FIELD_SPEED: &str = "speed";

/// One telemetry document: a vehicle id plus a batch of embedded readings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryRecord {
    // ---
    #[serde(rename = "vehicleNo", default)]
    pub vehicle_no: Option<String>,

    /// Sub-readings, time-sorted within the document.
    #[serde(rename = "geoData", default)]
    pub geo_data: Vec<Value>,
}

/// One decoded sensor reading. `raw_level == 0` means dropout, not empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    // ---
    pub timestamp: DateTime<Utc>,
    pub raw_level: i64,
    pub speed: f64,
}

/// A reading after dropout repair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    // ---
    pub timestamp: DateTime<Utc>,
    pub level: i64,
    pub speed: f64,
}

/// One row of the pipeline output, as served to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    // ---
    pub timestamp: DateTime<Utc>,
    pub raw_level: f64,
    pub smoothed_level: f64,
    pub raw_volume: f64,
    pub calibrated_volume: f64,
    pub speed: f64,
}

impl RawReading {
    // ---
    /// Decode one embedded telemetry item.
    pub fn from_item(item: &Value) -> Result<Self, RecordParseError> {
        // ---
        let obj = item.as_object().ok_or(RecordParseError::NotAnObject)?;

        let timestamp = decode_timestamp(field(obj, FIELD_TIMESTAMP)?)?;
        let raw_level = decode_integer(FIELD_LEVEL, field(obj, FIELD_LEVEL)?)?;
        let speed = decode_float(FIELD_SPEED, field(obj, FIELD_SPEED)?)?;

        Ok(RawReading {
            timestamp,
            raw_level,
            speed,
        })
    }
}

fn field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, RecordParseError> {
    // ---
    match obj.get(name) {
        Some(Value::Null) | None => Err(RecordParseError::MissingField { field: name }),
        Some(v) => Ok(v),
    }
}

/// Decode a timestamp given as RFC 3339 text, epoch milliseconds, or an
/// extended-JSON wrapper such as `{"$date": {"$numberLong": "1725408000000"}}`.
pub fn decode_timestamp(value: &Value) -> Result<DateTime<Utc>, RecordParseError> {
    // ---
    match value {
        Value::String(s) => parse_timestamp_text(s),
        Value::Number(_) => {
            let millis = decode_integer(FIELD_TIMESTAMP, value).map_err(|e| {
                RecordParseError::InvalidTimestamp {
                    reason: e.to_string(),
                }
            })?;
            from_millis(millis)
        }
        Value::Object(obj) => {
            if let Some(inner) = obj.get("$date") {
                decode_timestamp(inner)
            } else if let Some(inner) = obj.get("$numberLong") {
                decode_timestamp(&unwrap_text_number(inner))
            } else {
                Err(RecordParseError::InvalidTimestamp {
                    reason: format!("unrecognized wrapper: {value}"),
                })
            }
        }
        other => Err(RecordParseError::InvalidTimestamp {
            reason: format!("unsupported value: {other}"),
        }),
    }
}

fn parse_timestamp_text(s: &str) -> Result<DateTime<Utc>, RecordParseError> {
    // ---
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    // A millisecond epoch that was stored as text.
    match s.trim().parse::<i64>() {
        Ok(millis) => from_millis(millis),
        Err(_) => Err(RecordParseError::InvalidTimestamp {
            reason: format!("unparseable text `{s}`"),
        }),
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, RecordParseError> {
    // ---
    DateTime::from_timestamp_millis(millis).ok_or_else(|| RecordParseError::InvalidTimestamp {
        reason: format!("epoch millis {millis} out of range"),
    })
}

/// `{"$numberLong": "123"}` stores the digits as text; hand them back as a
/// JSON number when possible so the numeric branch can take over.
fn unwrap_text_number(inner: &Value) -> Value {
    // ---
    match inner {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| inner.clone()),
        _ => inner.clone(),
    }
}

fn unwrap_numeric(obj: &Map<String, Value>) -> Option<&Value> {
    // ---
    ["$numberInt", "$numberLong", "$numberDouble", "$numberDecimal"]
        .iter()
        .find_map(|key| obj.get(*key))
}

/// Coerce a plain, textual or wrapped numeric into an integer. Fractional
/// values are truncated toward zero.
pub fn decode_integer(name: &'static str, value: &Value) -> Result<i64, RecordParseError> {
    // ---
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    let f = decode_float(name, value)?;
    if f.abs() >= i64::MAX as f64 {
        return Err(RecordParseError::InvalidNumber {
            field: name,
            reason: format!("{f} does not fit an integer"),
        });
    }
    Ok(f.trunc() as i64)
}

/// Coerce a plain, textual or wrapped numeric into a finite float.
pub fn decode_float(name: &'static str, value: &Value) -> Result<f64, RecordParseError> {
    // ---
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(obj) => return match unwrap_numeric(obj) {
            Some(inner) => decode_float(name, inner),
            None => Err(RecordParseError::InvalidNumber {
                field: name,
                reason: format!("unrecognized wrapper: {value}"),
            }),
        },
        _ => None,
    };

    match parsed {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(RecordParseError::InvalidNumber {
            field: name,
            reason: format!("not a finite number: {value}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeZone, Timelike};
    use serde_json::json;

    #[test]
    fn test_wrapped_timestamp_and_level() {
        // ---
        let item = json!({
            "timeStamp": { "$date": { "$numberLong": "1725408000000" } },
            "fuelLevelE2": { "$numberInt": "1843" },
            "speed": 42.5
        });

        let reading = RawReading::from_item(&item).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 9, 4, 0, 0, 0).unwrap()
        );
        assert_eq!(reading.raw_level, 1843);
        assert_eq!(reading.speed, 42.5);
    }

    #[test]
    fn test_plain_encodings() {
        // ---
        let item = json!({
            "timeStamp": "2024-09-04T06:30:15Z",
            "fuelLevelE2": 977,
            "speed": "0"
        });

        let reading = RawReading::from_item(&item).unwrap();
        assert_eq!(reading.timestamp.hour(), 6);
        assert_eq!(reading.timestamp.minute(), 30);
        assert_eq!(reading.raw_level, 977);
        assert_eq!(reading.speed, 0.0);
    }

    #[test]
    fn test_numeric_millis_and_date_wrapper_variants() {
        // ---
        let expected = Utc.with_ymd_and_hms(2024, 9, 4, 0, 0, 0).unwrap();
        for ts in [
            json!(1725408000000_i64),
            json!({ "$date": 1725408000000_i64 }),
            json!({ "$date": "2024-09-04T00:00:00Z" }),
            json!({ "$date": { "$numberLong": 1725408000000_i64 } }),
            json!("2024-09-04T00:00:00.000"),
        ] {
            assert_eq!(decode_timestamp(&ts).unwrap(), expected, "input {ts}");
        }
    }

    #[test]
    fn test_level_coercion_truncates_floats() {
        // ---
        assert_eq!(decode_integer(FIELD_LEVEL, &json!(12.9)).unwrap(), 12);
        assert_eq!(decode_integer(FIELD_LEVEL, &json!("305")).unwrap(), 305);
        assert_eq!(
            decode_integer(FIELD_LEVEL, &json!({ "$numberDouble": "88.0" })).unwrap(),
            88
        );
    }

    #[test]
    fn test_missing_and_malformed_fields() {
        // ---
        let no_ts = json!({ "fuelLevelE2": 10, "speed": 1.0 });
        assert_eq!(
            RawReading::from_item(&no_ts),
            Err(RecordParseError::MissingField { field: "timeStamp" })
        );

        let null_speed = json!({ "timeStamp": 0, "fuelLevelE2": 10, "speed": null });
        assert_eq!(
            RawReading::from_item(&null_speed),
            Err(RecordParseError::MissingField { field: "speed" })
        );

        let bad_level = json!({ "timeStamp": 0, "fuelLevelE2": "full", "speed": 1.0 });
        assert!(matches!(
            RawReading::from_item(&bad_level),
            Err(RecordParseError::InvalidNumber { field: "fuelLevelE2", .. })
        ));

        let bad_ts = json!({ "timeStamp": { "$oid": "abc" }, "fuelLevelE2": 1, "speed": 1.0 });
        assert!(matches!(
            RawReading::from_item(&bad_ts),
            Err(RecordParseError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_record_defaults_missing_geo_data() {
        // ---
        let record: TelemetryRecord = serde_json::from_value(json!({ "vehicleNo": "LL-2501" })).unwrap();
        assert_eq!(record.vehicle_no.as_deref(), Some("LL-2501"));
        assert!(record.geo_data.is_empty());
    }
}
