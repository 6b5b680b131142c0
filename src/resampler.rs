//! Resampler: regularizes an irregular reading stream onto a fixed grid.
//!
//! Buckets are half-open `[start, start + period)` intervals aligned to UTC
//! midnight of the first observed day, labelled by their left edge. A bucket
//! holds the arithmetic mean of its points (level and speed separately);
//! empty buckets carry the previous bucket's value forward.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tracing::debug;

use crate::error::PipelineError;
use crate::models::NormalizedPoint;

// ---

/// Uniformly spaced series; all columns share the same index.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledSeries {
    pub period: TimeDelta,
    pub timestamps: Vec<DateTime<Utc>>,
    pub level: Vec<f64>,
    pub speed: Vec<f64>,
    /// Number of buckets that had no source points and were forward-filled.
    pub filled: usize,
}

impl ResampledSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    level_sum: f64,
    speed_sum: f64,
    count: usize,
}

impl Bucket {
    fn mean(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| {
            let n = self.count as f64;
            (self.level_sum / n, self.speed_sum / n)
        })
    }
}

/// Resample `points` onto a grid of `period_seconds`.
///
/// Input order does not matter. Fails with [`PipelineError::EmptyInput`] when
/// there are no points, and with [`PipelineError::SpanTooLarge`] when the
/// readings span more than `max_buckets` buckets. The span is checked before
/// the grid is allocated.
pub fn resample(
    points: &[NormalizedPoint],
    period_seconds: u32,
    max_buckets: usize,
) -> Result<ResampledSeries, PipelineError> {
    // ---
    if period_seconds == 0 {
        return Err(PipelineError::InvalidConfig {
            reason: "resample period must be positive".into(),
        });
    }

    let (Some(min_ts), Some(max_ts)) = (
        points.iter().map(|p| p.timestamp).min(),
        points.iter().map(|p| p.timestamp).max(),
    ) else {
        return Err(PipelineError::EmptyInput {
            reason: "no readings left after normalization".into(),
        });
    };

    let period = TimeDelta::seconds(i64::from(period_seconds));
    let period_ms = period.num_milliseconds();
    let midnight = min_ts.date_naive().and_time(NaiveTime::MIN).and_utc();
    let origin = midnight.timestamp_millis();
    let bucket_of = |ts: DateTime<Utc>| (ts.timestamp_millis() - origin).div_euclid(period_ms);

    let first = bucket_of(min_ts);
    // max_ts >= min_ts, so the span is never negative.
    let needed = (bucket_of(max_ts) - first).unsigned_abs() + 1;
    let count = usize::try_from(needed)
        .ok()
        .filter(|&c| c <= max_buckets)
        .ok_or(PipelineError::SpanTooLarge {
            buckets: needed,
            limit: max_buckets,
        })?;

    let mut buckets = vec![Bucket::default(); count];
    for p in points {
        let b = &mut buckets[(bucket_of(p.timestamp) - first) as usize];
        b.level_sum += p.level as f64;
        b.speed_sum += p.speed;
        b.count += 1;
    }

    // Left edge of the earliest point's bucket, between midnight and min_ts.
    let grid_start = midnight + TimeDelta::milliseconds(first * period_ms);

    let mut timestamps = Vec::with_capacity(count);
    let mut level = Vec::with_capacity(count);
    let mut speed = Vec::with_capacity(count);
    let mut filled = 0;
    // The grid starts at the earliest point's bucket, so bucket 0 always has
    // a mean and the initial carry is never emitted.
    let mut carry = (0.0, 0.0);

    for (i, bucket) in buckets.iter().enumerate() {
        let value = bucket.mean().unwrap_or_else(|| {
            filled += 1;
            carry
        });
        carry = value;

        timestamps.push(grid_start + TimeDelta::milliseconds(i as i64 * period_ms));
        level.push(value.0);
        speed.push(value.1);
    }

    debug!(
        buckets = count,
        filled,
        period_seconds,
        "Resampling complete"
    );

    Ok(ResampledSeries {
        period,
        timestamps,
        level,
        speed,
        filled,
    })
}
