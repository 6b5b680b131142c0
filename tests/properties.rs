use chrono::{TimeDelta, TimeZone, Utc};
use proptest::prelude::*;

use fuelflow::filter::{moving_average, FilterDirection, FirFilter};
use fuelflow::models::NormalizedPoint;
use fuelflow::normalizer::repair_dropouts;
use fuelflow::pipeline::DEFAULT_MAX_BUCKETS;
use fuelflow::resampler::resample;

// ---

proptest! {
    #[test]
    fn dropout_repair_never_reintroduces_zero(levels in prop::collection::vec(
        prop_oneof![Just(0i64), 1i64..4096], 0..200)
    ) {
        let repaired = repair_dropouts(&levels);
        prop_assert_eq!(repaired.len(), levels.len());

        let first_good = levels.iter().position(|&l| l != 0).unwrap_or(levels.len());
        prop_assert!(repaired[..first_good].iter().all(|&l| l == 0));
        prop_assert!(repaired[first_good..].iter().all(|&l| l != 0));

        for (raw, fixed) in levels.iter().zip(&repaired) {
            if *raw != 0 {
                prop_assert_eq!(raw, fixed);
            }
        }
    }

    #[test]
    fn resampled_grid_is_uniform(
        offsets in prop::collection::vec(0i64..86_400 * 2, 1..120),
        period in prop::sample::select(vec![1u32, 15, 60, 300]),
    ) {
        let base = Utc.with_ymd_and_hms(2024, 9, 4, 0, 0, 0).unwrap();
        let points: Vec<NormalizedPoint> = offsets
            .iter()
            .map(|&s| NormalizedPoint {
                timestamp: base + TimeDelta::seconds(s),
                level: 1000 + s % 97,
                speed: 0.0,
            })
            .collect();

        let series = resample(&points, period, DEFAULT_MAX_BUCKETS).unwrap();
        let step = TimeDelta::seconds(i64::from(period));

        let min = *offsets.iter().min().unwrap();
        let max = *offsets.iter().max().unwrap();
        let p = i64::from(period);
        prop_assert_eq!(series.len() as i64, max / p - min / p + 1);
        prop_assert_eq!(series.timestamps[0], base + TimeDelta::seconds(min / p * p));
        for pair in series.timestamps.windows(2) {
            prop_assert_eq!(pair[1] - pair[0], step);
        }
        prop_assert!(series.level.iter().all(|&l| (1000.0..1097.0).contains(&l)));
    }

    #[test]
    fn filters_preserve_length(
        data in prop::collection::vec(0.0f64..4096.0, 101..400),
        window in 1usize..40,
    ) {
        let ma = moving_average(&data, window).unwrap();
        prop_assert_eq!(ma.len(), data.len());

        let fir = FirFilter::lowpass(101, 0.01, 3.0).unwrap();
        let out = fir.apply(&ma, FilterDirection::Causal).unwrap();
        prop_assert_eq!(out.len(), data.len());
        prop_assert!(out.iter().all(|y| y.is_finite()));
    }
}
