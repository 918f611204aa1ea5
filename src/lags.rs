//! Fixed-offset lags of the target.

use crate::config::Frequency;
use crate::schema::lag_column_name;
use crate::series::{DerivedColumn, EntitySeries};

/// One column per offset `k`: the target at `t - k * frequency`, or `None`
/// when that timestamp is not part of the entity's series.
pub fn lag_features(
    series: &EntitySeries,
    target_abbr: &str,
    frequency: Frequency,
    lags: &[u32],
) -> Vec<DerivedColumn> {
    lags.iter()
        .map(|&k| {
            let offset = frequency.steps(k);
            let values = series
                .points()
                .iter()
                .map(|point| {
                    offset
                        .and_then(|offset| point.timestamp.checked_sub_signed(offset))
                        .and_then(|ts| series.target_at(ts))
                })
                .collect();
            DerivedColumn::new(lag_column_name(target_abbr, k), values)
        })
        .collect()
}
