//! Same slot-of-day statistics across the preceding calendar days.

use crate::config::Frequency;
use crate::schema::{same_hour_mean_column_name, same_hour_std_column_name};
use crate::series::{mean, sample_std, DerivedColumn, EntitySeries};

/// For each day window `d`, mean and std of the target at `t - 1 day`,
/// `t - 2 days`, …, `t - d days`. Missing unless all `d` values exist.
pub fn same_hour_features(
    series: &EntitySeries,
    target_abbr: &str,
    frequency: Frequency,
    day_windows: &[u32],
) -> Vec<DerivedColumn> {
    let max_days = day_windows.iter().copied().max().unwrap_or(0);
    let periods_per_day = frequency.periods_per_day();
    let offsets: Vec<_> = (1..=max_days)
        .map(|day| {
            day.checked_mul(periods_per_day)
                .and_then(|periods| frequency.steps(periods))
        })
        .collect();

    let len = series.len();
    let mut means: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(len); day_windows.len()];
    let mut stds: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(len); day_windows.len()];

    for point in series.points() {
        let previous: Vec<Option<f64>> = offsets
            .iter()
            .copied()
            .map(|offset| {
                offset
                    .and_then(|offset| point.timestamp.checked_sub_signed(offset))
                    .and_then(|ts| series.target_at(ts))
            })
            .collect();

        for (idx, d) in day_windows.iter().enumerate() {
            let window: Option<Vec<f64>> = previous[..*d as usize].iter().copied().collect();
            means[idx].push(window.as_deref().and_then(mean));
            stds[idx].push(window.as_deref().and_then(sample_std));
        }
    }

    let mut out = Vec::with_capacity(day_windows.len() * 2);
    for ((d, mean_values), std_values) in day_windows.iter().zip(means).zip(stds) {
        out.push(DerivedColumn::new(
            same_hour_mean_column_name(target_abbr, *d),
            mean_values,
        ));
        out.push(DerivedColumn::new(
            same_hour_std_column_name(target_abbr, *d),
            std_values,
        ));
    }
    out
}
