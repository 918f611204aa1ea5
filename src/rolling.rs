//! Trailing rolling mean / standard deviation over strictly past targets.

use std::collections::VecDeque;

use chrono::NaiveDateTime;

use crate::config::Frequency;
use crate::schema::{rolling_mean_column_name, rolling_std_column_name};
use crate::series::{mean, sample_std, DerivedColumn, EntitySeries};

/// Targets of the most recent contiguous run of slots, oldest first.
#[derive(Debug, Clone)]
struct TrailingWindow {
    values: VecDeque<f64>,
    last_ts: Option<NaiveDateTime>,
    max_window: usize,
}

impl TrailingWindow {
    fn new(max_window: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(max_window + 1),
            last_ts: None,
            max_window,
        }
    }

    fn reset(&mut self) {
        self.values.clear();
        self.last_ts = None;
    }

    fn push(&mut self, ts: NaiveDateTime, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.max_window {
            self.values.pop_front();
        }
        self.last_ts = Some(ts);
    }

    fn last(&self, w: usize) -> Option<Vec<f64>> {
        if self.values.len() < w {
            return None;
        }
        let start = self.values.len() - w;
        Some(self.values.range(start..).copied().collect())
    }
}

/// For each window `w`, a mean and a std column over the targets at
/// `t - 1 .. t - w` periods. Defined only when all `w` prior slots exist.
pub fn rolling_features(
    series: &EntitySeries,
    target_abbr: &str,
    frequency: Frequency,
    windows: &[u32],
) -> Vec<DerivedColumn> {
    let max_window = windows.iter().copied().max().unwrap_or(0) as usize;
    let step = frequency.step();
    let len = series.len();

    let mut means: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(len); windows.len()];
    let mut stds: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(len); windows.len()];
    let mut window = TrailingWindow::new(max_window);

    for point in series.points() {
        let previous = point.timestamp.checked_sub_signed(step);
        if previous.is_none() || window.last_ts != previous {
            window.reset();
        }

        for (idx, w) in windows.iter().enumerate() {
            let past = window.last(*w as usize);
            means[idx].push(past.as_deref().and_then(mean));
            stds[idx].push(past.as_deref().and_then(sample_std));
        }

        window.push(point.timestamp, point.target);
    }

    let mut out = Vec::with_capacity(windows.len() * 2);
    for ((w, mean_values), std_values) in windows.iter().zip(means).zip(stds) {
        out.push(DerivedColumn::new(
            rolling_mean_column_name(target_abbr, *w),
            mean_values,
        ));
        out.push(DerivedColumn::new(
            rolling_std_column_name(target_abbr, *w),
            std_values,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate};

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn hourly(targets: &[f64]) -> EntitySeries {
        EntitySeries::from_targets(
            "S1",
            targets
                .iter()
                .enumerate()
                .map(|(i, v)| (base() + ChronoDuration::hours(i as i64), *v)),
        )
    }

    #[test]
    fn rolling_mean_excludes_current_value() {
        let series = hourly(&[3.0, 0.0, 5.0, 2.0, 7.0, 1.0, 4.0]);
        let cols = rolling_features(&series, "dep", Frequency::HOURLY, &[2]);
        assert_eq!(cols[0].name, "dep_roll_mean_2");
        assert_eq!(cols[1].name, "dep_roll_std_2");
        assert_eq!(cols[0].values[0], None);
        assert_eq!(cols[0].values[1], None);
        assert_eq!(cols[0].values[2], Some(1.5));
        assert_eq!(cols[0].values[3], Some(2.5));
        assert_eq!(cols[0].values[6], Some(4.0));
    }

    #[test]
    fn changing_current_target_does_not_change_its_feature() {
        let a = rolling_features(&hourly(&[1.0, 2.0, 3.0, 4.0]), "dep", Frequency::HOURLY, &[3]);
        let b = rolling_features(&hourly(&[1.0, 2.0, 3.0, 400.0]), "dep", Frequency::HOURLY, &[3]);
        assert_eq!(a[0].values[3], b[0].values[3]);
        assert_eq!(a[1].values[3], b[1].values[3]);
        assert_eq!(a[0].values[3], Some(2.0));
    }

    #[test]
    fn window_of_one_has_mean_but_no_std() {
        let cols = rolling_features(&hourly(&[1.0, 2.0]), "dep", Frequency::HOURLY, &[1]);
        assert_eq!(cols[0].values, vec![None, Some(1.0)]);
        assert_eq!(cols[1].values, vec![None, None]);
    }

    #[test]
    fn timeline_break_restarts_the_window() {
        let series = EntitySeries::from_targets(
            "S1",
            vec![
                (base(), 1.0),
                (base() + ChronoDuration::hours(1), 2.0),
                (base() + ChronoDuration::hours(2), 3.0),
                (base() + ChronoDuration::hours(10), 9.0),
                (base() + ChronoDuration::hours(11), 9.0),
            ],
        );
        let cols = rolling_features(&series, "dep", Frequency::HOURLY, &[2]);
        assert_eq!(cols[0].values, vec![None, None, Some(1.5), None, None]);
    }

    #[test]
    fn std_matches_sample_formula() {
        let cols = rolling_features(&hourly(&[2.0, 4.0, 6.0, 0.0]), "dep", Frequency::HOURLY, &[3]);
        let std = cols[1].values[3].unwrap();
        assert!((std - 2.0).abs() < 1e-12);
    }
}
