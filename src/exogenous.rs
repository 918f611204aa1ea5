//! Leak-safe covariate shifting and season-aligned covariate preparation.

use chrono::NaiveDateTime;
use tracing::info;

use crate::config::{FeatureConfig, Frequency};
use crate::gaps::{flag_column_name, handle_gaps_contiguous};
use crate::series::{DerivedColumn, EntitySeries, ExogenousFrame, SeriesError};

/// Covariates aligned to the season timeline, with gap handling applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedExogenous {
    /// Configured exogenous columns followed by one flag column per gap-handled column.
    pub columns: Vec<DerivedColumn>,
    pub interpolated_points: usize,
    pub sentinel_points: usize,
}

impl PreparedExogenous {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Aligns the configured covariates onto `timeline` and runs the gap handler on
/// every gap-handled column, one contiguous season block at a time.
pub fn prepare_exogenous(
    frame: &ExogenousFrame,
    timeline: &[NaiveDateTime],
    cfg: &FeatureConfig,
) -> Result<PreparedExogenous, SeriesError> {
    let mut columns = Vec::with_capacity(cfg.exogenous_columns.len() + cfg.gap_handled_columns.len());
    let mut flags = Vec::with_capacity(cfg.gap_handled_columns.len());
    let mut interpolated_points = 0;
    let mut sentinel_points = 0;

    for name in &cfg.exogenous_columns {
        let aligned = frame.align(name, timeline)?;
        if !cfg.gap_handled_columns.contains(name) {
            columns.push(DerivedColumn::new(name.clone(), aligned));
            continue;
        }

        let points: Vec<(NaiveDateTime, Option<f64>)> =
            timeline.iter().copied().zip(aligned).collect();
        let handled = handle_gaps_contiguous(&points, cfg.frequency.step(), cfg.gap_threshold);
        interpolated_points += handled.interpolated_points();
        sentinel_points += handled.sentinel_points();

        info!(
            component = "exogenous",
            event = "gaps.handle.finish",
            column = name.as_str(),
            segments = handled.segments.len(),
            interpolated_points = handled.interpolated_points(),
            sentinel_points = handled.sentinel_points(),
            threshold = cfg.gap_threshold
        );

        columns.push(DerivedColumn::new(
            name.clone(),
            handled.values.into_iter().map(Some).collect(),
        ));
        flags.push(DerivedColumn::new(
            flag_column_name(name),
            handled
                .missing_flag
                .into_iter()
                .map(|flag| Some(f64::from(flag)))
                .collect(),
        ));
    }

    // Flags follow gap-handled config order.
    let mut ordered_flags = Vec::with_capacity(flags.len());
    for name in &cfg.gap_handled_columns {
        let flag_name = flag_column_name(name);
        if let Some(pos) = flags.iter().position(|c| c.name == flag_name) {
            ordered_flags.push(flags.swap_remove(pos));
        }
    }
    columns.extend(ordered_flags);

    Ok(PreparedExogenous {
        columns,
        interpolated_points,
        sentinel_points,
    })
}

/// Every exogenous column of `series` shifted by one period: the value exposed
/// at `t` is the reading at `t - 1`, missing when that slot is not in the series.
pub fn shift_exogenous(series: &EntitySeries, frequency: Frequency) -> Vec<DerivedColumn> {
    let step = frequency.step();
    let points = series.points();

    series
        .exogenous_columns()
        .iter()
        .enumerate()
        .map(|(col_idx, name)| {
            let values = points
                .iter()
                .map(|point| {
                    point
                        .timestamp
                        .checked_sub_signed(step)
                        .and_then(|prev| series.position(prev))
                        .and_then(|prev| points[prev].exogenous[col_idx])
                })
                .collect();
            DerivedColumn::new(name.clone(), values)
        })
        .collect()
}
