//! Gap-aware missing-value handling for sparse sensor series.
//!
//! Short interior gaps are linearly interpolated; long gaps and gaps touching
//! either end of the series are flagged and replaced with [`GAP_SENTINEL`].

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_GAP_THRESHOLD: usize = 6;
pub const GAP_SENTINEL: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapResolution {
    Interpolated,
    Sentinel,
}

/// Maximal run of missing values, positions relative to the handled series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSegment {
    pub start: usize,
    pub len: usize,
    pub resolution: GapResolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapFillResult {
    pub timestamps: Vec<NaiveDateTime>,
    pub values: Vec<f64>,
    /// 1 where the value is the sentinel because its gap stayed unresolved.
    pub missing_flag: Vec<u8>,
    pub segments: Vec<GapSegment>,
}

impl GapFillResult {
    pub fn interpolated_points(&self) -> usize {
        self.points_with(GapResolution::Interpolated)
    }

    pub fn sentinel_points(&self) -> usize {
        self.points_with(GapResolution::Sentinel)
    }

    fn points_with(&self, resolution: GapResolution) -> usize {
        self.segments
            .iter()
            .filter(|segment| segment.resolution == resolution)
            .map(|segment| segment.len)
            .sum()
    }
}

/// Flag column paired with a gap-handled column: initials plus `_missing`
/// (`wind_speed` becomes `ws_missing`).
pub fn flag_column_name(column: &str) -> String {
    let initials: String = column
        .split('_')
        .filter_map(|word| word.chars().next())
        .collect();
    format!("{initials}_missing")
}

/// `(start, len)` of every maximal run of missing values. NaN counts as missing.
pub fn find_gap_segments(values: &[Option<f64>]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut run_start = None;
    for (idx, value) in values.iter().enumerate() {
        let missing = is_missing(*value);
        match (missing, run_start) {
            (true, None) => run_start = Some(idx),
            (false, Some(start)) => {
                out.push((start, idx - start));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        out.push((start, values.len() - start));
    }
    out
}

/// Handles one timestamp-indexed series. Points are sorted by timestamp first;
/// interpolation is by position.
pub fn handle_gaps(points: &[(NaiveDateTime, Option<f64>)], threshold: usize) -> GapFillResult {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|(ts, _)| *ts);
    let (timestamps, values): (Vec<NaiveDateTime>, Vec<Option<f64>>) = sorted.into_iter().unzip();
    fill_positional(timestamps, &values, threshold)
}

/// Like [`handle_gaps`] but never interpolates across a break in the timeline:
/// the series is split wherever consecutive timestamps are not exactly `step`
/// apart and each block is handled on its own.
pub fn handle_gaps_contiguous(
    points: &[(NaiveDateTime, Option<f64>)],
    step: ChronoDuration,
    threshold: usize,
) -> GapFillResult {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|(ts, _)| *ts);

    let mut merged = GapFillResult {
        timestamps: Vec::with_capacity(sorted.len()),
        values: Vec::with_capacity(sorted.len()),
        missing_flag: Vec::with_capacity(sorted.len()),
        segments: Vec::new(),
    };

    let mut block_start = 0;
    for idx in 1..=sorted.len() {
        let boundary = idx == sorted.len() || sorted[idx].0 - sorted[idx - 1].0 != step;
        if !boundary {
            continue;
        }
        let (timestamps, values): (Vec<NaiveDateTime>, Vec<Option<f64>>) =
            sorted[block_start..idx].iter().copied().unzip();
        let block = fill_positional(timestamps, &values, threshold);
        let offset = merged.values.len();
        merged.timestamps.extend(block.timestamps);
        merged.values.extend(block.values);
        merged.missing_flag.extend(block.missing_flag);
        merged
            .segments
            .extend(block.segments.into_iter().map(|segment| GapSegment {
                start: segment.start + offset,
                ..segment
            }));
        block_start = idx;
    }

    merged
}

fn fill_positional(
    timestamps: Vec<NaiveDateTime>,
    values: &[Option<f64>],
    threshold: usize,
) -> GapFillResult {
    let mut filled: Vec<Option<f64>> = values
        .iter()
        .map(|value| value.filter(|v| !v.is_nan()))
        .collect();
    let mut segments = Vec::new();

    for (start, len) in find_gap_segments(values) {
        let end = start + len;
        let bounds = match (start.checked_sub(1), filled.get(end).copied().flatten()) {
            (Some(left_idx), Some(right)) => filled[left_idx].map(|left| (left, right)),
            _ => None,
        };

        let resolution = match bounds {
            Some((left, right)) if len <= threshold => {
                let span = (len + 1) as f64;
                for offset in 0..len {
                    let frac = (offset + 1) as f64 / span;
                    filled[start + offset] = Some(left + (right - left) * frac);
                }
                GapResolution::Interpolated
            }
            _ => GapResolution::Sentinel,
        };
        segments.push(GapSegment {
            start,
            len,
            resolution,
        });
    }

    let missing_flag: Vec<u8> = filled.iter().map(|v| u8::from(v.is_none())).collect();
    let values: Vec<f64> = filled.into_iter().map(|v| v.unwrap_or(GAP_SENTINEL)).collect();

    let result = GapFillResult {
        timestamps,
        values,
        missing_flag,
        segments,
    };

    debug!(
        component = "gaps",
        event = "gaps.handle.block",
        points = result.values.len(),
        segments = result.segments.len(),
        interpolated_points = result.interpolated_points(),
        sentinel_points = result.sentinel_points(),
        threshold
    );

    result
}

fn is_missing(value: Option<f64>) -> bool {
    value.map_or(true, f64::is_nan)
}
