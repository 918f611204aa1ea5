//! Per-entity feature assembly, row filtering and the chronological split.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calendar::{CalendarFeatures, CALENDAR_COLUMNS};
use crate::config::{ConfigError, DropPolicy, FeatureConfig};
use crate::exogenous::{prepare_exogenous, shift_exogenous};
use crate::grid::build_dense_grid;
use crate::lags::lag_features;
use crate::rolling::rolling_features;
use crate::same_hour::same_hour_features;
use crate::schema::{build_feature_schema, FeatureSchema, RAIN_COLUMN};
use crate::series::{
    target_abbreviation, DerivedColumn, EntitySeries, ExogenousFrame, Observation, SeriesError,
    SeriesPoint, StationAttributes,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("missing required input column: {0}")]
    MissingColumn(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<SeriesError> for PipelineError {
    fn from(err: SeriesError) -> Self {
        match err {
            SeriesError::MissingColumn(column) => Self::MissingColumn(column),
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub entity_id: String,
    pub timestamp: NaiveDateTime,
    pub target: f64,
    /// Aligned with [`FeatureSchema::columns`].
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    pub fn value(&self, schema: &FeatureSchema, column: &str) -> Option<f64> {
        schema
            .column_index(column)
            .and_then(|idx| self.values.get(idx).copied().flatten())
    }

    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureSplit {
    pub train: Vec<FeatureRow>,
    pub test: Vec<FeatureRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureTransformReport {
    pub input_observations: u64,
    pub entities: u64,
    pub timeline_points: u64,
    pub grid_rows: u64,
    pub output_rows: u64,
    pub dropped_rows: u64,
    pub train_rows: u64,
    pub test_rows: u64,
    pub interpolated_points: u64,
    pub sentinel_points: u64,
    /// Entities whose every row lacked full lookback.
    pub empty_entities: Vec<String>,
}

/// Observations and covariates in, schema plus train / test tables out.
pub fn prepare_features(
    observations: &[Observation],
    exogenous: &ExogenousFrame,
    attributes: Option<&StationAttributes>,
    cfg: &FeatureConfig,
) -> Result<(FeatureSchema, FeatureSplit, FeatureTransformReport), PipelineError> {
    cfg.validate()?;
    for column in &cfg.exogenous_columns {
        if exogenous.column_index(column).is_none() {
            return Err(PipelineError::MissingColumn(column.clone()));
        }
    }

    info!(
        component = "assemble",
        event = "features.prepare.start",
        observations = observations.len(),
        exogenous_rows = exogenous.rows.len(),
        target = cfg.target_column.as_str(),
        frequency = %cfg.frequency,
        lags = ?cfg.lags,
        rolling_windows = ?cfg.rolling_windows,
        same_hour_windows = ?cfg.same_hour_windows,
        drop_policy = ?cfg.drop_policy
    );

    let attribute_columns = attributes.map(|a| a.columns.clone()).unwrap_or_default();
    let schema = build_feature_schema(cfg, &attribute_columns)?;
    let required = required_column_indices(&schema, &cfg.drop_policy)?;

    let grid = build_dense_grid(observations, cfg);
    let prepared = prepare_exogenous(exogenous, &grid.timeline, cfg)?;
    let exogenous_names = prepared.column_names();

    let mut report = FeatureTransformReport {
        input_observations: observations.len() as u64,
        entities: grid.entities.len() as u64,
        timeline_points: grid.timeline.len() as u64,
        grid_rows: grid.row_count() as u64,
        interpolated_points: prepared.interpolated_points as u64,
        sentinel_points: prepared.sentinel_points as u64,
        ..FeatureTransformReport::default()
    };

    let mut rows = Vec::with_capacity(grid.row_count());
    for (entity_id, counts) in grid.entities.iter().zip(&grid.counts) {
        let points = grid
            .timeline
            .iter()
            .enumerate()
            .map(|(t, ts)| SeriesPoint {
                timestamp: *ts,
                target: counts[t],
                exogenous: prepared.columns.iter().map(|c| c.values[t]).collect(),
            })
            .collect();
        let mut series = EntitySeries::new(entity_id.clone(), exogenous_names.clone(), points)?;
        if let Some(attributes) = attributes {
            series = series.with_attributes(attributes.sorted_for(entity_id));
        }

        let entity_rows = assemble_entity(&series, &schema, cfg)?;
        let before = entity_rows.len();
        let kept: Vec<FeatureRow> = entity_rows
            .into_iter()
            .filter(|row| required.iter().all(|idx| row.values[*idx].is_some()))
            .collect();

        debug!(
            component = "assemble",
            event = "features.entity.assembled",
            entity_id = entity_id.as_str(),
            rows = before,
            kept = kept.len()
        );
        if kept.is_empty() {
            warn!(
                component = "assemble",
                event = "features.entity.empty",
                entity_id = entity_id.as_str(),
                rows = before
            );
            report.empty_entities.push(entity_id.clone());
        }

        report.dropped_rows += (before - kept.len()) as u64;
        rows.extend(kept);
    }

    rows.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    report.output_rows = rows.len() as u64;

    let split = split_by_year(rows, cfg.test_start_year);
    report.train_rows = split.train.len() as u64;
    report.test_rows = split.test.len() as u64;

    info!(
        component = "assemble",
        event = "features.prepare.finish",
        grid_rows = report.grid_rows,
        output_rows = report.output_rows,
        dropped_rows = report.dropped_rows,
        train_rows = report.train_rows,
        test_rows = report.test_rows,
        empty_entities = report.empty_entities.len(),
        fingerprint = schema.fingerprint.as_str()
    );

    Ok((schema, split, report))
}

/// All feature rows of one entity in timestamp order, before any row is dropped.
pub fn assemble_entity(
    series: &EntitySeries,
    schema: &FeatureSchema,
    cfg: &FeatureConfig,
) -> Result<Vec<FeatureRow>, PipelineError> {
    let abbr = target_abbreviation(&cfg.target_column);
    let points = series.points();
    let len = points.len();

    let calendar: Vec<[f64; 5]> = points
        .iter()
        .map(|point| CalendarFeatures::from_timestamp(point.timestamp).values())
        .collect();

    let mut derived: Vec<DerivedColumn> = Vec::new();
    for (idx, name) in CALENDAR_COLUMNS.iter().enumerate() {
        derived.push(DerivedColumn::new(
            *name,
            calendar.iter().map(|values| Some(values[idx])).collect(),
        ));
    }
    for (name, value) in series.attributes() {
        derived.push(DerivedColumn::new(name.clone(), vec![*value; len]));
    }
    derived.extend(lag_features(series, &abbr, cfg.frequency, &cfg.lags));
    derived.extend(rolling_features(series, &abbr, cfg.frequency, &cfg.rolling_windows));
    derived.extend(same_hour_features(
        series,
        &abbr,
        cfg.frequency,
        &cfg.same_hour_windows,
    ));
    let shifted = shift_exogenous(series, cfg.frequency);
    if let Some(rain_source) = &cfg.rain_column {
        let source = shifted
            .iter()
            .find(|column| &column.name == rain_source)
            .ok_or_else(|| PipelineError::MissingColumn(rain_source.clone()))?;
        let rain = source
            .values
            .iter()
            .map(|value| value.map(|v| if v > 0.0 { 1.0 } else { 0.0 }))
            .collect();
        derived.push(DerivedColumn::new(RAIN_COLUMN, rain));
    }
    derived.extend(shifted);

    let mut by_name: HashMap<String, Vec<Option<f64>>> = derived
        .into_iter()
        .map(|column| (column.name, column.values))
        .collect();
    let mut ordered = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        let values = by_name.remove(&column.name).ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "entity {} produced no values for column {}",
                series.entity_id(),
                column.name
            ))
        })?;
        ordered.push(values);
    }

    Ok(points
        .iter()
        .enumerate()
        .map(|(idx, point)| FeatureRow {
            entity_id: series.entity_id().to_string(),
            timestamp: point.timestamp,
            target: point.target,
            values: ordered.iter().map(|values| values[idx]).collect(),
        })
        .collect())
}

/// Train: years before `test_start_year`; test: that year and later. Order is kept.
pub fn split_by_year(rows: Vec<FeatureRow>, test_start_year: i32) -> FeatureSplit {
    let (train, test): (Vec<FeatureRow>, Vec<FeatureRow>) = rows
        .into_iter()
        .partition(|row| row.year() < test_start_year);
    FeatureSplit { train, test }
}

fn required_column_indices(
    schema: &FeatureSchema,
    policy: &DropPolicy,
) -> Result<Vec<usize>, ConfigError> {
    match policy {
        DropPolicy::AnyMissing => Ok((0..schema.columns.len()).collect()),
        DropPolicy::Required(columns) => columns
            .iter()
            .map(|name| {
                schema
                    .column_index(name)
                    .ok_or_else(|| ConfigError::UnknownRequiredColumn(name.clone()))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate};

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn small_config() -> FeatureConfig {
        FeatureConfig {
            lags: vec![1],
            rolling_windows: vec![2],
            same_hour_windows: vec![],
            exogenous_columns: vec!["temperature".to_string()],
            gap_handled_columns: vec![],
            rain_column: None,
            ..FeatureConfig::default()
        }
    }

    fn frame(hours: std::ops::Range<i64>, start: NaiveDateTime) -> ExogenousFrame {
        let mut frame = ExogenousFrame::new(vec!["temperature".to_string()]);
        for h in hours {
            frame
                .push_row(start + ChronoDuration::hours(h), vec![Some(h as f64)])
                .unwrap();
        }
        frame
    }

    #[test]
    fn split_is_disjoint_and_by_year() {
        let row = |ts| FeatureRow {
            entity_id: "S1".to_string(),
            timestamp: ts,
            target: 0.0,
            values: vec![],
        };
        let split = split_by_year(
            vec![row(at(2023, 10, 31, 23)), row(at(2024, 4, 1, 0)), row(at(2022, 5, 1, 0))],
            2024,
        );
        assert_eq!(split.train.len(), 2);
        assert_eq!(split.test.len(), 1);
        assert_eq!(split.test[0].year(), 2024);
    }

    #[test]
    fn drops_rows_without_full_lookback() {
        let start = at(2023, 6, 1, 0);
        let observations: Vec<Observation> = (0..5)
            .map(|h| Observation::new("S1", start + ChronoDuration::hours(h), h as u64 + 1))
            .collect();
        let (schema, split, report) =
            prepare_features(&observations, &frame(0..5, start), None, &small_config()).unwrap();

        // Rolling window 2 needs two prior slots, so hours 0 and 1 are dropped.
        assert_eq!(report.grid_rows, 5);
        assert_eq!(report.dropped_rows, 2);
        assert_eq!(split.train.len(), 3);
        let first = &split.train[0];
        assert_eq!(first.timestamp, start + ChronoDuration::hours(2));
        assert_eq!(first.value(&schema, "dep_lag_1"), Some(2.0));
        assert_eq!(first.value(&schema, "dep_roll_mean_2"), Some(1.5));
        assert_eq!(first.value(&schema, "temperature"), Some(1.0));
    }

    #[test]
    fn required_policy_keeps_rows_missing_other_columns() {
        let start = at(2023, 6, 1, 0);
        let observations: Vec<Observation> = (0..4)
            .map(|h| Observation::new("S1", start + ChronoDuration::hours(h), 1))
            .collect();
        let cfg = FeatureConfig {
            drop_policy: DropPolicy::Required(vec!["dep_lag_1".to_string()]),
            ..small_config()
        };
        let (schema, split, report) =
            prepare_features(&observations, &frame(0..4, start), None, &cfg).unwrap();

        assert_eq!(report.dropped_rows, 1);
        assert_eq!(split.train.len(), 3);
        assert_eq!(split.train[0].value(&schema, "dep_roll_mean_2"), None);
    }

    #[test]
    fn unknown_required_column_is_a_config_error() {
        let cfg = FeatureConfig {
            drop_policy: DropPolicy::Required(vec!["nope".to_string()]),
            ..small_config()
        };
        let start = at(2023, 6, 1, 0);
        let err = prepare_features(
            &[Observation::new("S1", start, 1)],
            &frame(0..1, start),
            None,
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::UnknownRequiredColumn(_))
        ));
    }

    #[test]
    fn missing_exogenous_column_fails_fast() {
        let cfg = FeatureConfig {
            exogenous_columns: vec!["temperature".to_string(), "humidity".to_string()],
            ..small_config()
        };
        let start = at(2023, 6, 1, 0);
        let err = prepare_features(
            &[Observation::new("S1", start, 1)],
            &frame(0..1, start),
            None,
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(ref c) if c == "humidity"));
    }
}
