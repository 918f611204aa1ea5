//! Input observations, covariate frames and per-entity series.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesError {
    #[error("row at {timestamp} has {found} values, expected {expected}")]
    RowWidth {
        timestamp: NaiveDateTime,
        found: usize,
        expected: usize,
    },
    #[error("column {0} not found")]
    MissingColumn(String),
}

/// One raw or pre-aggregated demand record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: String,
    pub timestamp: NaiveDateTime,
    pub count: u64,
}

impl Observation {
    pub fn new(entity_id: impl Into<String>, timestamp: NaiveDateTime, count: u64) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExogenousRow {
    pub timestamp: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

/// Global covariates (weather), one row per timestamp, shared by all entities.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExogenousFrame {
    pub columns: Vec<String>,
    pub rows: Vec<ExogenousRow>,
}

impl ExogenousFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(
        &mut self,
        timestamp: NaiveDateTime,
        values: Vec<Option<f64>>,
    ) -> Result<(), SeriesError> {
        if values.len() != self.columns.len() {
            return Err(SeriesError::RowWidth {
                timestamp,
                found: values.len(),
                expected: self.columns.len(),
            });
        }
        self.rows.push(ExogenousRow { timestamp, values });
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Values of `column` at each `timeline` slot; `None` where the frame has no row.
    /// Duplicate timestamps resolve to the last row.
    pub fn align(
        &self,
        column: &str,
        timeline: &[NaiveDateTime],
    ) -> Result<Vec<Option<f64>>, SeriesError> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| SeriesError::MissingColumn(column.to_string()))?;

        let mut by_ts: HashMap<NaiveDateTime, Option<f64>> = HashMap::with_capacity(self.rows.len());
        let mut duplicates = 0usize;
        for row in &self.rows {
            let value = row.values.get(idx).copied().flatten().filter(|v| !v.is_nan());
            if by_ts.insert(row.timestamp, value).is_some() {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(
                component = "series",
                event = "series.exogenous.duplicate_timestamps",
                column,
                duplicates
            );
        }

        Ok(timeline
            .iter()
            .map(|ts| by_ts.get(ts).copied().flatten())
            .collect())
    }
}

/// Static numeric attributes per entity (station lat / lon / capacity).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StationAttributes {
    pub columns: Vec<String>,
    pub by_entity: HashMap<String, Vec<Option<f64>>>,
}

impl StationAttributes {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            by_entity: HashMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        entity_id: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), SeriesError> {
        let entity_id = entity_id.into();
        if values.len() != self.columns.len() {
            return Err(SeriesError::MissingColumn(format!(
                "{entity_id}: got {} attribute values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.by_entity.insert(entity_id, values);
        Ok(())
    }

    /// Attribute values for `entity_id`, ordered by column name.
    pub fn sorted_for(&self, entity_id: &str) -> Vec<(String, Option<f64>)> {
        let values = self.by_entity.get(entity_id);
        let mut out: Vec<(String, Option<f64>)> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let value = values.and_then(|v| v.get(idx).copied().flatten());
                (name.clone(), value)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: NaiveDateTime,
    pub target: f64,
    pub exogenous: Vec<Option<f64>>,
}

impl SeriesPoint {
    pub fn new(timestamp: NaiveDateTime, target: f64) -> Self {
        Self {
            timestamp,
            target,
            exogenous: Vec::new(),
        }
    }
}

/// One entity's rows, sorted by timestamp with unique timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySeries {
    entity_id: String,
    exogenous_columns: Vec<String>,
    points: Vec<SeriesPoint>,
    attributes: Vec<(String, Option<f64>)>,
}

impl EntitySeries {
    /// Builds a series from unordered points. A repeated timestamp keeps its last point.
    pub fn new(
        entity_id: impl Into<String>,
        exogenous_columns: Vec<String>,
        mut points: Vec<SeriesPoint>,
    ) -> Result<Self, SeriesError> {
        for point in &points {
            if point.exogenous.len() != exogenous_columns.len() {
                return Err(SeriesError::RowWidth {
                    timestamp: point.timestamp,
                    found: point.exogenous.len(),
                    expected: exogenous_columns.len(),
                });
            }
        }

        points.sort_by_key(|point| point.timestamp);
        let mut deduped: Vec<SeriesPoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }

        Ok(Self {
            entity_id: entity_id.into(),
            exogenous_columns,
            points: deduped,
            attributes: Vec::new(),
        })
    }

    /// Target-only series, convenient for the lag / rolling / same-hour generators.
    pub fn from_targets(
        entity_id: impl Into<String>,
        targets: impl IntoIterator<Item = (NaiveDateTime, f64)>,
    ) -> Self {
        let mut points: Vec<SeriesPoint> = targets
            .into_iter()
            .map(|(ts, target)| SeriesPoint::new(ts, target))
            .collect();
        points.sort_by_key(|point| point.timestamp);
        points.dedup_by(|next, kept| {
            if next.timestamp == kept.timestamp {
                kept.target = next.target;
                true
            } else {
                false
            }
        });
        Self {
            entity_id: entity_id.into(),
            exogenous_columns: Vec::new(),
            points,
            attributes: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<(String, Option<f64>)>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn exogenous_columns(&self) -> &[String] {
        &self.exogenous_columns
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn attributes(&self) -> &[(String, Option<f64>)] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn position(&self, ts: NaiveDateTime) -> Option<usize> {
        self.points
            .binary_search_by_key(&ts, |point| point.timestamp)
            .ok()
    }

    pub fn target_at(&self, ts: NaiveDateTime) -> Option<f64> {
        self.position(ts).map(|idx| self.points[idx].target)
    }
}

/// A derived feature column aligned with the points of one [`EntitySeries`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl DerivedColumn {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// First three characters of the target column, used as the feature prefix.
pub fn target_abbreviation(target_column: &str) -> String {
    target_column.chars().take(3).collect()
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator); undefined below two values.
pub(crate) fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let variance = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    Some(variance.sqrt())
}
