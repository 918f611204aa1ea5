//! Feature table schema: column order, naming scheme and fingerprint.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::calendar::CALENDAR_COLUMNS;
use crate::config::{ConfigError, FeatureConfig};
use crate::gaps::flag_column_name;
use crate::series::target_abbreviation;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const RAIN_COLUMN: &str = "rain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Calendar,
    Attribute,
    Lag,
    RollingMean,
    RollingStd,
    SameHourMean,
    SameHourStd,
    Exogenous,
    GapFlag,
    Rain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub kind: FeatureKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

pub fn lag_column_name(abbr: &str, lag: u32) -> String {
    format!("{abbr}_lag_{lag}")
}

pub fn rolling_mean_column_name(abbr: &str, window: u32) -> String {
    format!("{abbr}_roll_mean_{window}")
}

pub fn rolling_std_column_name(abbr: &str, window: u32) -> String {
    format!("{abbr}_roll_std_{window}")
}

pub fn same_hour_mean_column_name(abbr: &str, days: u32) -> String {
    format!("{abbr}_same_hour_mean_{days}d")
}

pub fn same_hour_std_column_name(abbr: &str, days: u32) -> String {
    format!("{abbr}_same_hour_std_{days}d")
}

/// Column order: calendar, static attributes (sorted), lags, rolling, same-hour,
/// shifted covariates, gap flags, rain. Column names must be unique.
pub fn build_feature_schema(
    cfg: &FeatureConfig,
    attribute_columns: &[String],
) -> Result<FeatureSchema, ConfigError> {
    let columns = feature_columns(cfg, attribute_columns);
    if let Some(name) = first_duplicate(columns.iter().map(|column| column.name.as_str())) {
        return Err(ConfigError::DuplicateColumn(name.to_string()));
    }

    let fingerprint = schema_fingerprint(cfg, &columns);

    info!(
        component = "schema",
        event = "features.schema.built",
        version = cfg.schema_version,
        column_count = columns.len(),
        fingerprint = fingerprint.as_str()
    );

    Ok(FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    })
}

pub(crate) fn feature_columns(
    cfg: &FeatureConfig,
    attribute_columns: &[String],
) -> Vec<FeatureColumn> {
    let abbr = target_abbreviation(&cfg.target_column);
    let mut columns = Vec::new();
    let mut push = |name: String, kind: FeatureKind| columns.push(FeatureColumn { name, kind });

    for name in CALENDAR_COLUMNS {
        push(name.to_string(), FeatureKind::Calendar);
    }

    let mut attributes = attribute_columns.to_vec();
    attributes.sort();
    for name in attributes {
        push(name, FeatureKind::Attribute);
    }

    for lag in &cfg.lags {
        push(lag_column_name(&abbr, *lag), FeatureKind::Lag);
    }
    for window in &cfg.rolling_windows {
        push(rolling_mean_column_name(&abbr, *window), FeatureKind::RollingMean);
        push(rolling_std_column_name(&abbr, *window), FeatureKind::RollingStd);
    }
    for days in &cfg.same_hour_windows {
        push(same_hour_mean_column_name(&abbr, *days), FeatureKind::SameHourMean);
        push(same_hour_std_column_name(&abbr, *days), FeatureKind::SameHourStd);
    }
    for name in &cfg.exogenous_columns {
        push(name.clone(), FeatureKind::Exogenous);
    }
    for name in &cfg.gap_handled_columns {
        push(flag_column_name(name), FeatureKind::GapFlag);
    }
    if cfg.rain_column.is_some() {
        push(RAIN_COLUMN.to_string(), FeatureKind::Rain);
    }
    columns
}

pub(crate) fn first_duplicate<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = HashSet::new();
    names.into_iter().find(|name| !seen.insert(*name))
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), SchemaError> {
    if expected_version != actual.version {
        return Err(SchemaError::VersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(SchemaError::FingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(cfg: &FeatureConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update(format!("frequency:{};", cfg.frequency));
    hasher.update(format!("target:{};", cfg.target_column));
    hasher.update(format!("gap_threshold:{};", cfg.gap_threshold));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{:?};", column.kind));
    }
    hex::encode(hasher.finalize())
}
