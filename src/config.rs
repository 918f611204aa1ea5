//! Feature engine configuration.
//!
//! Every tunable of the engine lives in [`FeatureConfig`]. Defaults mirror the
//! Helsinki city-bike setup: hourly departures, April to October, 2024 held out.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{feature_columns, first_duplicate, FEATURE_SCHEMA_VERSION};

const MINUTES_PER_DAY: u32 = 24 * 60;
/// Upper bound on how far back any lag or window may reach.
pub const MAX_LOOKBACK_DAYS: u32 = 3660;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid frequency: {0}")]
    InvalidFrequency(String),
    #[error("invalid feature config: {0}")]
    InvalidConfig(String),
    #[error("unknown required column: {0}")]
    UnknownRequiredColumn(String),
    #[error("feature column {0} would be produced twice")]
    DuplicateColumn(String),
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Sampling step of the dense grid. Must divide a day evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Frequency {
    minutes: u32,
}

impl Frequency {
    pub const HOURLY: Frequency = Frequency { minutes: 60 };

    pub fn from_minutes(minutes: u32) -> Result<Self, ConfigError> {
        if minutes == 0 || MINUTES_PER_DAY % minutes != 0 {
            return Err(ConfigError::InvalidFrequency(format!(
                "{minutes} minutes does not divide a day"
            )));
        }
        Ok(Self { minutes })
    }

    pub fn minutes(self) -> u32 {
        self.minutes
    }

    pub fn step(self) -> ChronoDuration {
        ChronoDuration::minutes(i64::from(self.minutes))
    }

    /// Offset of `periods` steps, used for lag and same-hour lookups. `None`
    /// when the offset does not fit a `Duration`.
    pub fn steps(self, periods: u32) -> Option<ChronoDuration> {
        i64::from(self.minutes)
            .checked_mul(i64::from(periods))
            .and_then(ChronoDuration::try_minutes)
    }

    pub fn periods_per_day(self) -> u32 {
        MINUTES_PER_DAY / self.minutes
    }

    /// Floors `ts` to the start of the slot it falls in.
    pub fn floor(self, ts: NaiveDateTime) -> NaiveDateTime {
        let minute_of_day = ts.hour() * 60 + ts.minute();
        let floored = minute_of_day - minute_of_day % self.minutes;
        ts.date().and_time(NaiveTime::MIN) + ChronoDuration::minutes(i64::from(floored))
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self::HOURLY
    }
}

impl FromStr for Frequency {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ConfigError::InvalidFrequency(raw.to_string()))?;
        let (count, unit) = trimmed.split_at(split);
        let count = if count.is_empty() {
            1
        } else {
            count
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidFrequency(raw.to_string()))?
        };
        let unit_minutes = match unit {
            "h" | "H" => 60,
            "min" | "T" => 1,
            _ => return Err(ConfigError::InvalidFrequency(raw.to_string())),
        };
        let minutes = count
            .checked_mul(unit_minutes)
            .ok_or_else(|| ConfigError::InvalidFrequency(raw.to_string()))?;
        Self::from_minutes(minutes)
    }
}

impl TryFrom<String> for Frequency {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Frequency> for String {
    fn from(freq: Frequency) -> Self {
        freq.to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minutes % 60 == 0 {
            write!(f, "{}h", self.minutes / 60)
        } else {
            write!(f, "{}min", self.minutes)
        }
    }
}

/// Inclusive month range of the operating season. `start > end` wraps the new year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonMonths {
    pub start: u32,
    pub end: u32,
}

impl SeasonMonths {
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        let month = ts.month();
        if self.start <= self.end {
            (self.start..=self.end).contains(&month)
        } else {
            month >= self.start || month <= self.end
        }
    }
}

impl Default for SeasonMonths {
    fn default() -> Self {
        Self { start: 4, end: 10 }
    }
}

/// Which missing cells cause a row to be dropped before the split.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Drop a row if any schema column is missing.
    #[default]
    AnyMissing,
    /// Drop a row only if one of the named columns is missing.
    Required(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub target_column: String,
    pub entity_column: String,
    pub timestamp_column: String,
    pub frequency: Frequency,
    pub lags: Vec<u32>,
    pub rolling_windows: Vec<u32>,
    pub same_hour_windows: Vec<u32>,
    pub exogenous_columns: Vec<String>,
    pub gap_handled_columns: Vec<String>,
    pub gap_threshold: usize,
    pub season: SeasonMonths,
    pub test_start_year: i32,
    pub entity_limit: Option<usize>,
    pub rain_column: Option<String>,
    pub drop_policy: DropPolicy,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            target_column: "departures".to_string(),
            entity_column: "station_id".to_string(),
            timestamp_column: "time".to_string(),
            frequency: Frequency::HOURLY,
            lags: vec![1, 2, 3, 6, 12, 18, 24, 48, 72, 168],
            rolling_windows: vec![3, 24, 168],
            same_hour_windows: vec![3, 7],
            exogenous_columns: vec![
                "temperature".to_string(),
                "precipitation".to_string(),
                "wind_speed".to_string(),
            ],
            gap_handled_columns: vec!["wind_speed".to_string()],
            gap_threshold: crate::gaps::DEFAULT_GAP_THRESHOLD,
            season: SeasonMonths::default(),
            test_start_year: 2024,
            entity_limit: None,
            rain_column: Some("precipitation".to_string()),
            drop_policy: DropPolicy::AnyMissing,
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_column.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "target_column must not be empty".to_string(),
            ));
        }

        if self.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(ConfigError::InvalidConfig(format!(
                "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
            )));
        }

        let max_periods = MAX_LOOKBACK_DAYS * self.frequency.periods_per_day();
        validate_offsets("lags", &self.lags, max_periods)?;
        validate_offsets("rolling_windows", &self.rolling_windows, max_periods)?;
        validate_offsets("same_hour_windows", &self.same_hour_windows, MAX_LOOKBACK_DAYS)?;

        for (name, month) in [("season.start", self.season.start), ("season.end", self.season.end)] {
            if !(1..=12).contains(&month) {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be a month in 1..=12, got {month}"
                )));
            }
        }

        let mut seen = HashSet::new();
        for column in &self.exogenous_columns {
            if !seen.insert(column.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "exogenous column {column} listed twice"
                )));
            }
        }

        for column in &self.gap_handled_columns {
            if !seen.contains(column.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "gap-handled column {column} is not an exogenous column"
                )));
            }
        }

        if let Some(rain) = &self.rain_column {
            if !seen.contains(rain.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "rain column {rain} is not an exogenous column"
                )));
            }
        }

        let columns = feature_columns(self, &[]);
        let names = [
            self.entity_column.as_str(),
            self.timestamp_column.as_str(),
            self.target_column.as_str(),
        ]
        .into_iter()
        .chain(columns.iter().map(|column| column.name.as_str()));
        if let Some(name) = first_duplicate(names) {
            return Err(ConfigError::DuplicateColumn(name.to_string()));
        }

        if self.entity_limit == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "entity_limit must be > 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Longest lookback of any engineered feature, in periods.
    pub fn max_lookback_periods(&self) -> u32 {
        let lag = self.lags.iter().copied().max().unwrap_or(0);
        let rolling = self.rolling_windows.iter().copied().max().unwrap_or(0);
        let same_hour = self
            .same_hour_windows
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            .saturating_mul(self.frequency.periods_per_day());
        lag.max(rolling).max(same_hour)
    }
}

pub fn feature_config_from_file(path: &Path) -> Result<FeatureConfig, ConfigError> {
    let raw = fs::read_to_string(path)?;
    let cfg: FeatureConfig = serde_json::from_str(&raw)?;
    cfg.validate()?;
    Ok(cfg)
}

fn validate_offsets(name: &str, values: &[u32], max: u32) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for value in values {
        if *value == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "{name} entries must be > 0"
            )));
        }
        if *value > max {
            return Err(ConfigError::InvalidConfig(format!(
                "{name} entry {value} exceeds {max}"
            )));
        }
        if !seen.insert(*value) {
            return Err(ConfigError::InvalidConfig(format!(
                "{name} entries must be unique"
            )));
        }
    }
    Ok(())
}
