//! Leakage-free hourly feature tables for per-station bike demand.
//!
//! Pipeline: dense season grid, gap handling of sparse covariates, lag,
//! rolling and same-hour target statistics, calendar features, one-period
//! covariate shift, then row filtering and a calendar-year train / test split.

mod assemble;
mod calendar;
mod config;
mod csv_io;
mod exogenous;
mod gaps;
mod grid;
mod lags;
mod observability;
mod rolling;
mod same_hour;
mod schema;
mod series;

pub use assemble::{
    assemble_entity, prepare_features, split_by_year, FeatureRow, FeatureSplit,
    FeatureTransformReport, PipelineError,
};
pub use calendar::{CalendarFeatures, CALENDAR_COLUMNS};
pub use config::{
    feature_config_from_file, ConfigError, DropPolicy, FeatureConfig, Frequency, SeasonMonths,
    MAX_LOOKBACK_DAYS,
};
pub use csv_io::{
    parse_timestamp, read_exogenous_csv, read_feature_table_csv, read_observations_csv,
    read_ride_events_csv, read_station_attributes_csv, write_feature_table_csv, CsvIoError,
};
pub use exogenous::{prepare_exogenous, shift_exogenous, PreparedExogenous};
pub use gaps::{
    find_gap_segments, flag_column_name, handle_gaps, handle_gaps_contiguous, GapFillResult,
    GapResolution, GapSegment, DEFAULT_GAP_THRESHOLD, GAP_SENTINEL,
};
pub use grid::{build_dense_grid, season_timeline, select_entities, DenseGrid};
pub use lags::lag_features;
pub use observability::{
    init_logging, log_app_start, log_outputs_written, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use rolling::rolling_features;
pub use same_hour::same_hour_features;
pub use schema::{
    assert_schema_compatible, build_feature_schema, lag_column_name, rolling_mean_column_name,
    rolling_std_column_name, same_hour_mean_column_name, same_hour_std_column_name, FeatureColumn,
    FeatureKind, FeatureSchema, SchemaError, FEATURE_SCHEMA_VERSION, RAIN_COLUMN,
};
pub use series::{
    target_abbreviation, DerivedColumn, EntitySeries, ExogenousFrame, ExogenousRow, Observation,
    SeriesError, SeriesPoint, StationAttributes,
};
