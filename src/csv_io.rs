//! CSV readers and writers for observation, covariate and feature tables.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use csv::StringRecord;
use thiserror::Error;
use tracing::info;

use crate::assemble::FeatureRow;
use crate::config::FeatureConfig;
use crate::schema::FeatureSchema;
use crate::series::{ExogenousFrame, Observation, SeriesError, StationAttributes};

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const OUTPUT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum CsvIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{path}: missing required column {column}")]
    MissingColumn { path: PathBuf, column: String },
    #[error("failed to parse field {field} value '{value}'")]
    ParseField { field: String, value: String },
    #[error("invalid row: {0}")]
    Row(#[from] SeriesError),
}

/// Pre-aggregated demand rows: entity, timestamp and target columns from `cfg`.
pub fn read_observations_csv(
    path: &Path,
    cfg: &FeatureConfig,
) -> Result<Vec<Observation>, CsvIoError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let entity_idx = header_index(path, &headers, &cfg.entity_column)?;
    let ts_idx = header_index(path, &headers, &cfg.timestamp_column)?;
    let target_idx = header_index(path, &headers, &cfg.target_column)?;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        out.push(Observation {
            entity_id: field(&record, entity_idx).to_string(),
            timestamp: parse_timestamp(&cfg.timestamp_column, field(&record, ts_idx))?,
            count: parse_count(&cfg.target_column, field(&record, target_idx))?,
        });
    }

    info!(
        component = "csv_io",
        event = "csv.observations.loaded",
        path = %path.display(),
        rows = out.len()
    );
    Ok(out)
}

/// Raw ride events: every row is one observation of count 1.
pub fn read_ride_events_csv(
    path: &Path,
    entity_column: &str,
    timestamp_column: &str,
) -> Result<Vec<Observation>, CsvIoError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let entity_idx = header_index(path, &headers, entity_column)?;
    let ts_idx = header_index(path, &headers, timestamp_column)?;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        out.push(Observation {
            entity_id: field(&record, entity_idx).to_string(),
            timestamp: parse_timestamp(timestamp_column, field(&record, ts_idx))?,
            count: 1,
        });
    }

    info!(
        component = "csv_io",
        event = "csv.ride_events.loaded",
        path = %path.display(),
        rows = out.len()
    );
    Ok(out)
}

/// Global covariates. Every column other than the timestamp must be numeric;
/// empty cells are missing.
pub fn read_exogenous_csv(
    path: &Path,
    timestamp_column: &str,
) -> Result<ExogenousFrame, CsvIoError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let ts_idx = header_index(path, &headers, timestamp_column)?;
    let value_indices: Vec<usize> = (0..headers.len()).filter(|idx| *idx != ts_idx).collect();

    let mut frame = ExogenousFrame::new(
        value_indices
            .iter()
            .map(|idx| headers[*idx].to_string())
            .collect(),
    );
    for record in reader.records() {
        let record = record?;
        let timestamp = parse_timestamp(timestamp_column, field(&record, ts_idx))?;
        let values = value_indices
            .iter()
            .map(|idx| parse_optional_f64(&headers[*idx], field(&record, *idx)))
            .collect::<Result<Vec<_>, _>>()?;
        frame.push_row(timestamp, values)?;
    }

    info!(
        component = "csv_io",
        event = "csv.exogenous.loaded",
        path = %path.display(),
        rows = frame.rows.len(),
        columns = ?frame.columns
    );
    Ok(frame)
}

/// Static numeric station attributes keyed by `entity_column`.
pub fn read_station_attributes_csv(
    path: &Path,
    entity_column: &str,
) -> Result<StationAttributes, CsvIoError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let entity_idx = header_index(path, &headers, entity_column)?;
    let value_indices: Vec<usize> = (0..headers.len()).filter(|idx| *idx != entity_idx).collect();

    let mut attributes = StationAttributes::new(
        value_indices
            .iter()
            .map(|idx| headers[*idx].to_string())
            .collect(),
    );
    for record in reader.records() {
        let record = record?;
        let values = value_indices
            .iter()
            .map(|idx| parse_optional_f64(&headers[*idx], field(&record, *idx)))
            .collect::<Result<Vec<_>, _>>()?;
        attributes.insert(field(&record, entity_idx), values)?;
    }
    Ok(attributes)
}

/// Writes `entity_column, timestamp_column, target_column` followed by every
/// schema column. Missing cells are written empty.
pub fn write_feature_table_csv(
    path: &Path,
    schema: &FeatureSchema,
    rows: &[FeatureRow],
    cfg: &FeatureConfig,
) -> Result<(), CsvIoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec![
        cfg.entity_column.as_str(),
        cfg.timestamp_column.as_str(),
        cfg.target_column.as_str(),
    ];
    header.extend(schema.column_names());
    writer.write_record(&header)?;

    for row in rows {
        let mut record = Vec::with_capacity(row.values.len() + 3);
        record.push(row.entity_id.clone());
        record.push(row.timestamp.format(OUTPUT_TIMESTAMP_FORMAT).to_string());
        record.push(row.target.to_string());
        record.extend(
            row.values
                .iter()
                .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        component = "csv_io",
        event = "csv.features.written",
        path = %path.display(),
        rows = rows.len(),
        columns = schema.columns.len()
    );
    Ok(())
}

/// Reads a table written by [`write_feature_table_csv`]; returns the feature
/// column names and the rows.
pub fn read_feature_table_csv(path: &Path) -> Result<(Vec<String>, Vec<FeatureRow>), CsvIoError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.len() < 3 {
        return Err(CsvIoError::MissingColumn {
            path: path.to_path_buf(),
            column: "entity, timestamp and target".to_string(),
        });
    }
    let columns: Vec<String> = headers.iter().skip(3).map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let values = (3..headers.len())
            .map(|idx| parse_optional_f64(&headers[idx], field(&record, idx)))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(FeatureRow {
            entity_id: field(&record, 0).to_string(),
            timestamp: parse_timestamp(&headers[1], field(&record, 1))?,
            target: parse_f64(&headers[2], field(&record, 2))?,
            values,
        });
    }
    Ok((columns, rows))
}

pub fn parse_timestamp(field: &str, raw: &str) -> Result<NaiveDateTime, CsvIoError> {
    let trimmed = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| CsvIoError::ParseField {
            field: field.to_string(),
            value: raw.to_string(),
        })
}

fn header_index(path: &Path, headers: &StringRecord, column: &str) -> Result<usize, CsvIoError> {
    headers
        .iter()
        .position(|header| header.trim() == column)
        .ok_or_else(|| CsvIoError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

fn field(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or_default()
}

fn parse_count(field: &str, raw: &str) -> Result<u64, CsvIoError> {
    let trimmed = raw.trim();
    // Pre-aggregated tables written by pandas often carry counts as "3.0".
    trimmed
        .parse::<u64>()
        .ok()
        .or_else(|| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                .map(|v| v as u64)
        })
        .ok_or_else(|| CsvIoError::ParseField {
            field: field.to_string(),
            value: raw.to_string(),
        })
}

fn parse_f64(field: &str, raw: &str) -> Result<f64, CsvIoError> {
    raw.trim().parse::<f64>().map_err(|_| CsvIoError::ParseField {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

fn parse_optional_f64(field: &str, raw: &str) -> Result<Option<f64>, CsvIoError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    parse_f64(field, trimmed).map(Some)
}
