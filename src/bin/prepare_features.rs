use std::env;
use std::path::PathBuf;

use citybike_features::{
    feature_config_from_file, init_logging, log_app_start, log_outputs_written,
    logging_config_from_env, prepare_features, read_exogenous_csv, read_observations_csv,
    read_ride_events_csv, read_station_attributes_csv, write_feature_table_csv, FeatureConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let cfg = match env::var("CITYBIKE_CONFIG") {
        Ok(path) => feature_config_from_file(&PathBuf::from(path))?,
        Err(_) => FeatureConfig::default(),
    };
    log_app_start(&logging_cfg, &cfg);

    // Pre-aggregated observations win over raw ride events when both are set.
    let observations = match (
        env::var("CITYBIKE_OBSERVATIONS"),
        env::var("CITYBIKE_RIDE_EVENTS"),
    ) {
        (Ok(path), _) => read_observations_csv(&PathBuf::from(path), &cfg)?,
        (Err(_), Ok(path)) => read_ride_events_csv(
            &PathBuf::from(path),
            &env_or("CITYBIKE_EVENT_ENTITY_COLUMN", "departure_id"),
            &env_or("CITYBIKE_EVENT_TIMESTAMP_COLUMN", "departure"),
        )?,
        (Err(_), Err(_)) => {
            return Err("set CITYBIKE_OBSERVATIONS or CITYBIKE_RIDE_EVENTS".into());
        }
    };

    let weather_path = env_or("CITYBIKE_WEATHER", "data/clean/weather_cleaned.csv");
    let exogenous = read_exogenous_csv(&PathBuf::from(weather_path), &cfg.timestamp_column)?;

    let attributes = match env::var("CITYBIKE_STATIONS") {
        Ok(path) => Some(read_station_attributes_csv(
            &PathBuf::from(path),
            &cfg.entity_column,
        )?),
        Err(_) => None,
    };

    let (schema, split, report) =
        prepare_features(&observations, &exogenous, attributes.as_ref(), &cfg)?;

    let output_dir = PathBuf::from(env_or("CITYBIKE_OUTPUT_DIR", "data/processed"));
    let train_path = output_dir.join("train.csv");
    let test_path = output_dir.join("test.csv");
    write_feature_table_csv(&train_path, &schema, &split.train, &cfg)?;
    write_feature_table_csv(&test_path, &schema, &split.test, &cfg)?;
    log_outputs_written(&train_path, &test_path, &report);

    println!(
        "features: train={} test={} dropped={} schema={}",
        report.train_rows, report.test_rows, report.dropped_rows, schema.fingerprint
    );

    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
