use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use citybike_features::{
    log_app_start, log_outputs_written, prepare_features, ExogenousFrame, FeatureConfig,
    FeatureTransformReport, LoggingConfig, Observation,
};
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 6, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn sample_inputs(hours: i64) -> (Vec<Observation>, ExogenousFrame) {
    let observations = (0..hours)
        .map(|h| Observation::new("S1", start() + ChronoDuration::hours(h), 2))
        .collect();
    let mut frame = ExogenousFrame::new(vec![
        "temperature".to_string(),
        "precipitation".to_string(),
        "wind_speed".to_string(),
    ]);
    for h in 0..hours {
        let wind = if h == 3 { None } else { Some(3.0) };
        frame
            .push_row(
                start() + ChronoDuration::hours(h),
                vec![Some(18.0), Some(0.0), wind],
            )
            .expect("row width matches columns");
    }
    (observations, frame)
}

#[test]
fn pipeline_emits_stage_events() {
    let cfg = FeatureConfig {
        lags: vec![1],
        rolling_windows: vec![2],
        same_hour_windows: vec![],
        ..FeatureConfig::default()
    };
    let (observations, frame) = sample_inputs(8);

    let logs = capture_logs(Level::INFO, || {
        let (_, split, _) = prepare_features(&observations, &frame, None, &cfg)
            .expect("pipeline should succeed on well-formed input");
        assert!(!split.train.is_empty());
    });

    assert!(logs.contains("\"event\":\"features.prepare.start\""));
    assert!(logs.contains("\"event\":\"features.schema.built\""));
    assert!(logs.contains("\"event\":\"grid.build.finish\""));
    assert!(logs.contains("\"event\":\"gaps.handle.finish\""));
    assert!(logs.contains("\"event\":\"features.prepare.finish\""));
    assert!(!logs.contains("\"event\":\"features.entity.empty\""));
    assert!(!logs.contains("\"event\":\"gaps.handle.block\""));
}

#[test]
fn entity_without_full_lookback_is_reported() {
    let (observations, frame) = sample_inputs(6);

    let logs = capture_logs(Level::WARN, || {
        let (_, split, report) =
            prepare_features(&observations, &frame, None, &FeatureConfig::default())
                .expect("short history is not an error");
        assert!(split.train.is_empty());
        assert_eq!(report.empty_entities, vec!["S1".to_string()]);
    });

    assert!(logs.contains("\"event\":\"features.entity.empty\""));
    assert!(!logs.contains("\"event\":\"features.prepare.finish\""));
}

#[test]
fn gap_blocks_are_logged_at_debug() {
    let (observations, frame) = sample_inputs(8);

    let logs = capture_logs(Level::DEBUG, || {
        prepare_features(&observations, &frame, None, &FeatureConfig::default())
            .expect("pipeline should succeed");
    });

    assert!(logs.contains("\"event\":\"gaps.handle.block\""));
    assert!(logs.contains("\"event\":\"grid.entity.filled\""));
    assert!(logs.contains("\"event\":\"features.entity.assembled\""));
}

#[test]
fn app_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        log_app_start(&LoggingConfig::default(), &FeatureConfig::default());
        log_outputs_written(
            Path::new("out/train.csv"),
            Path::new("out/test.csv"),
            &FeatureTransformReport::default(),
        );
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"app.outputs.written\""));
    assert!(logs.contains("\"frequency\":\"1h\""));
}
