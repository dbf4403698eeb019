use demcompare::core::pipeline::{CoregistrationResult, StatsConfig, StatsPipeline};
use demcompare::core::support::UserSupports;
use demcompare::io::baseline::{compare_with_baseline, DEFAULT_EPSILON};
use demcompare::io::GridResampler;
use demcompare::types::{DemError, ElevationRaster, GeoTransform};
use ndarray::Array2;
use std::path::Path;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 10x10 bell-shaped errors in half-meter steps
fn bell_errors() -> ElevationRaster {
    let mut values = Vec::new();
    for (offset, copies) in [(-3, 1), (-2, 6), (-1, 24), (0, 38), (1, 24), (2, 6), (3, 1)] {
        values.extend(std::iter::repeat(offset as f32 * 0.5).take(copies));
    }
    let data = Array2::from_shape_vec((10, 10), values).unwrap();
    ElevationRaster::from_array(data, GeoTransform::default(), "EPSG:32631", -32768.0)
}

fn run_into(dir: &Path) {
    let dh = bell_errors();
    let flat = ElevationRaster::from_array(
        Array2::from_elem((10, 10), 50.0),
        GeoTransform::default(),
        "EPSG:32631",
        -32768.0,
    );
    let coreg = CoregistrationResult {
        x_bias: 0.5,
        y_bias: -0.25,
        z_bias: 0.1,
        coreg_dsm: flat.clone(),
        coreg_ref: flat,
        final_dh: dh,
    };
    let config = StatsConfig {
        bin_step: 0.5,
        ..StatsConfig::default()
    };
    let pipeline = StatsPipeline::new(config, &GridResampler).expect("Invalid config");
    let report = pipeline
        .run(&coreg, &UserSupports::default(), dir)
        .expect("Pipeline failed");

    let histograms = report.modes[0].histograms.as_ref().expect("No histograms");
    assert!(histograms.gaussian_plot.exists());
    assert_eq!(report.biases.dy_pixels, 0.25);
}

#[test]
fn test_identical_runs_match_baseline() {
    init_logger();
    let baseline = tempfile::tempdir().expect("Failed to create baseline dir");
    let current = tempfile::tempdir().expect("Failed to create output dir");
    run_into(baseline.path());
    run_into(current.path());

    compare_with_baseline(baseline.path(), current.path(), DEFAULT_EPSILON)
        .expect("Identical runs should match");
}

#[test]
fn test_modified_value_is_reported() {
    init_logger();
    let baseline = tempfile::tempdir().expect("Failed to create baseline dir");
    let current = tempfile::tempdir().expect("Failed to create output dir");
    run_into(baseline.path());
    run_into(current.path());

    let csv_path = current.path().join("stats_results_standard.csv");
    let content = std::fs::read_to_string(&csv_path).unwrap();
    assert!(content.contains("\"All classes considered\",100.0,"));
    let tampered = content.replacen("\"All classes considered\",100.0,", "\"All classes considered\",99.0,", 1);
    std::fs::write(&csv_path, tampered).unwrap();

    match compare_with_baseline(baseline.path(), current.path(), DEFAULT_EPSILON) {
        Err(DemError::BaselineMismatch(differences)) => {
            assert_eq!(differences.len(), 1);
            let diff = &differences[0];
            assert_eq!(diff.stat_name, "% Of Valid Points");
            assert_eq!(diff.class_name, "All classes considered");
            assert_eq!(diff.baseline_val, 100.0);
            assert_eq!(diff.test_val, 99.0);
        }
        other => panic!("Expected a baseline mismatch, got {:?}", other),
    }
}
