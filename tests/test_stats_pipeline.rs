use demcompare::core::gaussian_fit::GaussianFitConfig;
use demcompare::core::pipeline::{CoregistrationResult, StatsConfig, StatsPipeline};
use demcompare::core::support::UserSupports;
use demcompare::core::Mode;
use demcompare::io::GridResampler;
use demcompare::types::{DemError, ElevationRaster, GeoTransform};
use ndarray::Array2;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn raster(data: Array2<f32>, nodata: f64) -> ElevationRaster {
    ElevationRaster::from_array(
        data,
        GeoTransform::north_up(500000.0, 4500000.0, 1.0, -1.0),
        "EPSG:32631",
        nodata,
    )
}

fn coregistration(dh: ElevationRaster) -> CoregistrationResult {
    let shape = dh.shape();
    CoregistrationResult {
        x_bias: 0.0,
        y_bias: 0.0,
        z_bias: 0.0,
        coreg_dsm: raster(Array2::from_elem(shape, 100.0), -32768.0),
        coreg_ref: raster(Array2::from_elem(shape, 100.0), -32768.0),
        final_dh: dh,
    }
}

#[test]
fn test_identical_dems_without_classification() {
    init_logger();
    let output = tempfile::tempdir().expect("Failed to create output dir");

    let mut values = Array2::<f32>::zeros((4, 4));
    values[[0, 3]] = -9999.0;
    let coreg = coregistration(raster(values, -9999.0));

    let pipeline = StatsPipeline::new(StatsConfig::default(), &GridResampler).expect("Invalid config");
    let report = pipeline
        .run(&coreg, &UserSupports::default(), output.path())
        .expect("Pipeline failed");

    assert_eq!(report.modes.len(), 1);
    assert!(report.incoherent_pixels.is_none());
    assert_eq!(report.dh.nb_valid_points, 15);

    let standard = report.mode(Mode::Standard).expect("No standard mode");
    assert_eq!(standard.records.len(), 1);
    let all = &standard.records[0];
    assert_eq!(all.class_label, "all");
    assert_eq!(all.count, 15);
    assert_eq!(all.mean, 0.0);
    assert_eq!(all.std, 0.0);
    assert_eq!(all.rmse, 0.0);
    assert_eq!(all.median, 0.0);
    assert_eq!(all.nmad, 0.0);
    assert_eq!(all.percent, 93.75);

    // constant errors: histogram saved, no gaussian fitted
    let histograms = standard.histograms.as_ref().expect("No histograms");
    assert!(histograms.bins_file.exists());
    assert!(histograms.histogram_plot.exists());
    assert!(histograms.gaussian_plot.exists());
    assert_eq!(histograms.counts.len(), 1);

    let json_path = output.path().join("stats_results_standard.json");
    assert_eq!(standard.files.json, json_path);
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json["0"]["nbpts"], 15);
    assert_eq!(json["0"]["%"], 93.75);
    assert!(json["0"]["plot_file"].as_str().unwrap().ends_with("standard0.json"));

    let csv = std::fs::read_to_string(output.path().join("stats_results_standard.csv")).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].starts_with("\"All classes considered\",93.75,0.0,0.0,0.0,0.0,0.0,0.0,0.0,0.0"));
}

#[test]
fn test_optional_outputs() {
    init_logger();
    let output = tempfile::tempdir().expect("Failed to create output dir");

    let values = Array2::from_shape_fn((5, 8), |(i, j)| ((i + j) % 3) as f32 - 1.0);
    let coreg = coregistration(raster(values, -32768.0));
    let config = StatsConfig {
        plot_histograms: false,
        to_csv: false,
        wave_detection: true,
        plot_dem_diff: true,
        ..StatsConfig::default()
    };

    let pipeline = StatsPipeline::new(config, &GridResampler).expect("Invalid config");
    let report = pipeline
        .run(&coreg, &UserSupports::default(), output.path())
        .expect("Pipeline failed");

    let standard = report.mode(Mode::Standard).unwrap();
    assert!(standard.histograms.is_none());
    assert!(standard.files.csv.is_none());
    assert!(!output.path().join("stats_results_standard.csv").exists());

    for name in ["dem_diff", "row_wise", "col_wise"] {
        let path = report.images.get(name).expect("Missing image");
        assert!(path.exists(), "{} was not written", path.display());
    }
    assert!(output.path().join("dh_row_wise_wave_detection.tif").exists());
}

#[test]
fn test_fit_failure_aborts_run() {
    init_logger();
    let output = tempfile::tempdir().expect("Failed to create output dir");

    let mut values = Vec::new();
    for (offset, copies) in [(-3, 1), (-2, 6), (-1, 24), (0, 38), (1, 24), (2, 6), (3, 1)] {
        values.extend(std::iter::repeat(offset as f32 * 0.5).take(copies));
    }
    let dh = Array2::from_shape_vec((10, 10), values).unwrap();
    let coreg = coregistration(raster(dh, -32768.0));
    let config = StatsConfig {
        bin_step: 0.5,
        ..StatsConfig::default()
    };

    let pipeline = StatsPipeline::new(config, &GridResampler)
        .expect("Invalid config")
        .with_fit_config(GaussianFitConfig {
            max_iterations: 1,
            ..GaussianFitConfig::default()
        });
    let result = pipeline.run(&coreg, &UserSupports::default(), output.path());

    assert!(matches!(
        result,
        Err(DemError::FitConvergence { ref label, .. }) if label == "all"
    ));
    assert!(!output.path().join("stats_results_standard.json").exists());
}
