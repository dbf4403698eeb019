//! Run driver: configuration, stage ordering and the final report.
//!
//! Each stage returns its artifacts explicitly; [`StatsPipeline::run`]
//! assembles them into a [`StatsReport`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::classification::{build_classes, ClassRange, ClassSet, ClassType, ClassifiedImage, MAX_CLASSES};
use crate::core::cross_classification::reconcile;
use crate::core::gaussian_fit::GaussianFitConfig;
use crate::core::histogram::compute_histograms;
use crate::core::masks::{compose_masks, MaskSet, Mode};
use crate::core::statistics::{compute_stats, StatsRecord};
use crate::core::support::{prepare_supports, PreparedSupports, SupportInputs, UserSupports};
use crate::core::wave_detection::detect_waves;
use crate::io::dem::DemReader;
use crate::io::histogram_export::save_histogram_counts;
use crate::io::plot::{plot_dem_diff, plot_gaussian_fits, plot_histograms};
use crate::io::reproject::Reprojector;
use crate::io::stats_export::{save_results, PlottedClass, SavedStats};
use crate::types::{DemError, DemResult, ElevationRaster};

/// Options of the statistics stage, validated once by [`StatsPipeline::new`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub class_type: ClassType,
    /// Class boundaries `[b0, b1, ..., bn]`
    pub class_range: Vec<f64>,
    pub cross_classification: bool,
    pub remove_outliers: bool,
    /// Histogram bin width, in elevation units
    pub bin_step: f64,
    pub to_csv: bool,
    pub plot_histograms: bool,
    pub wave_detection: bool,
    pub plot_dem_diff: bool,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            class_type: ClassType::None,
            class_range: Vec::new(),
            cross_classification: false,
            remove_outliers: true,
            bin_step: 0.1,
            to_csv: true,
            plot_histograms: true,
            wave_detection: false,
            plot_dem_diff: false,
        }
    }
}

impl StatsConfig {
    /// Check option consistency
    pub fn validate(&self) -> DemResult<()> {
        self.checked_class_range().map(|_| ())
    }

    /// Validated class boundaries, `None` when classification is off
    fn checked_class_range(&self) -> DemResult<Option<ClassRange>> {
        if !(self.bin_step.is_finite() && self.bin_step > 0.0) {
            return Err(DemError::Configuration(format!(
                "bin_step must be a positive number, got {}",
                self.bin_step
            )));
        }
        if !self.class_type.is_active() {
            if self.cross_classification {
                log::warn!("cross_classification is ignored without a class_type");
            }
            return Ok(None);
        }
        let range = ClassRange::new(self.class_range.clone())?;
        if range.len() > MAX_CLASSES {
            return Err(DemError::UnsupportedClassCount(range.len()));
        }
        Ok(Some(range))
    }
}

/// Outputs of the co-registration step consumed by the statistics stage
#[derive(Debug, Clone)]
pub struct CoregistrationResult {
    pub x_bias: f64,
    pub y_bias: f64,
    pub z_bias: f64,
    pub coreg_dsm: ElevationRaster,
    pub coreg_ref: ElevationRaster,
    /// `coreg_dsm - coreg_ref`
    pub final_dh: ElevationRaster,
}

/// Validity counts of one raster
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RasterSummary {
    pub nb_points: usize,
    pub nb_valid_points: usize,
}

impl RasterSummary {
    pub fn of(raster: &ElevationRaster) -> Self {
        Self {
            nb_points: raster.nb_points(),
            nb_valid_points: raster.nb_valid_points(),
        }
    }

    pub fn nodata_percent(&self) -> f64 {
        if self.nb_points == 0 {
            0.0
        } else {
            100.0 * (1.0 - self.nb_valid_points as f64 / self.nb_points as f64)
        }
    }
}

/// Planimetric and altimetric biases, with planimetric ones in pixels too
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Biases {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub dx_pixels: f64,
    pub dy_pixels: f64,
}

/// Histogram files of one mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramArtifacts {
    pub bins_file: PathBuf,
    pub histogram_plot: PathBuf,
    pub gaussian_plot: PathBuf,
    pub counts: Vec<PlottedClass>,
}

/// Results of one mode
#[derive(Debug, Clone, Serialize)]
pub struct ModeReport {
    pub mode: Mode,
    pub records: Vec<StatsRecord>,
    pub files: SavedStats,
    pub histograms: Option<HistogramArtifacts>,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub modes: Vec<ModeReport>,
    /// Produced images by name (supports, classified images, plots)
    pub images: BTreeMap<String, PathBuf>,
    /// Incoherent pixel count, when cross-classification ran
    pub incoherent_pixels: Option<usize>,
    pub reference: RasterSummary,
    pub dsm: RasterSummary,
    pub dh: RasterSummary,
    pub biases: Biases,
}

impl StatsReport {
    pub fn mode(&self, mode: Mode) -> Option<&ModeReport> {
        self.modes.iter().find(|m| m.mode == mode)
    }
}

/// Classification state carried from classification to mask composition
struct Classification {
    ref_set: ClassSet,
    ref_image: ClassifiedImage,
    cross_classified: bool,
}

/// Statistics stage driver
pub struct StatsPipeline<'a> {
    config: StatsConfig,
    class_range: Option<ClassRange>,
    reprojector: &'a dyn Reprojector,
    fit_config: GaussianFitConfig,
}

impl<'a> StatsPipeline<'a> {
    pub fn new(config: StatsConfig, reprojector: &'a dyn Reprojector) -> DemResult<Self> {
        let class_range = config.checked_class_range()?;
        Ok(Self {
            config,
            class_range,
            reprojector,
            fit_config: GaussianFitConfig::default(),
        })
    }

    pub fn with_fit_config(mut self, fit_config: GaussianFitConfig) -> Self {
        self.fit_config = fit_config;
        self
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn class_range(&self) -> Option<&ClassRange> {
        self.class_range.as_ref()
    }

    /// Run every statistics stage and write the artifacts into `output_dir`.
    pub fn run(
        &self,
        coreg: &CoregistrationResult,
        user_supports: &UserSupports,
        output_dir: &Path,
    ) -> DemResult<StatsReport> {
        fs::create_dir_all(output_dir)?;
        let dh = &coreg.final_dh;
        coreg.coreg_ref.ensure_same_shape(dh.shape())?;
        coreg.coreg_dsm.ensure_same_shape(dh.shape())?;
        log::info!("Computing elevation difference statistics into {}", output_dir.display());

        let mut images = BTreeMap::new();

        if self.config.plot_dem_diff {
            let path = output_dir.join("dem_diff.png");
            plot_dem_diff(dh, &path)?;
            images.insert("dem_diff".to_string(), path);
        }

        let supports = prepare_supports(
            self.config.class_type,
            self.config.cross_classification,
            &SupportInputs {
                coreg_ref: &coreg.coreg_ref,
                coreg_dsm: &coreg.coreg_dsm,
                plani_bias: (coreg.x_bias, coreg.y_bias),
            },
            user_supports,
            self.reprojector,
            output_dir,
        )?;

        let mut incoherent_pixels = None;
        let classification = match (&supports, &self.class_range) {
            (Some(supports), Some(range)) => {
                dh.ensure_same_shape(supports.reference.shape())?;
                images.insert("Ref_support".to_string(), supports.reference_path.clone());
                if let Some(path) = &supports.dsm_path {
                    images.insert("DSM_support".to_string(), path.clone());
                }
                let (classification, incoherent) =
                    self.classify(supports, range, output_dir, &mut images)?;
                incoherent_pixels = incoherent;
                Some(classification)
            }
            _ => None,
        };

        let masks = compose_masks(
            dh,
            supports.as_ref().map(|s| &s.reference),
            classification
                .as_ref()
                .filter(|c| c.cross_classified)
                .map(|c| &c.ref_image),
            self.config.remove_outliers,
        )?;

        let ref_set = classification.as_ref().map(|c| &c.ref_set);
        let mut modes = Vec::with_capacity(masks.masks.len());
        for mode in masks.modes() {
            modes.push(self.run_mode(mode, dh, &masks, ref_set, output_dir)?);
        }

        if self.config.wave_detection {
            let waves = detect_waves(dh);
            for (name, raster) in [("row_wise", &waves.row_wise), ("col_wise", &waves.col_wise)] {
                let path = output_dir.join(format!("dh_{}_wave_detection.tif", name));
                DemReader::save_tiff(raster, &path)?;
                images.insert(name.to_string(), path);
            }
        }

        let (xres, yres) = coreg.coreg_ref.resolution();
        let report = StatsReport {
            modes,
            images,
            incoherent_pixels,
            reference: RasterSummary::of(&coreg.coreg_ref),
            dsm: RasterSummary::of(&coreg.coreg_dsm),
            dh: RasterSummary::of(dh),
            biases: Biases {
                dx: coreg.x_bias,
                dy: coreg.y_bias,
                dz: coreg.z_bias,
                dx_pixels: coreg.x_bias / xres,
                dy_pixels: coreg.y_bias / yres,
            },
        };
        log::info!(
            "Statistics done: {} mode(s); nodata: reference {:.2}%, DSM {:.2}%",
            report.modes.len(),
            report.reference.nodata_percent(),
            report.dsm.nodata_percent()
        );
        Ok(report)
    }

    fn classify(
        &self,
        supports: &PreparedSupports,
        range: &ClassRange,
        output_dir: &Path,
        images: &mut BTreeMap<String, PathBuf>,
    ) -> DemResult<(Classification, Option<usize>)> {
        let class_type = self.config.class_type;
        let (ref_set, ref_image) = build_classes(&supports.reference, range, class_type, true)?;
        let mut ref_image = ref_image
            .ok_or_else(|| DemError::Processing("reference classification was not rendered".to_string()))?;

        let mut incoherent = None;
        if let Some(dsm_support) = &supports.dsm {
            let (dsm_set, dsm_image) = build_classes(dsm_support, range, class_type, true)?;
            let mut dsm_image = dsm_image
                .ok_or_else(|| DemError::Processing("DSM classification was not rendered".to_string()))?;
            incoherent = Some(reconcile(&mut ref_image, &mut dsm_image, &ref_set, &dsm_set)?);

            let path = output_dir.join("DSM_support_classified.png");
            dsm_image.save_png(&path)?;
            images.insert("DSM_support_classified".to_string(), path);
        }

        let path = output_dir.join("Ref_support_classified.png");
        ref_image.save_png(&path)?;
        images.insert("Ref_support_classified".to_string(), path);

        Ok((
            Classification {
                ref_set,
                ref_image,
                cross_classified: incoherent.is_some(),
            },
            incoherent,
        ))
    }

    fn run_mode(
        &self,
        mode: Mode,
        dh: &ElevationRaster,
        masks: &MaskSet,
        classes: Option<&ClassSet>,
        output_dir: &Path,
    ) -> DemResult<ModeReport> {
        log::info!("Computing {} statistics", mode);
        let records = compute_stats(&dh.data, masks.get(mode), masks.outliers.as_ref(), classes)?;

        let histograms = if self.config.plot_histograms {
            let keep = masks.keep_mask(mode);
            let set = compute_histograms(
                &dh.data,
                self.config.bin_step,
                keep.as_ref(),
                classes,
                &self.fit_config,
            )?;
            let prefix = mode.as_str();
            let counts = save_histogram_counts(output_dir, prefix, &set)?;
            let histogram_plot = output_dir.join(format!("AltiErrors-Histograms_{}.png", prefix));
            let gaussian_plot =
                output_dir.join(format!("AltiErrors-Histograms_FittedWithGaussians_{}.png", prefix));
            plot_histograms(&set, &histogram_plot)?;
            plot_gaussian_fits(&set, &gaussian_plot)?;
            Some(HistogramArtifacts {
                bins_file: output_dir.join(format!("{}bins.txt", prefix)),
                histogram_plot,
                gaussian_plot,
                counts,
            })
        } else {
            None
        };

        let plotted = histograms.as_ref().map_or(&[][..], |h| h.counts.as_slice());
        let files = save_results(
            output_dir.join(format!("stats_results_{}.json", mode)),
            &records,
            plotted,
            self.config.to_csv,
        )?;

        Ok(ModeReport {
            mode,
            records,
            files,
            histograms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::reproject::GridResampler;

    #[test]
    fn test_default_config() {
        let config = StatsConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.remove_outliers);
        assert_eq!(config.bin_step, 0.1);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: StatsConfig =
            serde_json::from_str(r#"{"class_type": "slope", "class_range": [0, 10, 25], "cross_classification": true}"#)
                .unwrap();
        assert_eq!(config.class_type, ClassType::Slope);
        assert_eq!(config.class_range, vec![0.0, 10.0, 25.0]);
        assert!(config.to_csv);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let bad_step = StatsConfig {
            bin_step: 0.0,
            ..StatsConfig::default()
        };
        assert!(matches!(bad_step.validate(), Err(DemError::Configuration(_))));

        let unsorted = StatsConfig {
            class_type: ClassType::User,
            class_range: vec![10.0, 5.0],
            ..StatsConfig::default()
        };
        assert!(unsorted.validate().is_err());

        let too_many = StatsConfig {
            class_type: ClassType::Slope,
            class_range: (0..21).map(f64::from).collect(),
            ..StatsConfig::default()
        };
        assert!(matches!(too_many.validate(), Err(DemError::UnsupportedClassCount(21))));
        assert!(StatsPipeline::new(too_many, &GridResampler).is_err());
    }

    #[test]
    fn test_class_range_is_built_once() {
        let config = StatsConfig {
            class_type: ClassType::Slope,
            class_range: vec![0.0, 10.0, 25.0],
            ..StatsConfig::default()
        };
        let pipeline = StatsPipeline::new(config, &GridResampler).unwrap();
        assert_eq!(pipeline.class_range().unwrap().boundaries(), &[0.0, 10.0, 25.0]);

        let unclassified = StatsPipeline::new(StatsConfig::default(), &GridResampler).unwrap();
        assert!(unclassified.class_range().is_none());
    }

    #[test]
    fn test_raster_summary() {
        let raster = ElevationRaster::from_array(
            ndarray::array![[1.0, -32768.0], [f32::NAN, 2.0]],
            crate::types::GeoTransform::default(),
            "",
            -32768.0,
        );
        let summary = RasterSummary::of(&raster);
        assert_eq!(summary.nb_points, 4);
        assert_eq!(summary.nb_valid_points, 2);
        assert_eq!(summary.nodata_percent(), 50.0);
    }
}
