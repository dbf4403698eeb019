//! Preparation of classification support rasters.
//!
//! Slope supports are derived from the co-registered DEMs; user supports are
//! resampled onto the co-registered DSM grid. Prepared supports are saved as
//! `Ref_support.tif` and `DSM_support.tif`.

use std::path::{Path, PathBuf};

use crate::core::classification::ClassType;
use crate::io::dem::DemReader;
use crate::io::reproject::{GridSpec, Interpolation, Reprojector};
use crate::types::{DemError, DemResult, ElevationRaster};

pub const REF_SUPPORT_FILE: &str = "Ref_support.tif";
pub const DSM_SUPPORT_FILE: &str = "DSM_support.tif";

/// User-provided support rasters, in their own grids
#[derive(Debug, Clone, Default)]
pub struct UserSupports {
    pub reference: Option<ElevationRaster>,
    pub dsm: Option<ElevationRaster>,
}

/// Supports aligned on the difference raster grid
#[derive(Debug, Clone)]
pub struct PreparedSupports {
    pub reference: ElevationRaster,
    pub reference_path: PathBuf,
    /// Present only when cross-classification stays enabled
    pub dsm: Option<ElevationRaster>,
    pub dsm_path: Option<PathBuf>,
}

impl PreparedSupports {
    pub fn cross_classification(&self) -> bool {
        self.dsm.is_some()
    }
}

/// Everything support preparation needs from the co-registration step
pub struct SupportInputs<'a> {
    pub coreg_ref: &'a ElevationRaster,
    pub coreg_dsm: &'a ElevationRaster,
    /// Planimetric biases (dx, dy) in georeferenced units
    pub plani_bias: (f64, f64),
}

/// Build the reference (and optionally DSM-side) classification supports.
///
/// Returns `None` when classification is off. A missing DSM-side user
/// support disables cross-classification with a warning.
pub fn prepare_supports(
    class_type: ClassType,
    cross_classification: bool,
    inputs: &SupportInputs<'_>,
    user: &UserSupports,
    reprojector: &dyn Reprojector,
    output_dir: &Path,
) -> DemResult<Option<PreparedSupports>> {
    let (reference, dsm) = match class_type {
        ClassType::None => return Ok(None),
        ClassType::Slope => {
            log::info!("Computing slope supports");
            let (reference, _) = DemReader::calculate_slope_aspect(inputs.coreg_ref, false)?;
            let dsm = if cross_classification {
                Some(DemReader::calculate_slope_aspect(inputs.coreg_dsm, false)?.0)
            } else {
                None
            };
            (reference, dsm)
        }
        ClassType::User => {
            let source = user.reference.as_ref().ok_or_else(|| {
                DemError::Configuration(
                    "user classification requires a reference support raster".to_string(),
                )
            })?;
            log::info!("Resampling user supports onto the co-registered DSM grid");
            let reference = reprojector.reproject(
                source,
                &GridSpec::like(inputs.coreg_dsm, source.nodata),
                Interpolation::Bilinear,
            )?;

            let dsm = match (&user.dsm, cross_classification) {
                (Some(source), true) => Some(rectify_dsm_support(source, inputs, reprojector)?),
                (None, true) => {
                    log::warn!(
                        "No DSM-side support provided: cross-classification is disabled"
                    );
                    None
                }
                (_, false) => None,
            };
            (reference, dsm)
        }
    };

    let reference_path = output_dir.join(REF_SUPPORT_FILE);
    DemReader::save_tiff(&reference, &reference_path)?;
    let dsm_path = match &dsm {
        Some(dsm) => {
            let path = output_dir.join(DSM_SUPPORT_FILE);
            DemReader::save_tiff(dsm, &path)?;
            Some(path)
        }
        None => None,
    };

    Ok(Some(PreparedSupports {
        reference,
        reference_path,
        dsm,
        dsm_path,
    }))
}

/// The co-registered DSM grid was shifted by the planimetric biases, so the
/// DSM-side support is shifted by the same amount before resampling.
fn rectify_dsm_support(
    source: &ElevationRaster,
    inputs: &SupportInputs<'_>,
    reprojector: &dyn Reprojector,
) -> DemResult<ElevationRaster> {
    let (xres, yres) = source.resolution();
    let (dx, dy) = inputs.plani_bias;
    let x_off = dx / xres;
    let y_off = dy / yres;
    log::debug!("Shifting DSM support by ({:.4}, {:.4}) pixels", x_off - 0.5, -y_off - 0.5);

    let mut shifted = source.clone();
    shifted.geo_transform = source.geo_transform.translate_pixels(x_off - 0.5, -y_off - 0.5);
    reprojector.reproject(
        &shifted,
        &GridSpec::like(inputs.coreg_dsm, source.nodata),
        Interpolation::Nearest,
    )
}
