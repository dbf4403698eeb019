//! Pixel-selection masks for each statistics mode.
//!
//! This is the single place where nodata semantics are interpreted: the
//! statistics and histogram stages only ever see the raw difference values
//! plus boolean selectors.

use serde::{Deserialize, Serialize};

use crate::core::classification::ClassifiedImage;
use crate::types::{BoolGrid, DemResult, ElevationRaster};

/// Number of standard deviations bounding the outlier-free interval
pub const OUTLIER_SIGMA: f64 = 3.0;

/// Named pixel-selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Standard,
    CoherentClassification,
    IncoherentClassification,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Standard => "standard",
            Mode::CoherentClassification => "coherent-classification",
            Mode::IncoherentClassification => "incoherent-classification",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Masks of every active mode plus the optional outlier filter
#[derive(Debug, Clone)]
pub struct MaskSet {
    /// Modes in fixed order: standard, then coherent / incoherent when active
    pub masks: Vec<(Mode, BoolGrid)>,
    /// `True` inside `(mu - 3 sigma, mu + 3 sigma)`; only built when outlier removal is on
    pub outliers: Option<BoolGrid>,
}

impl MaskSet {
    pub fn modes(&self) -> Vec<Mode> {
        self.masks.iter().map(|(mode, _)| *mode).collect()
    }

    pub fn get(&self, mode: Mode) -> Option<&BoolGrid> {
        self.masks.iter().find(|(m, _)| *m == mode).map(|(_, mask)| mask)
    }

    /// Mode mask combined with the outlier filter, when there is one
    pub fn keep_mask(&self, mode: Mode) -> Option<BoolGrid> {
        let mask = self.get(mode)?;
        Some(match &self.outliers {
            Some(outliers) => mask & outliers,
            None => mask.clone(),
        })
    }
}

/// `True` inside the open interval `mu ± 3 sigma` of the selected values.
///
/// Mean and (population) standard deviation are taken over `selection`;
/// the test is then applied to every pixel. A zero `sigma` keeps the
/// values equal to `mu`.
pub fn outlier_free_mask(values: &ndarray::Array2<f32>, selection: &BoolGrid) -> BoolGrid {
    let selected: Vec<f64> = values
        .iter()
        .zip(selection.iter())
        .filter(|(_, &keep)| keep)
        .map(|(&v, _)| f64::from(v))
        .collect();

    let n = selected.len() as f64;
    let mu = selected.iter().sum::<f64>() / n;
    let sigma = (selected.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / n).sqrt();
    let (lower, upper) = (mu - OUTLIER_SIGMA * sigma, mu + OUTLIER_SIGMA * sigma);

    log::debug!(
        "Outlier bounds: mu={:.6}, sigma={:.6}, interval=({:.6}, {:.6})",
        mu,
        sigma,
        lower,
        upper
    );

    values.mapv(|v| {
        let v = f64::from(v);
        if sigma == 0.0 {
            // constant population: nothing is an outlier
            v == mu
        } else {
            v > lower && v < upper
        }
    })
}

/// Build the masks of every mode.
///
/// * `ref_support` - reference classification support; its presence turns
///   classification on and restricts `standard` to valid support pixels
/// * `ref_classified` - reconciled reference classified image; its presence
///   (with `ref_support`) turns cross-classification modes on
/// * `remove_outliers` - also return the 3-sigma outlier filter
///
/// Every mask is computed from scratch as an AND-refinement of `standard`.
pub fn compose_masks(
    diff: &ElevationRaster,
    ref_support: Option<&ElevationRaster>,
    ref_classified: Option<&ClassifiedImage>,
    remove_outliers: bool,
) -> DemResult<MaskSet> {
    let mut standard = diff.valid_mask();
    if let Some(support) = ref_support {
        diff.ensure_same_shape(support.shape())?;
        standard &= &support.valid_mask();
    }
    log::info!(
        "Standard mask keeps {} of {} pixels",
        standard.iter().filter(|&&k| k).count(),
        standard.len()
    );

    let outliers = if remove_outliers {
        Some(outlier_free_mask(&diff.data, &standard))
    } else {
        None
    };

    let mut masks = Vec::with_capacity(3);
    if let (Some(_), Some(classified)) = (ref_support, ref_classified) {
        diff.ensure_same_shape(classified.shape())?;
        let coherent = classified.coherence_grid();
        let coherent_mask = &standard & &coherent;
        let incoherent_mask = &standard & &coherent.mapv(|c| !c);
        masks.push((Mode::Standard, standard));
        masks.push((Mode::CoherentClassification, coherent_mask));
        masks.push((Mode::IncoherentClassification, incoherent_mask));
    } else {
        masks.push((Mode::Standard, standard));
    }

    Ok(MaskSet { masks, outliers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classification::{build_classes, ClassRange, ClassType};
    use crate::core::cross_classification::reconcile;
    use crate::types::GeoTransform;
    use ndarray::{array, Array2};

    fn raster(values: Array2<f32>, nodata: f64) -> ElevationRaster {
        ElevationRaster::from_array(values, GeoTransform::default(), "EPSG:32631", nodata)
    }

    #[test]
    fn test_standard_mask_without_classification() {
        let mut values = Array2::<f32>::zeros((4, 4));
        values[[0, 3]] = -9999.0;
        let diff = raster(values, -9999.0);

        let set = compose_masks(&diff, None, None, false).unwrap();
        assert_eq!(set.modes(), vec![Mode::Standard]);
        assert!(set.outliers.is_none());
        let standard = set.get(Mode::Standard).unwrap();
        assert_eq!(standard.iter().filter(|&&k| k).count(), 15);
        assert!(!standard[[0, 3]]);
    }

    #[test]
    fn test_standard_mask_requires_valid_support() {
        let diff = raster(array![[1.0, 2.0], [f32::NAN, 4.0]], -9999.0);
        let support = raster(array![[5.0, -32768.0], [5.0, 5.0]], -32768.0);
        let set = compose_masks(&diff, Some(&support), None, false).unwrap();
        assert_eq!(set.modes(), vec![Mode::Standard]);
        assert_eq!(
            set.get(Mode::Standard).unwrap(),
            &array![[true, false], [false, true]]
        );
    }

    #[test]
    fn test_outlier_mask_leaves_standard_untouched() {
        let mut values = Array2::<f32>::zeros((5, 5));
        values[[2, 2]] = 1000.0;
        values[[0, 0]] = -9999.0;
        let diff = raster(values, -9999.0);

        let set = compose_masks(&diff, None, None, true).unwrap();
        let standard = set.get(Mode::Standard).unwrap();
        let outliers = set.outliers.as_ref().unwrap();
        assert!(standard[[2, 2]]);
        assert!(!outliers[[2, 2]]);
        assert!(outliers[[1, 1]]);

        let keep = set.keep_mask(Mode::Standard).unwrap();
        assert_eq!(keep.iter().filter(|&&k| k).count(), 23);
    }

    #[test]
    fn test_constant_population_has_no_outliers() {
        let mut values = Array2::<f32>::zeros((4, 4));
        values[[3, 0]] = -9999.0;
        let diff = raster(values, -9999.0);
        let set = compose_masks(&diff, None, None, true).unwrap();
        let keep = set.keep_mask(Mode::Standard).unwrap();
        assert_eq!(keep.iter().filter(|&&k| k).count(), 15);
    }

    #[test]
    fn test_coherent_and_incoherent_partition_standard() {
        let diff = raster(
            array![[0.5, 1.0, -9999.0], [2.0, 0.1, 0.3]],
            -9999.0,
        );
        let ref_support = raster(array![[1.0, 12.0, 5.0], [30.0, 5.0, -32768.0]], -32768.0);
        let dsm_support = raster(array![[2.0, 30.0, 5.0], [30.0, 15.0, 5.0]], -32768.0);
        let range = ClassRange::new(vec![0.0, 10.0, 25.0]).unwrap();
        let (ref_set, ref_img) = build_classes(&ref_support, &range, ClassType::Slope, true).unwrap();
        let (dsm_set, dsm_img) = build_classes(&dsm_support, &range, ClassType::Slope, true).unwrap();
        let (mut ref_img, mut dsm_img) = (ref_img.unwrap(), dsm_img.unwrap());
        reconcile(&mut ref_img, &mut dsm_img, &ref_set, &dsm_set).unwrap();

        let set = compose_masks(&diff, Some(&ref_support), Some(&ref_img), false).unwrap();
        assert_eq!(
            set.modes(),
            vec![
                Mode::Standard,
                Mode::CoherentClassification,
                Mode::IncoherentClassification
            ]
        );
        let standard = set.get(Mode::Standard).unwrap();
        let coherent = set.get(Mode::CoherentClassification).unwrap();
        let incoherent = set.get(Mode::IncoherentClassification).unwrap();

        assert_eq!(coherent & incoherent, Array2::from_elem((2, 3), false));
        assert_eq!(&(coherent | incoherent), standard);
        assert_eq!(coherent, &array![[true, false, false], [true, false, false]]);
    }
}
