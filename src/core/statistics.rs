//! Descriptive statistics of elevation differences per mode and per class.

use ndarray::Array2;
use serde::Serialize;

use crate::core::classification::ClassSet;
use crate::types::{BoolGrid, DemError, DemResult, Elevation};

/// Scale factor making the median absolute deviation consistent with a
/// Gaussian standard deviation
pub const NMAD_FACTOR: f64 = 1.4826;

pub const ALL_CLASSES_LABEL: &str = "all";
pub const ALL_CLASSES_NAME: &str = "All classes considered";

/// Statistics of one (mode, class) population.
///
/// Zero-count records hold NaN in every numeric field except `count` and
/// `percent`. Field names on the wire follow the historical stats files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRecord {
    #[serde(rename = "nbpts")]
    pub count: usize,
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    pub std: f64,
    pub rmse: f64,
    pub median: f64,
    pub nmad: f64,
    #[serde(rename = "sum_err")]
    pub sum: f64,
    #[serde(rename = "sum_err.err")]
    pub sum_of_squares: f64,
    #[serde(rename = "set_label")]
    pub class_label: String,
    #[serde(rename = "set_name")]
    pub class_name: String,
    #[serde(rename = "%")]
    pub percent: f64,
    #[serde(rename = "90p")]
    pub percentile_90: f64,
}

impl StatsRecord {
    /// Degenerate record for an empty population
    pub fn empty() -> Self {
        Self {
            count: 0,
            max: f64::NAN,
            min: f64::NAN,
            mean: f64::NAN,
            std: f64::NAN,
            rmse: f64::NAN,
            median: f64::NAN,
            nmad: f64::NAN,
            sum: f64::NAN,
            sum_of_squares: f64::NAN,
            class_label: String::new(),
            class_name: String::new(),
            percent: 0.0,
            percentile_90: f64::NAN,
        }
    }

    /// Descriptive statistics of a population (labels left empty)
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let sum_of_squares: f64 = values.iter().map(|v| v * v).sum();
        let mean = sum / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;

        Self {
            count: values.len(),
            max: values.iter().copied().fold(f64::NEG_INFINITY, nan_max),
            min: values.iter().copied().fold(f64::INFINITY, nan_min),
            mean,
            std: variance.sqrt(),
            rmse: (sum_of_squares / n).sqrt(),
            median: median(values),
            nmad: nmad(values),
            sum,
            sum_of_squares,
            class_label: String::new(),
            class_name: String::new(),
            percent: 0.0,
            percentile_90: f64::NAN,
        }
    }

    fn labelled(mut self, label: &str, name: &str, total_points: usize) -> Self {
        self.class_label = label.to_string();
        self.class_name = name.to_string();
        self.percent = if total_points == 0 {
            0.0
        } else {
            100.0 * self.count as f64 / total_points as f64
        };
        self
    }
}

// NaN-propagating extrema
fn nan_max(acc: f64, v: f64) -> f64 {
    if acc.is_nan() || v.is_nan() {
        f64::NAN
    } else {
        acc.max(v)
    }
}

fn nan_min(acc: f64, v: f64) -> f64 {
    if acc.is_nan() || v.is_nan() {
        f64::NAN
    } else {
        acc.min(v)
    }
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Median ignoring NaN; NaN for an empty input
pub fn median(values: &[f64]) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Normalized median absolute deviation: `1.4826 * median(|x - median(x)|)`
pub fn nmad(values: &[f64]) -> f64 {
    let m = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    NMAD_FACTOR * median(&deviations)
}

/// Percentile with linear interpolation between order statistics, NaN ignored.
///
/// `p` is in `[0, 100]`.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let q = p / 100.0;
    let virtual_index = (n as f64 * q + (1.0 - q) - 1.0).clamp(0.0, (n - 1) as f64);
    let below = virtual_index.floor();
    let lower = below as usize;
    let upper = (lower + 1).min(n - 1);
    let gamma = virtual_index - below;

    let (a, b) = (sorted[lower], sorted[upper]);
    let diff = b - a;
    if gamma >= 0.5 {
        b - diff * (1.0 - gamma)
    } else {
        a + diff * gamma
    }
}

/// 90th percentile of the absolute deviation to the mean
pub fn centered_percentile_90(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let deviations: Vec<f64> = finite.iter().map(|v| (v - mean).abs()).collect();
    percentile(&deviations, 90.0)
}

/// Values of `values` selected by every mask in `masks`
pub fn gather(values: &Array2<Elevation>, masks: &[&BoolGrid]) -> DemResult<Vec<f64>> {
    for mask in masks {
        if mask.dim() != values.dim() {
            return Err(DemError::ShapeMismatch {
                expected: values.dim(),
                found: mask.dim(),
            });
        }
    }
    Ok(values
        .indexed_iter()
        .filter(|(idx, _)| masks.iter().all(|mask| mask[*idx]))
        .map(|(_, &v)| f64::from(v))
        .collect())
}

/// Compute the records of one mode.
///
/// The first record covers every pixel kept by `keep_mask` and
/// `outlier_mask`; one record per class follows. The 90th percentile of
/// each record is computed without the outlier filter. Percentages are
/// relative to the full array size.
pub fn compute_stats(
    values: &Array2<Elevation>,
    keep_mask: Option<&BoolGrid>,
    outlier_mask: Option<&BoolGrid>,
    classes: Option<&ClassSet>,
) -> DemResult<Vec<StatsRecord>> {
    let total_points = values.len();
    let keep: Vec<&BoolGrid> = keep_mask.into_iter().collect();
    let keep_and_outliers: Vec<&BoolGrid> = keep_mask.into_iter().chain(outlier_mask).collect();

    let mut records = Vec::with_capacity(1 + classes.map_or(0, ClassSet::len));
    records.push(population_record(
        values,
        &keep_and_outliers,
        &keep,
        ALL_CLASSES_LABEL,
        ALL_CLASSES_NAME,
        total_points,
    )?);

    if let Some(set) = classes {
        for ((class, label), name) in set.classes.iter().zip(&set.labels).zip(&set.names) {
            let mut filtered = keep_and_outliers.clone();
            filtered.push(class);
            let mut with_outliers = keep.clone();
            with_outliers.push(class);
            records.push(population_record(
                values,
                &filtered,
                &with_outliers,
                label,
                name,
                total_points,
            )?);
        }
    }

    for record in &records {
        log::debug!(
            "{}: {} points, mean={:.4}, std={:.4}, nmad={:.4}",
            record.class_name,
            record.count,
            record.mean,
            record.std,
            record.nmad
        );
    }
    Ok(records)
}

fn population_record(
    values: &Array2<Elevation>,
    masks: &[&BoolGrid],
    percentile_masks: &[&BoolGrid],
    label: &str,
    name: &str,
    total_points: usize,
) -> DemResult<StatsRecord> {
    let population = gather(values, masks)?;
    let mut record = StatsRecord::from_values(&population).labelled(label, name, total_points);
    if record.count > 0 {
        record.percentile_90 = centered_percentile_90(&gather(values, percentile_masks)?);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_nmad_example() {
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(median(&values), 3.0);
        assert_eq!(nmad(&values), 1.4826);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_relative_eq!(percentile(&values, 90.0), 9.1, epsilon = 1e-12);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 10.0);
        assert_eq!(percentile(&[7.0], 90.0), 7.0);
    }

    #[test]
    fn test_record_of_known_population() {
        let record = StatsRecord::from_values(&[1.0, -1.0, 3.0, 1.0]);
        assert_eq!(record.count, 4);
        assert_eq!(record.max, 3.0);
        assert_eq!(record.min, -1.0);
        assert_eq!(record.mean, 1.0);
        assert_relative_eq!(record.std, 2.0_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(record.rmse, 3.0_f64.sqrt(), epsilon = 1e-12);
        assert_eq!(record.median, 1.0);
        // |x - 1| = [0, 2, 2, 0] has median 1
        assert_eq!(record.nmad, NMAD_FACTOR);
        assert_eq!(record.sum, 4.0);
        assert_eq!(record.sum_of_squares, 12.0);
    }

    #[test]
    fn test_empty_record_is_sentinel_filled() {
        let record = StatsRecord::empty();
        assert_eq!(record.count, 0);
        assert_eq!(record.percent, 0.0);
        for v in [
            record.max,
            record.min,
            record.mean,
            record.std,
            record.rmse,
            record.median,
            record.nmad,
            record.sum,
            record.sum_of_squares,
            record.percentile_90,
        ] {
            assert!(v.is_nan());
        }
    }

    #[test]
    fn test_compute_stats_all_zero_raster() {
        let values = ndarray::Array2::<f32>::zeros((4, 4));
        let mut keep = BoolGrid::from_elem((4, 4), true);
        keep[[3, 0]] = false;

        let records = compute_stats(&values, Some(&keep), None, None).unwrap();
        assert_eq!(records.len(), 1);
        let all = &records[0];
        assert_eq!(all.class_label, "all");
        assert_eq!(all.class_name, "All classes considered");
        assert_eq!(all.count, 15);
        assert_eq!(all.mean, 0.0);
        assert_eq!(all.std, 0.0);
        assert_eq!(all.rmse, 0.0);
        assert_eq!(all.median, 0.0);
        assert_eq!(all.nmad, 0.0);
        assert_eq!(all.percent, 93.75);
        assert_eq!(all.percentile_90, 0.0);
    }

    #[test]
    fn test_percentile_keeps_outliers() {
        let values = array![[0.0_f32, 1.0, 2.0, 3.0, 100.0]];
        let keep = BoolGrid::from_elem((1, 5), true);
        let outliers = array![[true, true, true, true, false]];

        let records = compute_stats(&values, Some(&keep), Some(&outliers), None).unwrap();
        let all = &records[0];
        assert_eq!(all.count, 4);
        assert_eq!(all.max, 3.0);

        // |x - 21.2| over the five values, outlier included
        let expected = percentile(&[21.2, 20.2, 19.2, 18.2, 78.8], 90.0);
        assert_relative_eq!(all.percentile_90, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_compute_stats_per_class_with_empty_class() {
        let values = array![[1.0_f32, 2.0], [3.0, 4.0]];
        let keep = array![[true, true], [true, false]];
        let set = ClassSet {
            classes: vec![
                array![[true, false], [true, false]],
                array![[false, true], [false, false]],
                array![[false, false], [false, true]],
            ],
            labels: vec!["a".into(), "b".into(), "c".into()],
            names: vec!["A".into(), "B".into(), "C".into()],
            colors: vec![[0.0; 3]; 3],
        };

        let records = compute_stats(&values, Some(&keep), None, Some(&set)).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].count, 3);
        assert_eq!(records[0].percent, 75.0);
        assert_eq!(records[1].count, 2);
        assert_eq!(records[1].mean, 2.0);
        assert_eq!(records[1].class_label, "a");
        assert_eq!(records[2].count, 1);
        assert_eq!(records[2].percent, 25.0);
        assert_eq!(records[3].count, 0);
        assert_eq!(records[3].class_name, "C");
        assert_eq!(records[3].percent, 0.0);
        assert!(records[3].mean.is_nan());
        assert!(records[3].percentile_90.is_nan());
    }

    #[test]
    fn test_mask_shape_is_checked() {
        let values = ndarray::Array2::<f32>::zeros((2, 2));
        let keep = BoolGrid::from_elem((3, 2), true);
        assert!(matches!(
            compute_stats(&values, Some(&keep), None, None),
            Err(DemError::ShapeMismatch { .. })
        ));
    }
}
