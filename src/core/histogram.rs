//! Normalized error histograms with Gaussian fits and class contributions.
//!
//! All classes of a run share the same bin edges, spanning `[-A, A]` where `A`
//! is the largest absolute error rounded up to the bin step, so histograms can
//! be overlaid.

use ndarray::Array2;
use serde::Serialize;

use crate::core::classification::ClassSet;
use crate::core::gaussian_fit::{fit_gaussian, GaussianFit, GaussianFitConfig, GaussianParams};
use crate::core::statistics::{gather, ALL_CLASSES_LABEL};
use crate::types::{BoolGrid, DemError, DemResult, Elevation};

/// Display color of the implicit "all" class
pub const ALL_CLASSES_COLOR: [f64; 3] = [0.0, 0.0, 0.0];

/// `ceil(x / step) * step`
pub fn round_up(x: f64, step: f64) -> f64 {
    (x / step).ceil() * step
}

/// Symmetric bin edges covering every selected value.
///
/// Edges are `-A, -A + step, ...` up to `A` (`A` rounded up to the step); a
/// population without spread still gets one bin on each side of zero.
pub fn symmetric_bin_edges(values: &[f64], bin_step: f64) -> DemResult<Vec<f64>> {
    if !(bin_step.is_finite() && bin_step > 0.0) {
        return Err(DemError::Configuration(format!(
            "histogram bin step must be positive, got {}",
            bin_step
        )));
    }
    let bound = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if !bound.is_finite() {
        return Err(DemError::Processing(
            "cannot bin an infinite elevation difference".to_string(),
        ));
    }
    let mut upper = round_up(bound, bin_step);
    if upper == 0.0 {
        upper = bin_step;
    }

    let start = -upper;
    let stop = upper + bin_step;
    let nb_edges = ((stop - start) / bin_step).ceil() as usize;
    Ok((0..nb_edges).map(|i| start + i as f64 * bin_step).collect())
}

/// Probability density per bin (`counts / (n * width)`).
///
/// Bins are half-open except the last, which also holds its upper edge;
/// values outside the edges are ignored.
pub fn density_histogram(data: &[f64], edges: &[f64]) -> Vec<f64> {
    let nb_bins = edges.len().saturating_sub(1);
    let mut counts = vec![0usize; nb_bins];
    if nb_bins == 0 {
        return Vec::new();
    }
    let (first, last) = (edges[0], edges[nb_bins]);
    for &v in data {
        if !(v >= first && v <= last) {
            continue;
        }
        let bin = edges.partition_point(|&e| e <= v).saturating_sub(1).min(nb_bins - 1);
        counts[bin] += 1;
    }

    let total: usize = counts.iter().sum();
    counts
        .iter()
        .zip(edges.windows(2))
        .map(|(&c, w)| {
            if total == 0 {
                0.0
            } else {
                c as f64 / (total as f64 * (w[1] - w[0]))
            }
        })
        .collect()
}

/// Histogram of one class holding data
#[derive(Debug, Clone, Serialize)]
pub struct HistogramClass {
    /// 0 for "all", `i + 1` for class `i`
    pub index: usize,
    pub label: String,
    pub color: [f64; 3],
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    /// Share of the full array, in percent
    pub percent_of_points: f64,
    /// Share of the "all" class, in percent (`None` for "all" itself)
    pub contribution: Option<f64>,
    /// Running sum of contributions up to and including this class
    pub cumulative_contribution: Option<f64>,
    pub density: Vec<f64>,
    pub fit: Option<GaussianFit>,
}

/// Histograms of one mode
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSet {
    pub edges: Vec<f64>,
    pub bin_step: f64,
    /// Classes with data only, "all" first
    pub classes: Vec<HistogramClass>,
}

impl HistogramSet {
    /// Bin centers used as fit abscissae
    pub fn bin_centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| w[0] + self.bin_step / 2.0).collect()
    }
}

/// Bin every class of a mode and fit a Gaussian to each histogram.
///
/// `keep_mask` should already combine the mode mask and the outlier filter.
/// Classes without data are skipped. A fit that fails to converge aborts
/// with [`DemError::FitConvergence`]; degenerate populations (no spread or
/// fewer bins than parameters) are kept without a fit.
pub fn compute_histograms(
    values: &Array2<Elevation>,
    bin_step: f64,
    keep_mask: Option<&BoolGrid>,
    classes: Option<&ClassSet>,
    config: &GaussianFitConfig,
) -> DemResult<HistogramSet> {
    let keep: Vec<&BoolGrid> = keep_mask.into_iter().collect();
    let all_values = gather(values, &keep)?;
    let edges = symmetric_bin_edges(&all_values, bin_step)?;
    let total_points = values.len() as f64;

    let mut populations = vec![(ALL_CLASSES_LABEL.to_string(), ALL_CLASSES_COLOR, all_values)];
    if let Some(set) = classes {
        for ((class, label), color) in set.classes.iter().zip(&set.labels).zip(&set.colors) {
            let mut masks = keep.clone();
            masks.push(class);
            populations.push((label.clone(), *color, gather(values, &masks)?));
        }
    }

    let mut set = HistogramSet {
        edges,
        bin_step,
        classes: Vec::new(),
    };
    let centers = set.bin_centers();
    let mut all_size = 0usize;
    let mut cumulative = 0.0;

    for (index, (label, color, data)) in populations.into_iter().enumerate() {
        if data.is_empty() {
            continue;
        }
        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let std = (data.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt();

        let (contribution, cumulative_contribution) = if index == 0 {
            all_size = data.len();
            (None, None)
        } else {
            let contribution = 100.0 * data.len() as f64 / all_size as f64;
            cumulative += contribution;
            (Some(contribution), Some(cumulative))
        };

        let density = density_histogram(&data, &set.edges);
        let fit = if std > 0.0 && density.len() >= 3 {
            let initial = GaussianParams {
                amplitude: 1.0,
                mean,
                sigma: std,
            };
            let fit = fit_gaussian(&centers, &density, initial, config).map_err(|source| {
                log::error!("No fitted gaussian for class '{}': {}", label, source);
                DemError::FitConvergence {
                    label: label.clone(),
                    source,
                }
            })?;
            Some(fit)
        } else {
            log::warn!(
                "Skipping gaussian fit for class '{}': degenerate histogram ({} bins, std={})",
                label,
                density.len(),
                std
            );
            None
        };

        set.classes.push(HistogramClass {
            index,
            label,
            color,
            count: data.len(),
            mean,
            std,
            percent_of_points: 100.0 * n / total_points,
            contribution,
            cumulative_contribution,
            density,
            fit,
        });
    }

    Ok(set)
}
