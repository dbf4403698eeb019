//! Core classification and statistics modules

pub mod classification;
pub mod cross_classification;
pub mod masks;
pub mod statistics;
pub mod gaussian_fit;
pub mod histogram;
pub mod support;
pub mod wave_detection;
pub mod pipeline;

// Re-export main types
pub use classification::{build_classes, ClassRange, ClassSet, ClassType, ClassifiedImage};
pub use cross_classification::{coherence_grid, reconcile};
pub use masks::{compose_masks, MaskSet, Mode};
pub use statistics::{compute_stats, StatsRecord};
pub use gaussian_fit::{fit_gaussian, FitFailure, GaussianFit, GaussianFitConfig, GaussianParams};
pub use histogram::{compute_histograms, HistogramClass, HistogramSet};
pub use support::{prepare_supports, PreparedSupports, UserSupports};
pub use wave_detection::{detect_waves, WaveResiduals};
pub use pipeline::{CoregistrationResult, StatsConfig, StatsPipeline, StatsReport};
