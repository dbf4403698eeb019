//! Raster, stats and plot input/output

pub mod dem;
pub mod reproject;
pub mod stats_export;
pub mod histogram_export;
pub mod plot;
pub mod baseline;

pub use dem::DemReader;
pub use reproject::{GridResampler, GridSpec, Interpolation, Reprojector};
pub use stats_export::{save_results, PlottedClass, SavedStats};
pub use histogram_export::save_histogram_counts;
pub use baseline::{check_csv, compare_with_baseline, CsvDifference};
