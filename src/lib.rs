//! demcompare: elevation-difference classification and statistics
//!
//! Given the difference between two co-registered elevation models, this
//! library partitions pixels into classes (terrain slope or user supports),
//! builds validity, outlier and cross-classification masks, computes per-class
//! error statistics, fits Gaussians to error histograms and writes the
//! resulting JSON, CSV and PNG artifacts. A comparator checks stats files
//! against a baseline run.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoolGrid, DemError, DemResult, Elevation, ElevationGrid, ElevationRaster, GeoTransform,
};

pub use io::{DemReader, GridResampler, Reprojector};
pub use crate::core::{
    ClassType, CoregistrationResult, Mode, StatsConfig, StatsPipeline, StatsRecord, StatsReport,
    UserSupports,
};
