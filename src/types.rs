use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::core::gaussian_fit::FitFailure;
use crate::io::baseline::CsvDifference;

/// Elevation sample type as stored in rasters
pub type Elevation = f32;

/// 2D elevation grid (rows x cols)
pub type ElevationGrid = Array2<Elevation>;

/// 2D boolean pixel selector (rows x cols)
pub type BoolGrid = Array2<bool>;

/// Nodata value used for derived support rasters (slope, wave detection)
pub const SUPPORT_NODATA: f64 = -32768.0;

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    /// Shift the origin by a (possibly fractional) number of pixels
    pub fn translate_pixels(&self, x_pixels: f64, y_pixels: f64) -> Self {
        Self {
            top_left_x: self.top_left_x + x_pixels * self.pixel_width + y_pixels * self.rotation_x,
            top_left_y: self.top_left_y + x_pixels * self.rotation_y + y_pixels * self.pixel_height,
            ..*self
        }
    }

    /// Georeferenced coordinates of the pixel corner (col, row)
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel coordinates (col, row) of a georeferenced point.
    ///
    /// Only north-up transforms are inverted; rotated grids yield `None`.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if self.rotation_x != 0.0 || self.rotation_y != 0.0 {
            return None;
        }
        if self.pixel_width == 0.0 || self.pixel_height == 0.0 {
            return None;
        }
        Some((
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        ))
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::north_up(0.0, 0.0, 1.0, -1.0)
    }
}

/// A georeferenced elevation (or support) raster.
///
/// Samples equal to `nodata` or non-finite are absent. Rasters are produced
/// upstream and only read by the classification and statistics stages.
#[derive(Debug, Clone)]
pub struct ElevationRaster {
    pub data: ElevationGrid,
    pub nodata: f64,
    pub geo_transform: GeoTransform,
    /// Spatial reference identifier (EPSG code, proj string or WKT)
    pub srs: String,
}

impl ElevationRaster {
    /// Wrap an array with its georeferencing
    pub fn from_array(data: ElevationGrid, geo_transform: GeoTransform, srs: &str, nodata: f64) -> Self {
        Self {
            data,
            nodata,
            geo_transform,
            srs: srs.to_string(),
        }
    }

    pub fn values(&self) -> &ElevationGrid {
        &self.data
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Pixel resolution (x, y) as signed transform terms
    pub fn resolution(&self) -> (f64, f64) {
        (self.geo_transform.pixel_width, self.geo_transform.pixel_height)
    }

    pub fn nb_points(&self) -> usize {
        self.data.len()
    }

    /// True if the sample is neither non-finite nor the nodata sentinel
    pub fn is_valid_sample(&self, value: Elevation) -> bool {
        is_valid_sample(value, self.nodata)
    }

    /// Boolean grid of present samples
    pub fn valid_mask(&self) -> BoolGrid {
        self.data.mapv(|v| is_valid_sample(v, self.nodata))
    }

    pub fn nb_valid_points(&self) -> usize {
        self.data.iter().filter(|&&v| is_valid_sample(v, self.nodata)).count()
    }

    /// Check that another raster lies on the same pixel grid shape
    pub fn ensure_same_shape(&self, other_shape: (usize, usize)) -> DemResult<()> {
        if self.shape() != other_shape {
            return Err(DemError::ShapeMismatch {
                expected: self.shape(),
                found: other_shape,
            });
        }
        Ok(())
    }
}

/// A sample is valid when finite and different from the nodata sentinel
pub fn is_valid_sample(value: Elevation, nodata: f64) -> bool {
    value.is_finite() && f64::from(value) != nodata
}

/// Error types for DEM comparison
#[derive(Debug, thiserror::Error)]
pub enum DemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported class count: {0} classes requested, at most 20 can be colored")]
    UnsupportedClassCount(usize),

    #[error("Gaussian fit failed for class '{label}': {source}")]
    FitConvergence {
        label: String,
        #[source]
        source: FitFailure,
    },

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Baseline mismatch: {} differing value(s): {:?}", .0.len(), .0)]
    BaselineMismatch(Vec<CsvDifference>),

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for DEM comparison operations
pub type DemResult<T> = Result<T, DemError>;
