//! Detection of row / column oscillations in the elevation differences.

use ndarray::{Array1, Axis};

use crate::types::{ElevationGrid, ElevationRaster, SUPPORT_NODATA};

/// Residuals of the difference raster after removing axis means
#[derive(Debug, Clone)]
pub struct WaveResiduals {
    /// `dh` minus the mean of its column
    pub row_wise: ElevationRaster,
    /// `dh` minus the mean of its row
    pub col_wise: ElevationRaster,
}

/// Mean of present samples along `axis`; NaN where a lane has none
fn lane_means(dh: &ElevationRaster, axis: Axis) -> Array1<f64> {
    dh.data.map_axis(axis, |lane| {
        let (sum, n) = lane
            .iter()
            .filter(|&&v| dh.is_valid_sample(v))
            .fold((0.0, 0usize), |(s, n), &v| (s + f64::from(v), n + 1));
        if n == 0 {
            f64::NAN
        } else {
            sum / n as f64
        }
    })
}

fn residuals(dh: &ElevationRaster, means: &Array1<f64>, along_rows: bool) -> ElevationRaster {
    let mut out = ElevationGrid::from_elem(dh.shape(), SUPPORT_NODATA as f32);
    for ((row, col), value) in out.indexed_iter_mut() {
        let v = dh.data[[row, col]];
        let mean = if along_rows { means[col] } else { means[row] };
        if dh.is_valid_sample(v) && mean.is_finite() {
            *value = (f64::from(v) - mean) as f32;
        }
    }
    ElevationRaster::from_array(out, dh.geo_transform, &dh.srs, SUPPORT_NODATA)
}

/// Remove column means (row-wise residuals) and row means (column-wise
/// residuals) from `dh`. Absent samples are ignored in the means and stay
/// absent in the outputs.
pub fn detect_waves(dh: &ElevationRaster) -> WaveResiduals {
    let column_means = lane_means(dh, Axis(0));
    let row_means = lane_means(dh, Axis(1));
    log::debug!(
        "Wave detection over {} columns and {} rows",
        column_means.len(),
        row_means.len()
    );
    WaveResiduals {
        row_wise: residuals(dh, &column_means, true),
        col_wise: residuals(dh, &row_means, false),
    }
}
