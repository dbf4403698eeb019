//! Resampling of support rasters onto the comparison grid.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::{DemError, DemResult, Elevation, ElevationRaster, GeoTransform};

/// Resampling kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

/// Target pixel grid of a reprojection
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub srs: String,
    pub width: usize,
    pub height: usize,
    pub geo_transform: GeoTransform,
    pub nodata: f64,
}

impl GridSpec {
    /// Grid of an existing raster, with another nodata value
    pub fn like(raster: &ElevationRaster, nodata: f64) -> Self {
        let (height, width) = raster.shape();
        Self {
            srs: raster.srs.clone(),
            width,
            height,
            geo_transform: raster.geo_transform,
            nodata,
        }
    }
}

/// Raster reprojection service
pub trait Reprojector {
    fn reproject(
        &self,
        source: &ElevationRaster,
        target: &GridSpec,
        interpolation: Interpolation,
    ) -> DemResult<ElevationRaster>;
}

/// Resampler between grids sharing one spatial reference.
///
/// Target pixel centers are mapped through both geotransforms; samples
/// falling outside the source, or touching an absent source sample, become
/// the target nodata.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridResampler;

impl GridResampler {
    fn sample(source: &ElevationRaster, col: f64, row: f64, interpolation: Interpolation) -> Option<Elevation> {
        let (height, width) = source.shape();
        let fetch = |r: isize, c: isize| -> Option<Elevation> {
            if r < 0 || c < 0 || r as usize >= height || c as usize >= width {
                return None;
            }
            let v = source.data[[r as usize, c as usize]];
            source.is_valid_sample(v).then_some(v)
        };

        match interpolation {
            Interpolation::Nearest => fetch(row.floor() as isize, col.floor() as isize),
            Interpolation::Bilinear => {
                // continuous coordinates relative to sample centers
                let (x, y) = (col - 0.5, row - 0.5);
                let (c0, r0) = (x.floor(), y.floor());
                let (fx, fy) = ((x - c0) as f32, (y - r0) as f32);
                let (c0, r0) = (c0 as isize, r0 as isize);

                let v00 = fetch(r0, c0)?;
                let v01 = if fx > 0.0 { fetch(r0, c0 + 1)? } else { v00 };
                let v10 = if fy > 0.0 { fetch(r0 + 1, c0)? } else { v00 };
                let v11 = if fx > 0.0 && fy > 0.0 {
                    fetch(r0 + 1, c0 + 1)?
                } else if fx > 0.0 {
                    v01
                } else {
                    v10
                };

                let top = v00 + (v01 - v00) * fx;
                let bottom = v10 + (v11 - v10) * fx;
                Some(top + (bottom - top) * fy)
            }
        }
    }
}

impl Reprojector for GridResampler {
    fn reproject(
        &self,
        source: &ElevationRaster,
        target: &GridSpec,
        interpolation: Interpolation,
    ) -> DemResult<ElevationRaster> {
        if source.srs != target.srs {
            return Err(DemError::Configuration(format!(
                "cannot resample from '{}' to '{}': coordinate transformation is not supported",
                source.srs, target.srs
            )));
        }
        let invalid_transform =
            || DemError::Configuration("only north-up, non-degenerate grids can be resampled".to_string());
        if target.geo_transform.geo_to_pixel(0.0, 0.0).is_none() {
            return Err(invalid_transform());
        }

        log::debug!(
            "Resampling {:?} raster onto {}x{} grid ({:?})",
            source.shape(),
            target.height,
            target.width,
            interpolation
        );

        let nodata = target.nodata as Elevation;
        let mut data = Array2::from_elem((target.height, target.width), nodata);
        for ((row, col), value) in data.indexed_iter_mut() {
            let (x, y) = target
                .geo_transform
                .pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5);
            let (src_col, src_row) = source
                .geo_transform
                .geo_to_pixel(x, y)
                .ok_or_else(invalid_transform)?;
            if let Some(v) = Self::sample(source, src_col, src_row, interpolation) {
                *value = v;
            }
        }

        Ok(ElevationRaster::from_array(
            data,
            target.geo_transform,
            &target.srs,
            target.nodata,
        ))
    }
}
