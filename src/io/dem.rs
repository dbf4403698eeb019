use crate::types::{DemError, DemResult, ElevationGrid, ElevationRaster, GeoTransform, SUPPORT_NODATA};
use ndarray::Array2;
use num_traits::ToPrimitive;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// GeoTIFF pixel scale (sx, sy, sz)
const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
/// GeoTIFF tie point (i, j, k, x, y, z)
const MODEL_TIEPOINT_TAG: u16 = 33922;
/// GeoTIFF ASCII parameters, used here to carry the spatial reference text
const GEO_ASCII_PARAMS_TAG: u16 = 34737;
/// GDAL nodata value, stored as ASCII
const GDAL_NODATA_TAG: u16 = 42113;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn samples_to_f32<T: ToPrimitive>(samples: Vec<T>) -> Vec<f32> {
    samples
        .into_iter()
        .map(|v| v.to_f32().unwrap_or(f32::NAN))
        .collect()
}

/// Elevation raster reader / writer and terrain derivatives
pub struct DemReader;

impl DemReader {
    /// Read the first band of a single-band GeoTIFF.
    ///
    /// Georeferencing comes from the pixel-scale and tie-point tags, the
    /// nodata value from the GDAL nodata tag unless `nodata_override` is set.
    /// Files without those tags get a unit north-up transform and a nodata of
    /// -32768.
    pub fn read_tiff<P: AsRef<Path>>(path: P, nodata_override: Option<f64>) -> DemResult<ElevationRaster> {
        log::info!("Reading raster from: {}", path.as_ref().display());

        let mut decoder = Decoder::new(File::open(path.as_ref())?)?;
        let (width, height) = decoder.dimensions()?;
        log::debug!("Raster size: {}x{}", width, height);

        let geo_transform = match (
            decoder.find_tag(tag(MODEL_PIXEL_SCALE_TAG))?,
            decoder.find_tag(tag(MODEL_TIEPOINT_TAG))?,
        ) {
            (Some(scale), Some(tiepoint)) => {
                let scale = scale.into_f64_vec()?;
                let tiepoint = tiepoint.into_f64_vec()?;
                if scale.len() < 2 || tiepoint.len() < 6 {
                    return Err(DemError::Processing(
                        "Malformed GeoTIFF georeferencing tags".to_string(),
                    ));
                }
                GeoTransform::north_up(
                    tiepoint[3] - tiepoint[0] * scale[0],
                    tiepoint[4] + tiepoint[1] * scale[1],
                    scale[0],
                    -scale[1],
                )
            }
            _ => {
                log::warn!("No georeferencing found, using a unit pixel grid");
                GeoTransform::default()
            }
        };

        let srs = match decoder.find_tag(tag(GEO_ASCII_PARAMS_TAG))? {
            Some(value) => value.into_string()?.trim_end_matches(['|', '\0']).to_string(),
            None => String::new(),
        };

        let nodata = match nodata_override {
            Some(nodata) => nodata,
            None => match decoder.find_tag(tag(GDAL_NODATA_TAG))? {
                Some(value) => {
                    let text = value.into_string()?;
                    text.trim_end_matches('\0').trim().parse::<f64>().map_err(|e| {
                        DemError::Processing(format!("Invalid nodata tag '{}': {}", text, e))
                    })?
                }
                None => SUPPORT_NODATA,
            },
        };

        let samples = match decoder.read_image()? {
            DecodingResult::F32(v) => v,
            DecodingResult::F64(v) => samples_to_f32(v),
            DecodingResult::U8(v) => samples_to_f32(v),
            DecodingResult::U16(v) => samples_to_f32(v),
            DecodingResult::U32(v) => samples_to_f32(v),
            DecodingResult::U64(v) => samples_to_f32(v),
            DecodingResult::I8(v) => samples_to_f32(v),
            DecodingResult::I16(v) => samples_to_f32(v),
            DecodingResult::I32(v) => samples_to_f32(v),
            DecodingResult::I64(v) => samples_to_f32(v),
            #[allow(unreachable_patterns)]
            _ => {
                return Err(DemError::Processing(
                    "Unsupported raster sample format".to_string(),
                ))
            }
        };

        let data = Array2::from_shape_vec((height as usize, width as usize), samples)
            .map_err(|e| DemError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        Ok(ElevationRaster::from_array(data, geo_transform, &srs, nodata))
    }

    /// Save a raster as a 32-bit float GeoTIFF
    pub fn save_tiff<P: AsRef<Path>>(raster: &ElevationRaster, path: P) -> DemResult<()> {
        let gt = &raster.geo_transform;
        if gt.rotation_x != 0.0 || gt.rotation_y != 0.0 {
            return Err(DemError::Processing(
                "Rotated geotransforms cannot be written".to_string(),
            ));
        }
        let (height, width) = raster.shape();
        let samples: Vec<f32> = raster.data.iter().copied().collect();

        let file = BufWriter::new(File::create(path.as_ref())?);
        let mut encoder = TiffEncoder::new(file)?;
        let mut image = encoder.new_image::<colortype::Gray32Float>(width as u32, height as u32)?;

        let scale = [gt.pixel_width, -gt.pixel_height, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, gt.top_left_x, gt.top_left_y, 0.0];
        image.encoder().write_tag(tag(MODEL_PIXEL_SCALE_TAG), &scale[..])?;
        image.encoder().write_tag(tag(MODEL_TIEPOINT_TAG), &tiepoint[..])?;
        if !raster.srs.is_empty() {
            let srs = format!("{}|", raster.srs);
            image.encoder().write_tag(tag(GEO_ASCII_PARAMS_TAG), srs.as_str())?;
        }
        let nodata = format!("{}", raster.nodata);
        image.encoder().write_tag(tag(GDAL_NODATA_TAG), nodata.as_str())?;
        image.write_data(&samples)?;

        log::info!("Saved raster {}x{} to: {}", width, height, path.as_ref().display());
        Ok(())
    }

    /// Calculate slope and aspect from an elevation raster.
    ///
    /// Derivatives are central differences inside the raster and one-sided
    /// differences on its borders; an axis of length 1 has a zero derivative.
    /// Slope is in percent (`100 * |grad|`), or in degrees when `degree` is set.
    /// Aspect is the uphill direction measured from East, counter-clockwise
    /// positive, in radians (degrees when `degree` is set). Any absent sample
    /// in the stencil gives an absent output. Both outputs carry the support nodata value and the
    /// input georeferencing.
    pub fn calculate_slope_aspect(
        dem: &ElevationRaster,
        degree: bool,
    ) -> DemResult<(ElevationRaster, ElevationRaster)> {
        log::debug!("Calculating slope and aspect from DEM (degree={})", degree);

        let (height, width) = dem.shape();
        if height == 0 || width == 0 {
            return Err(DemError::Processing(format!(
                "Empty raster for slope computation: {}x{}",
                height, width
            )));
        }

        let mut slope = Array2::from_elem((height, width), f32::NAN);
        let mut aspect = Array2::from_elem((height, width), f32::NAN);

        let (xres, yres) = dem.resolution();
        let dx = xres.abs() as f32;
        let dy = yres.abs() as f32;
        let valid = dem.valid_mask();
        let z = &dem.data;

        for i in 0..height {
            for j in 0..width {
                let dz_dx = Self::derivative(j, width, dx, |k| (valid[[i, k]], z[[i, k]]));
                let dz_dy = Self::derivative(i, height, dy, |k| (valid[[k, j]], z[[k, j]]));
                let (Some(dz_dx), Some(dz_dy)) = (dz_dx, dz_dy) else {
                    continue;
                };
                let gradient = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt();

                slope[[i, j]] = if degree {
                    gradient.atan().to_degrees()
                } else {
                    100.0 * gradient
                };

                // rows grow southward
                let a = (-dz_dy).atan2(dz_dx);
                aspect[[i, j]] = if degree { a.to_degrees() } else { a };
            }
        }

        Ok((Self::as_support(slope, dem), Self::as_support(aspect, dem)))
    }

    /// Derivative at `index` along an axis of length `len`, `None` when a
    /// stencil sample is absent
    fn derivative<F>(index: usize, len: usize, spacing: f32, sample: F) -> Option<f32>
    where
        F: Fn(usize) -> (bool, f32),
    {
        if len < 2 {
            return Some(0.0);
        }
        let (lo, hi) = if index == 0 {
            (0, 1)
        } else if index == len - 1 {
            (len - 2, len - 1)
        } else {
            (index - 1, index + 1)
        };
        let ((lo_valid, lo_z), (hi_valid, hi_z)) = (sample(lo), sample(hi));
        if !(lo_valid && hi_valid) {
            return None;
        }
        Some((hi_z - lo_z) / ((hi - lo) as f32 * spacing))
    }

    fn as_support(mut values: ElevationGrid, like: &ElevationRaster) -> ElevationRaster {
        values.mapv_inplace(|v| if v.is_finite() { v } else { SUPPORT_NODATA as f32 });
        ElevationRaster::from_array(values, like.geo_transform, &like.srs, SUPPORT_NODATA)
    }
}
