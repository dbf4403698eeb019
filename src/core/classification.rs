//! Classification of a support raster into disjoint value-range classes.
//!
//! A [`ClassRange`] `[b0, b1, ..., bn]` defines the intervals
//! `[b0, b1), [b1, b2), ..., [bn, +inf)`. Each interval becomes one boolean
//! membership grid. Absent support samples (non-finite or nodata) belong to
//! no class.

use std::path::Path;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::types::{BoolGrid, DemError, DemResult, ElevationRaster};

/// Alpha value of pixels taking part in the classification
pub const OPAQUE_ALPHA: u8 = 255;

/// Alpha value marking excluded / incoherent pixels
pub const TRANSPARENT_ALPHA: u8 = 0;

/// Color of absent support pixels; alpha stays opaque until reconciliation
pub const NODATA_COLOR: [u8; 4] = [0, 0, 0, OPAQUE_ALPHA];

/// Background color of valid pixels falling below the first boundary
pub const UNCLASSIFIED_COLOR: [u8; 4] = [255, 255, 255, OPAQUE_ALPHA];

/// Largest number of classes the categorical palettes can color
pub const MAX_CLASSES: usize = 20;

const TAB10: [[u8; 3]; 10] = [
    [0x1f, 0x77, 0xb4],
    [0xff, 0x7f, 0x0e],
    [0x2c, 0xa0, 0x2c],
    [0xd6, 0x27, 0x28],
    [0x94, 0x67, 0xbd],
    [0x8c, 0x56, 0x4b],
    [0xe3, 0x77, 0xc2],
    [0x7f, 0x7f, 0x7f],
    [0xbc, 0xbd, 0x22],
    [0x17, 0xbe, 0xcf],
];

const TAB20: [[u8; 3]; 20] = [
    [0x1f, 0x77, 0xb4],
    [0xae, 0xc7, 0xe8],
    [0xff, 0x7f, 0x0e],
    [0xff, 0xbb, 0x78],
    [0x2c, 0xa0, 0x2c],
    [0x98, 0xdf, 0x8a],
    [0xd6, 0x27, 0x28],
    [0xff, 0x98, 0x96],
    [0x94, 0x67, 0xbd],
    [0xc5, 0xb0, 0xd5],
    [0x8c, 0x56, 0x4b],
    [0xc4, 0x9c, 0x94],
    [0xe3, 0x77, 0xc2],
    [0xf7, 0xb6, 0xd2],
    [0x7f, 0x7f, 0x7f],
    [0xc7, 0xc7, 0xc7],
    [0xbc, 0xbd, 0x22],
    [0xdb, 0xdb, 0x8d],
    [0x17, 0xbe, 0xcf],
    [0x9e, 0xda, 0xe5],
];

/// Kind of support raster driving the classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassType {
    /// No classification, statistics over the whole difference raster only
    #[default]
    None,
    /// Slope of the reference DEM, in percent
    Slope,
    /// User-provided support raster
    User,
}

impl ClassType {
    pub fn is_active(&self) -> bool {
        !matches!(self, ClassType::None)
    }
}

/// Strictly increasing class boundaries; the last interval is unbounded above
#[derive(Debug, Clone, PartialEq)]
pub struct ClassRange {
    boundaries: Vec<f64>,
}

impl ClassRange {
    /// Validate and wrap a list of boundaries
    pub fn new(boundaries: Vec<f64>) -> DemResult<Self> {
        if boundaries.is_empty() {
            return Err(DemError::Configuration(
                "class range needs at least one boundary".to_string(),
            ));
        }
        if let Some(bad) = boundaries.iter().find(|b| !b.is_finite()) {
            return Err(DemError::Configuration(format!(
                "class range boundaries must be finite, got {}",
                bad
            )));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DemError::Configuration(format!(
                "class range boundaries must be strictly increasing: {:?}",
                boundaries
            )));
        }
        Ok(Self { boundaries })
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// Number of classes (one per boundary)
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Bounds `[lower, upper)` of class `index`; `upper` is `None` for the last one
    pub fn interval(&self, index: usize) -> (f64, Option<f64>) {
        (self.boundaries[index], self.boundaries.get(index + 1).copied())
    }

    /// Half-open, lower-inclusive membership test
    pub fn contains(&self, index: usize, value: f64) -> bool {
        match self.interval(index) {
            (lower, Some(upper)) => lower <= value && value < upper,
            (lower, None) => lower <= value,
        }
    }

    /// Index of the class holding `value`, if any
    pub fn class_of(&self, value: f64) -> Option<usize> {
        (0..self.len()).find(|&i| self.contains(i, value))
    }

    /// Display labels and set names for every class
    pub fn labels_and_names(&self, class_type: ClassType) -> (Vec<String>, Vec<String>) {
        let prefix = match class_type {
            ClassType::Slope => "∇",
            _ => "val",
        };
        let mut labels = Vec::with_capacity(self.len());
        let mut names = Vec::with_capacity(self.len());
        for index in 0..self.len() {
            match self.interval(index) {
                (lower, Some(upper)) => {
                    labels.push(format!("{} ∈ [{}% ; {}%]", prefix, lower, upper));
                    names.push(format!("[{}; {}]", lower, upper));
                }
                (lower, None) => {
                    labels.push(format!("{} > {}%", prefix, lower));
                    names.push(format!("[{}; inf[", lower));
                }
            }
        }
        (labels, names)
    }
}

/// Categorical palette sized for `nb_classes` (tab10 up to 10, tab20 up to 20)
pub fn class_palette(nb_classes: usize) -> DemResult<&'static [[u8; 3]]> {
    match nb_classes {
        n if n > MAX_CLASSES => Err(DemError::UnsupportedClassCount(n)),
        n if n > TAB10.len() => Ok(&TAB20),
        _ => Ok(&TAB10),
    }
}

/// Palette color scaled to `[0, 1]`
pub fn normalized_color(color: [u8; 3]) -> [f64; 3] {
    [
        f64::from(color[0]) / 255.0,
        f64::from(color[1]) / 255.0,
        f64::from(color[2]) / 255.0,
    ]
}

/// Disjoint membership grids with their display attributes
#[derive(Debug, Clone)]
pub struct ClassSet {
    pub classes: Vec<BoolGrid>,
    pub labels: Vec<String>,
    pub names: Vec<String>,
    /// Display color of each class, channels in `[0, 1]`
    pub colors: Vec<[f64; 3]>,
}

impl ClassSet {
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Number of member pixels per class
    pub fn counts(&self) -> Vec<usize> {
        self.classes
            .iter()
            .map(|class| class.iter().filter(|&&m| m).count())
            .collect()
    }
}

/// False-color RGBA rendering of a classification.
///
/// The alpha channel carries the cross-classification coherence signal:
/// [`TRANSPARENT_ALPHA`] marks pixels excluded from the coherent mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedImage {
    rgba: RgbaImage,
}

impl ClassifiedImage {
    fn blank(rows: usize, cols: usize) -> DemResult<Self> {
        let (width, height) = image_dims(rows, cols)?;
        Ok(Self {
            rgba: RgbaImage::from_pixel(width, height, Rgba(UNCLASSIFIED_COLOR)),
        })
    }

    /// Load a previously saved classified image
    pub fn from_png<P: AsRef<Path>>(path: P) -> DemResult<Self> {
        let rgba = image::open(path.as_ref())?.to_rgba8();
        Ok(Self { rgba })
    }

    /// Bake the image to a 4-channel PNG
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> DemResult<()> {
        log::debug!("Saving classified image to {}", path.as_ref().display());
        self.rgba.save(path.as_ref())?;
        Ok(())
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rgba.height() as usize, self.rgba.width() as usize)
    }

    pub fn pixel(&self, row: usize, col: usize) -> [u8; 4] {
        self.rgba.get_pixel(col as u32, row as u32).0
    }

    pub fn alpha(&self, row: usize, col: usize) -> u8 {
        self.pixel(row, col)[3]
    }

    fn set_pixel(&mut self, row: usize, col: usize, color: [u8; 4]) {
        self.rgba.put_pixel(col as u32, row as u32, Rgba(color));
    }

    pub(crate) fn set_alpha(&mut self, row: usize, col: usize, alpha: u8) {
        self.rgba.get_pixel_mut(col as u32, row as u32).0[3] = alpha;
    }

    /// Pixels whose alpha is not the transparent marker
    pub fn coherence_grid(&self) -> BoolGrid {
        let (rows, cols) = self.shape();
        BoolGrid::from_shape_fn((rows, cols), |(row, col)| {
            self.alpha(row, col) != TRANSPARENT_ALPHA
        })
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.rgba
    }
}

fn image_dims(rows: usize, cols: usize) -> DemResult<(u32, u32)> {
    let width = u32::try_from(cols)
        .map_err(|_| DemError::Processing(format!("raster too wide for an image: {}", cols)))?;
    let height = u32::try_from(rows)
        .map_err(|_| DemError::Processing(format!("raster too tall for an image: {}", rows)))?;
    Ok((width, height))
}

/// Partition a support raster into classes, optionally rendering them.
///
/// Fails with [`DemError::UnsupportedClassCount`] when the range defines more
/// classes than the palette can color.
pub fn build_classes(
    support: &ElevationRaster,
    class_range: &ClassRange,
    class_type: ClassType,
    render: bool,
) -> DemResult<(ClassSet, Option<ClassifiedImage>)> {
    let palette = class_palette(class_range.len())?;
    let (rows, cols) = support.shape();

    log::info!(
        "Classifying {}x{} support raster into {} classes",
        rows,
        cols,
        class_range.len()
    );

    let classes: Vec<BoolGrid> = (0..class_range.len())
        .map(|index| {
            support.data.mapv(|v| {
                support.is_valid_sample(v) && class_range.contains(index, f64::from(v))
            })
        })
        .collect();

    let (labels, names) = class_range.labels_and_names(class_type);
    let colors = palette[..class_range.len()]
        .iter()
        .map(|&c| normalized_color(c))
        .collect();

    let rendered = if render {
        let mut img = ClassifiedImage::blank(rows, cols)?;
        for ((row, col), &value) in support.data.indexed_iter() {
            if !support.is_valid_sample(value) {
                img.set_pixel(row, col, NODATA_COLOR);
            } else if let Some(index) = class_range.class_of(f64::from(value)) {
                let [r, g, b] = palette[index];
                img.set_pixel(row, col, [r, g, b, OPAQUE_ALPHA]);
            }
        }
        Some(img)
    } else {
        None
    };

    let set = ClassSet {
        classes,
        labels,
        names,
        colors,
    };
    for (name, count) in set.names.iter().zip(set.counts()) {
        log::debug!("Class {}: {} pixels", name, count);
    }

    Ok((set, rendered))
}
