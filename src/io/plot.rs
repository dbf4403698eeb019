//! PNG rendering of histogram, Gaussian-fit and elevation-difference plots.
//!
//! Plots are drawn directly on an RGBA canvas: axes, curves and bars only,
//! no text.

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::core::histogram::HistogramSet;
use crate::core::statistics::nmad;
use crate::types::{DemResult, ElevationRaster};

pub const PLOT_WIDTH: u32 = 700;
pub const PLOT_HEIGHT: u32 = 800;
const MARGIN: u32 = 40;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const AXIS: Rgba<u8> = Rgba([64, 64, 64, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// 8-bit RGBA from a normalized RGB triplet
pub fn to_rgba(color: [f64; 3]) -> Rgba<u8> {
    let c = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([c(color[0]), c(color[1]), c(color[2]), 255])
}

/// Rectangular plotting area mapping data coordinates to pixels
struct Panel {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl Panel {
    fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        let px = self.left as f64 + (x - x0) / (x1 - x0) * (self.width - 1) as f64;
        let py = (self.top + self.height - 1) as f64 - (y - y0) / (y1 - y0) * (self.height - 1) as f64;
        (px, py)
    }

    fn put(&self, img: &mut RgbaImage, px: f64, py: f64, color: Rgba<u8>) {
        let (px, py) = (px.round(), py.round());
        if px < self.left as f64 || py < self.top as f64 {
            return;
        }
        let (px, py) = (px as u32, py as u32);
        if px < self.left + self.width && py < self.top + self.height {
            img.put_pixel(px, py, color);
        }
    }

    /// Line segment in data coordinates
    fn line(&self, img: &mut RgbaImage, from: (f64, f64), to: (f64, f64), color: Rgba<u8>) {
        let (ax, ay) = self.to_pixel(from.0, from.1);
        let (bx, by) = self.to_pixel(to.0, to.1);
        if !(ax.is_finite() && ay.is_finite() && bx.is_finite() && by.is_finite()) {
            return;
        }
        let steps = (bx - ax).abs().max((by - ay).abs()).ceil().max(1.0) as usize;
        for s in 0..=steps {
            let t = s as f64 / steps as f64;
            self.put(img, ax + (bx - ax) * t, ay + (by - ay) * t, color);
        }
    }

    /// Filled rectangle in data coordinates
    fn rect(&self, img: &mut RgbaImage, x: (f64, f64), y: (f64, f64), color: Rgba<u8>) {
        let (ax, ay) = self.to_pixel(x.0, y.0);
        let (bx, by) = self.to_pixel(x.1, y.1);
        let (x_lo, x_hi) = (ax.min(bx).round() as i64, ax.max(bx).round() as i64);
        let (y_lo, y_hi) = (ay.min(by).round() as i64, ay.max(by).round() as i64);
        for py in y_lo..=y_hi {
            for px in x_lo..=x_hi {
                self.put(img, px as f64, py as f64, color);
            }
        }
    }

    fn axes(&self, img: &mut RgbaImage) {
        let bottom = self.top + self.height - 1;
        for x in self.left..self.left + self.width {
            img.put_pixel(x, bottom, AXIS);
        }
        for y in self.top..=bottom {
            img.put_pixel(self.left, y, AXIS);
        }
        // zero line
        let (zx, _) = self.to_pixel(0.0, 0.0);
        if zx >= self.left as f64 && zx < (self.left + self.width) as f64 {
            for y in (self.top..=bottom).step_by(4) {
                img.put_pixel(zx.round() as u32, y, AXIS);
            }
        }
    }
}

fn density_range(set: &HistogramSet) -> (f64, f64) {
    let first = set.edges.first().copied().unwrap_or(-1.0);
    let last = set.edges.last().copied().unwrap_or(1.0);
    (first, last)
}

fn max_density(set: &HistogramSet) -> f64 {
    let max = set
        .classes
        .iter()
        .flat_map(|c| c.density.iter().copied())
        .fold(0.0_f64, f64::max);
    if max > 0.0 {
        max * 1.05
    } else {
        1.0
    }
}

/// Overlay of the normalized histograms of every class
pub fn plot_histograms<P: AsRef<Path>>(set: &HistogramSet, path: P) -> DemResult<()> {
    let mut img = RgbaImage::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, WHITE);
    let panel = Panel {
        left: MARGIN,
        top: MARGIN,
        width: PLOT_WIDTH - 2 * MARGIN,
        height: PLOT_HEIGHT - 2 * MARGIN,
        x_range: density_range(set),
        y_range: (0.0, max_density(set)),
    };
    panel.axes(&mut img);

    for class in &set.classes {
        let color = to_rgba(class.color);
        let mut previous = 0.0;
        for (bin, &d) in set.edges.windows(2).zip(&class.density) {
            panel.line(&mut img, (bin[0], previous), (bin[0], d), color);
            panel.line(&mut img, (bin[0], d), (bin[1], d), color);
            previous = d;
        }
        if let Some(&last) = set.edges.last() {
            panel.line(&mut img, (last, previous), (last, 0.0), color);
        }
    }

    img.save(path.as_ref())?;
    log::debug!("Saved histogram plot to: {}", path.as_ref().display());
    Ok(())
}

/// Fitted Gaussians of every class, with a stacked class contribution bar
pub fn plot_gaussian_fits<P: AsRef<Path>>(set: &HistogramSet, path: P) -> DemResult<()> {
    let mut img = RgbaImage::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, WHITE);
    let full = PLOT_WIDTH - 3 * MARGIN;
    let curve_width = full * 10 / 11;
    let (x0, x1) = density_range(set);

    let peak = set
        .classes
        .iter()
        .filter_map(|c| c.fit.map(|f| f.params.amplitude))
        .fold(max_density(set), f64::max);
    let curves = Panel {
        left: MARGIN,
        top: MARGIN,
        width: curve_width,
        height: PLOT_HEIGHT - 2 * MARGIN,
        x_range: (x0, x1),
        y_range: (0.0, peak),
    };
    curves.axes(&mut img);

    let sample_step = set.bin_step / 10.0;
    let nb_samples = ((x1 - x0) / sample_step).ceil().max(1.0) as usize;
    for class in &set.classes {
        let Some(fit) = class.fit else { continue };
        let color = to_rgba(class.color);
        let mut previous: Option<(f64, f64)> = None;
        for i in 0..nb_samples {
            let x = x0 + i as f64 * sample_step;
            let point = (x, fit.params.evaluate(x));
            if let Some(p) = previous {
                curves.line(&mut img, p, point, color);
            }
            previous = Some(point);
        }
    }

    let contributions = Panel {
        left: 2 * MARGIN + curve_width,
        top: MARGIN,
        width: full - curve_width,
        height: PLOT_HEIGHT - 2 * MARGIN,
        x_range: (0.0, 1.0),
        y_range: (0.0, 100.0),
    };
    for class in &set.classes {
        if let (Some(share), Some(top)) = (class.contribution, class.cumulative_contribution) {
            contributions.rect(&mut img, (0.25, 0.75), (top - share, top), to_rgba(class.color));
        }
    }

    img.save(path.as_ref())?;
    log::debug!("Saved gaussian fit plot to: {}", path.as_ref().display());
    Ok(())
}

/// Diverging blue-white-red ramp for `t` in [-1, 1]
fn diverging(t: f64) -> Rgba<u8> {
    let t = t.clamp(-1.0, 1.0);
    let fade = |v: f64| (255.0 * (1.0 - v)).round() as u8;
    if t < 0.0 {
        Rgba([fade(-t), fade(-t), 255, 255])
    } else {
        Rgba([255, fade(t), fade(t), 255])
    }
}

/// Elevation differences colored within `±3 NMAD`, one pixel per sample.
///
/// Absent samples are transparent.
pub fn plot_dem_diff<P: AsRef<Path>>(diff: &ElevationRaster, path: P) -> DemResult<()> {
    let valid: Vec<f64> = diff
        .data
        .iter()
        .filter(|&&v| diff.is_valid_sample(v))
        .map(|&v| f64::from(v))
        .collect();
    let max_value = 3.0 * nmad(&valid);
    log::debug!("dz map color range: +/-{:.4}", max_value);

    let (height, width) = diff.shape();
    let mut img = RgbaImage::from_pixel(width as u32, height as u32, TRANSPARENT);
    for ((row, col), &v) in diff.data.indexed_iter() {
        if !diff.is_valid_sample(v) {
            continue;
        }
        let t = if max_value > 0.0 {
            f64::from(v) / max_value
        } else {
            0.0
        };
        img.put_pixel(col as u32, row as u32, diverging(t));
    }

    img.save(path.as_ref())?;
    log::info!("Saved dz map to: {}", path.as_ref().display());
    Ok(())
}
