//! Cross-classification of the reference and DSM-side supports.
//!
//! A pixel is coherent when both supports put it in the same classes. The
//! outcome is written into the alpha channel of both classified images, which
//! the mask composer reads afterwards.

use crate::core::classification::{ClassSet, ClassifiedImage, TRANSPARENT_ALPHA};
use crate::types::{BoolGrid, DemError, DemResult};

/// Per-pixel agreement of two classifications over every class index
pub fn coherence_grid(ref_classes: &ClassSet, dsm_classes: &ClassSet) -> DemResult<BoolGrid> {
    if ref_classes.len() != dsm_classes.len() {
        return Err(DemError::Processing(format!(
            "cannot cross-classify {} reference classes against {} DSM classes",
            ref_classes.len(),
            dsm_classes.len()
        )));
    }
    let first = ref_classes
        .classes
        .first()
        .ok_or_else(|| DemError::Processing("cannot cross-classify an empty class set".to_string()))?;

    let mut coherent = BoolGrid::from_elem(first.dim(), true);
    for (ref_class, dsm_class) in ref_classes.classes.iter().zip(&dsm_classes.classes) {
        if ref_class.dim() != coherent.dim() || dsm_class.dim() != coherent.dim() {
            return Err(DemError::ShapeMismatch {
                expected: coherent.dim(),
                found: if ref_class.dim() != coherent.dim() {
                    ref_class.dim()
                } else {
                    dsm_class.dim()
                },
            });
        }
        ndarray::Zip::from(&mut coherent)
            .and(ref_class)
            .and(dsm_class)
            .for_each(|c, &r, &d| *c &= r == d);
    }
    Ok(coherent)
}

/// Make incoherent pixels transparent in both classified images.
///
/// Coherent pixels keep their alpha. Returns the number of incoherent pixels.
pub fn reconcile(
    ref_rendered: &mut ClassifiedImage,
    dsm_rendered: &mut ClassifiedImage,
    ref_classes: &ClassSet,
    dsm_classes: &ClassSet,
) -> DemResult<usize> {
    let coherent = coherence_grid(ref_classes, dsm_classes)?;
    for shape in [ref_rendered.shape(), dsm_rendered.shape()] {
        if shape != coherent.dim() {
            return Err(DemError::ShapeMismatch {
                expected: coherent.dim(),
                found: shape,
            });
        }
    }

    let mut incoherent = 0;
    for ((row, col), &is_coherent) in coherent.indexed_iter() {
        if !is_coherent {
            ref_rendered.set_alpha(row, col, TRANSPARENT_ALPHA);
            dsm_rendered.set_alpha(row, col, TRANSPARENT_ALPHA);
            incoherent += 1;
        }
    }

    log::info!(
        "Cross-classification: {} incoherent pixels out of {} ({:.2}%)",
        incoherent,
        coherent.len(),
        100.0 * incoherent as f64 / coherent.len().max(1) as f64
    );
    Ok(incoherent)
}
