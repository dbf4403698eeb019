use std::fs;
use std::path::Path;

use crate::core::histogram::HistogramSet;
use crate::io::stats_export::PlottedClass;
use crate::types::DemResult;

/// `%.18e` rendering (mantissa with 18 decimals, signed two-digit exponent)
pub fn format_scientific(value: f64) -> String {
    if !value.is_finite() {
        return format!("{}", value).to_lowercase();
    }
    let raw = format!("{:.18e}", value);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw,
    }
}

/// Write the bins file and one normalized-count array per plotted class.
///
/// Produces `<prefix>bins.txt` (first edge, last edge, bin step, one per
/// line) and `<prefix><index>.json` for each class of `set`. Returns the
/// count files keyed by class label, in class order.
pub fn save_histogram_counts<P: AsRef<Path>>(
    output_dir: P,
    prefix: &str,
    set: &HistogramSet,
) -> DemResult<Vec<PlottedClass>> {
    let output_dir = output_dir.as_ref();

    let first = set.edges.first().copied().unwrap_or(f64::NAN);
    let last = set.edges.last().copied().unwrap_or(f64::NAN);
    let bins_text: String = [first, last, set.bin_step]
        .iter()
        .map(|&v| format!("{}\n", format_scientific(v)))
        .collect();
    fs::write(output_dir.join(format!("{}bins.txt", prefix)), bins_text)?;

    let mut plotted = Vec::with_capacity(set.classes.len());
    for class in &set.classes {
        let path = output_dir.join(format!("{}{}.json", prefix, class.index));
        fs::write(&path, serde_json::to_string(&class.density)?)?;
        plotted.push(PlottedClass {
            label: class.label.clone(),
            plot_file: path,
            color: class.color,
        });
    }

    log::debug!(
        "Saved {} histogram count files with prefix '{}' in {}",
        plotted.len(),
        prefix,
        output_dir.display()
    );
    Ok(plotted)
}
