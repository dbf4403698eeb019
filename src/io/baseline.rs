//! Comparison of stats CSV files against a baseline run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::types::{DemError, DemResult};

/// Default tolerance on numeric cells
pub const DEFAULT_EPSILON: f64 = 1e-15;

/// One numeric cell differing between baseline and tested run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvDifference {
    pub csv_file: String,
    #[serde(rename = "class name")]
    pub class_name: String,
    #[serde(rename = "stat name")]
    pub stat_name: String,
    /// Column of the stat in the CSV (0 is the class name)
    pub column: usize,
    pub baseline_val: f64,
    pub test_val: f64,
}

/// Lines of a CSV file, without line terminators
pub fn load_csv<P: AsRef<Path>>(path: P) -> DemResult<Vec<String>> {
    let content = fs::read_to_string(path.as_ref())?;
    Ok(content.lines().map(|l| l.trim_end_matches('\r').to_string()).collect())
}

fn parse_cell(cell: &str, csv_file: &str) -> DemResult<f64> {
    cell.trim().parse::<f64>().map_err(|_| {
        DemError::Consistency(format!("non numeric value '{}' in file {}", cell, csv_file))
    })
}

/// Compare one baseline CSV to its tested counterpart.
///
/// Header rows and class names must match exactly; numeric cells must be
/// within `epsilon` of each other (NaN never matches). With a zero
/// `epsilon`, cells whose text differs are reported even when they parse
/// to the same `f64`. Rows are compared pairwise up to the shorter file.
pub fn check_csv<S: AsRef<str>>(
    baseline: &[S],
    tested: &[S],
    csv_file: &str,
    epsilon: f64,
) -> DemResult<Vec<CsvDifference>> {
    let (Some(baseline_header), Some(tested_header)) = (baseline.first(), tested.first()) else {
        return Err(DemError::Consistency(format!("missing header row in file {}", csv_file)));
    };
    let (baseline_header, tested_header) = (baseline_header.as_ref(), tested_header.as_ref());
    if baseline_header != tested_header {
        return Err(DemError::Consistency(format!(
            "inconsistent stats between baseline ({}) and tested version ({}) for file {}",
            baseline_header, tested_header, csv_file
        )));
    }
    if baseline.len() != tested.len() {
        log::warn!(
            "{}: baseline has {} rows, tested version has {}; comparing the common rows",
            csv_file,
            baseline.len() - 1,
            tested.len() - 1
        );
    }

    let stat_names: Vec<&str> = baseline_header.split(',').map(|h| h.trim_matches('"')).collect();
    let mut differences = Vec::new();

    for (baseline_row, tested_row) in baseline.iter().zip(tested).skip(1) {
        let baseline_cols: Vec<&str> = baseline_row.as_ref().split(',').collect();
        let tested_cols: Vec<&str> = tested_row.as_ref().split(',').collect();

        if baseline_cols[0] != tested_cols[0] {
            return Err(DemError::Consistency(format!(
                "inconsistent class name for file {} between baseline ({}) and tested version ({})",
                csv_file, baseline_cols[0], tested_cols[0]
            )));
        }
        let class_name = baseline_cols[0].trim_matches('"');

        for (column, (b, t)) in baseline_cols.iter().zip(&tested_cols).enumerate().skip(1) {
            let baseline_val = parse_cell(b, csv_file)?;
            let test_val = parse_cell(t, csv_file)?;
            let exact_text_differs = epsilon == 0.0 && b.trim() != t.trim();
            if exact_text_differs || !approx::abs_diff_eq!(baseline_val, test_val, epsilon = epsilon) {
                differences.push(CsvDifference {
                    csv_file: csv_file.to_string(),
                    class_name: class_name.to_string(),
                    stat_name: stat_names.get(column).copied().unwrap_or_default().to_string(),
                    column,
                    baseline_val,
                    test_val,
                });
            }
        }
    }
    Ok(differences)
}

fn csv_files(dir: &Path) -> DemResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}

/// Compare every stats CSV of `output_dir` with the same-named file of
/// `baseline_dir`.
///
/// All differences of all files are gathered before failing with
/// [`DemError::BaselineMismatch`].
pub fn compare_with_baseline<P: AsRef<Path>, Q: AsRef<Path>>(
    baseline_dir: P,
    output_dir: Q,
    epsilon: f64,
) -> DemResult<()> {
    let baseline_files = csv_files(baseline_dir.as_ref())?;
    let output_files = csv_files(output_dir.as_ref())?;

    if baseline_files.len() != output_files.len() {
        return Err(DemError::Consistency(format!(
            "inconsistent number of csv files between baseline ({}) and tested output ({})",
            baseline_files.len(),
            output_files.len()
        )));
    }

    let mut differences = Vec::new();
    for (baseline_file, output_file) in baseline_files.iter().zip(&output_files) {
        if baseline_file.file_name() != output_file.file_name() {
            return Err(DemError::Consistency(format!(
                "no tested counterpart for baseline file {}",
                baseline_file.display()
            )));
        }
        let name = baseline_file.display().to_string();
        differences.extend(check_csv(
            &load_csv(baseline_file)?,
            &load_csv(output_file)?,
            &name,
            epsilon,
        )?);
    }

    if !differences.is_empty() {
        return Err(DemError::BaselineMismatch(differences));
    }
    log::info!(
        "No difference between {} tested file(s) and baseline",
        output_files.len()
    );
    Ok(())
}
