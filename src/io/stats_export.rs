//! Persistence of per-mode statistics as JSON and CSV.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::core::statistics::StatsRecord;
use crate::types::DemResult;

/// CSV header, in column order
pub const CSV_HEADER: [&str; 10] = [
    "Set Name",
    "% Of Valid Points",
    "Max Error",
    "Min Error",
    "Mean Error",
    "Error std",
    "RMSE",
    "Median Error",
    "NMAD",
    "90 percentile",
];

/// Histogram artifact attached to the record of the same label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlottedClass {
    pub label: String,
    pub plot_file: PathBuf,
    pub color: [f64; 3],
}

/// Files written for one mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedStats {
    pub json: PathBuf,
    pub csv: Option<PathBuf>,
}

#[derive(Serialize)]
struct StatsEntry<'a> {
    #[serde(flatten)]
    record: &'a StatsRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    plot_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plot_color: Option<[f64; 3]>,
}

/// Records keyed by their position ("0", "1", ...)
struct IndexedEntries<'a>(Vec<StatsEntry<'a>>);

impl Serialize for IndexedEntries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, entry) in self.0.iter().enumerate() {
            map.serialize_entry(&index.to_string(), entry)?;
        }
        map.end()
    }
}

/// Save the records of one mode.
///
/// The JSON maps each record's position to its fields, plus `plot_file` /
/// `plot_color` when a histogram artifact exists for its label. With
/// `to_csv`, a CSV with the same stem is written next to it.
pub fn save_results<P: AsRef<Path>>(
    json_path: P,
    records: &[StatsRecord],
    plotted: &[PlottedClass],
    to_csv: bool,
) -> DemResult<SavedStats> {
    let json_path = json_path.as_ref();
    let entries = IndexedEntries(
        records
            .iter()
            .map(|record| {
                let plot = plotted.iter().find(|p| p.label == record.class_label);
                StatsEntry {
                    record,
                    plot_file: plot.map(|p| p.plot_file.display().to_string()),
                    plot_color: plot.map(|p| p.color),
                }
            })
            .collect(),
    );

    let mut writer = BufWriter::new(File::create(json_path)?);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    entries.serialize(&mut serializer)?;
    writer.flush()?;
    log::info!("Saved {} stats records to: {}", records.len(), json_path.display());

    let csv = if to_csv {
        let csv_path = json_path.with_extension("csv");
        write_csv(&csv_path, records)?;
        Some(csv_path)
    } else {
        None
    };

    Ok(SavedStats {
        json: json_path.to_path_buf(),
        csv,
    })
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Bare numeric CSV cell
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{:?}", value)
    }
}

fn write_csv(path: &Path, records: &[StatsRecord]) -> DemResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let header: Vec<String> = CSV_HEADER.iter().map(|h| quote(h)).collect();
    write!(writer, "{}\r\n", header.join(","))?;

    for record in records {
        let numbers = [
            record.percent,
            record.max,
            record.min,
            record.mean,
            record.std,
            record.rmse,
            record.median,
            record.nmad,
            record.percentile_90,
        ];
        let mut row = vec![quote(&record.class_name)];
        row.extend(numbers.iter().map(|&v| format_number(v)));
        write!(writer, "{}\r\n", row.join(","))?;
    }
    writer.flush()?;
    Ok(())
}
