use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::collect::{ListingTable, SourceProfile};
use crate::error::{Error, Result};
use crate::table::{Table, Value};
use crate::vin::{normalize, Vin};

pub const VIN: &str = "VIN";
pub const PRICE: &str = "Prix";
pub const MILEAGE: &str = "Kilometrage";
pub const SOURCE: &str = "Source";
/// Provenance for files no profile claims.
pub const OTHER_SOURCE: &str = "Autre";

/// Columns whose lowercased name contains any of `needles` become `target`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenameRule {
    pub needles: Vec<String>,
    pub target: String,
}

impl RenameRule {
    fn new(needles: &[&str], target: &str) -> Self {
        RenameRule {
            needles: needles.iter().map(|s| s.to_string()).collect(),
            target: target.to_string(),
        }
    }
}

/// Ordered rename rules; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SchemaMapping {
    rules: Vec<RenameRule>,
}

impl Default for SchemaMapping {
    fn default() -> Self {
        SchemaMapping {
            rules: vec![
                RenameRule::new(&["price", "prix"], PRICE),
                RenameRule::new(&["mileage", "kil"], MILEAGE),
                RenameRule::new(&["vin"], VIN),
            ],
        }
    }
}

impl SchemaMapping {
    pub fn canonical(&self, column: &str) -> Option<&str> {
        let lower = column.trim().to_lowercase();
        self.rules
            .iter()
            .find(|r| r.needles.iter().any(|n| lower.contains(&n.to_lowercase())))
            .map(|r| r.target.as_str())
    }

    /// Header after renaming. When two columns map to the same name, the
    /// later one keeps its original name, suffixed `_2`, `_3`.. if that is
    /// taken too. Output names are always distinct.
    pub fn rename_columns(&self, columns: &[String]) -> Vec<String> {
        let mut taken: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(columns.len());
        for col in columns {
            let original = col.trim().to_string();
            let mut renamed = match self.canonical(col) {
                Some(target) if !taken.contains(target) => target.to_string(),
                _ => original.clone(),
            };
            let mut n = 2;
            while taken.contains(&renamed) {
                renamed = format!("{}_{}", original, n);
                n += 1;
            }
            taken.insert(renamed.clone());
            out.push(renamed);
        }
        out
    }
}

/// One table to merge, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub label: String,
    pub table: Table,
}

impl SourceInput {
    pub fn from_listings(profile: &SourceProfile, listings: &ListingTable) -> Self {
        SourceInput {
            label: profile.label.clone(),
            table: listings.to_table(),
        }
    }
}

/// Provenance label for a file: the profile whose name or label appears in
/// the file name, else `Autre`.
pub fn label_for_file(path: &Path, profiles: &[SourceProfile]) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    profiles
        .iter()
        .find(|p| name.contains(&p.name.to_lowercase()) || name.contains(&p.label.to_lowercase()))
        .map(|p| p.label.clone())
        .unwrap_or_else(|| OTHER_SOURCE.to_string())
}

/// Read every file up front; a missing file aborts before any merging.
pub fn read_inputs(paths: &[PathBuf], profiles: &[SourceProfile]) -> Result<Vec<SourceInput>> {
    if let Some(missing) = paths.iter().find(|p| !p.exists()) {
        return Err(Error::MissingInput(missing.clone()));
    }
    paths
        .iter()
        .map(|p| {
            Ok(SourceInput {
                label: label_for_file(p, profiles),
                table: Table::read_csv(p)?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeStats {
    pub rows_in: usize,
    pub rejected_vins: usize,
    pub duplicates: usize,
    pub rows_out: usize,
    pub per_source: Vec<(String, usize)>,
}

impl MergeStats {
    pub fn print(&self) {
        println!(
            "Merged {} rows into {} ({} invalid VINs, {} duplicates).",
            self.rows_in, self.rows_out, self.rejected_vins, self.duplicates
        );
        for (label, n) in &self.per_source {
            println!("  {:<14} {}", label, n);
        }
    }
}

/// `pd.to_numeric(errors="coerce")`: numbers stay, numeric text is parsed,
/// anything else becomes missing.
fn coerce_numeric(v: Value) -> Value {
    match v {
        Value::Text(s) => match Value::infer(&s) {
            n @ (Value::Int(_) | Value::Float(_)) => n,
            _ => Value::Missing,
        },
        other => other,
    }
}

/// Union the inputs into one table with a `Source` column, keeping the first
/// row seen for each normalized VIN.
pub fn merge(inputs: &[SourceInput], mapping: &SchemaMapping) -> Result<(Table, MergeStats)> {
    let renamed: Vec<Vec<String>> = inputs
        .iter()
        .map(|i| mapping.rename_columns(i.table.columns()))
        .collect();

    for (input, cols) in inputs.iter().zip(&renamed) {
        if !cols.iter().any(|c| c == VIN) {
            return Err(Error::MissingColumn {
                column: VIN.to_string(),
                source_name: input.label.clone(),
            });
        }
    }

    let mut columns: Vec<String> = Vec::new();
    for cols in &renamed {
        for c in cols.iter().map(String::as_str).chain(std::iter::once(SOURCE)) {
            if !columns.iter().any(|x| x == c) {
                columns.push(c.to_string());
            }
        }
    }
    let mut out = Table::new(columns.iter().cloned());
    let index_of = |name: &str| columns.iter().position(|c| c == name);
    let Some(vin_idx) = index_of(VIN) else {
        return Ok((Table::new([VIN, SOURCE]), MergeStats::default()));
    };
    let source_idx = index_of(SOURCE).unwrap_or(vin_idx);
    let price_idx = index_of(PRICE);
    let mileage_idx = index_of(MILEAGE);

    let mut seen: HashSet<Vin> = HashSet::new();
    let mut stats = MergeStats::default();
    for (input, cols) in inputs.iter().zip(&renamed) {
        let targets: Vec<usize> = cols.iter().filter_map(|c| index_of(c)).collect();
        let mut kept = 0;
        for row in input.table.rows() {
            stats.rows_in += 1;
            let mut merged = vec![Value::Missing; columns.len()];
            for (value, &t) in row.iter().zip(&targets) {
                merged[t] = value.clone();
            }

            let raw_vin = merged[vin_idx].render();
            let vin = match raw_vin.as_deref().map(normalize) {
                Some(Ok(v)) => v,
                _ => {
                    debug!("{}: dropping row with invalid VIN {:?}", input.label, raw_vin);
                    stats.rejected_vins += 1;
                    continue;
                }
            };
            if !seen.insert(vin.clone()) {
                stats.duplicates += 1;
                continue;
            }

            merged[vin_idx] = Value::from(vin.into_string());
            merged[source_idx] = Value::from(input.label.as_str());
            for idx in [price_idx, mileage_idx].into_iter().flatten() {
                merged[idx] = coerce_numeric(std::mem::replace(&mut merged[idx], Value::Missing));
            }
            out.push_row(merged);
            kept += 1;
        }
        stats.per_source.push((input.label.clone(), kept));
    }

    stats.rows_out = out.len();
    if stats.rejected_vins > 0 {
        warn!("{} rows dropped for invalid VINs", stats.rejected_vins);
    }
    info!(
        "merged {} inputs: {} rows in, {} out, {} duplicates",
        inputs.len(),
        stats.rows_in,
        stats.rows_out,
        stats.duplicates
    );
    Ok((out, stats))
}
