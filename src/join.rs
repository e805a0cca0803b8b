use tracing::info;

use crate::decode::DecodedSet;
use crate::error::Result;
use crate::merge::VIN;
use crate::table::{Table, Value};
use crate::vin::normalize;

/// Columns whose completeness is reported after a join.
pub const KEY_COLUMNS: [&str; 5] = ["Marque", "Modèle", "Année", "Type", "Carburant"];

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFill {
    pub column: String,
    pub filled: usize,
    pub total: usize,
}

impl ColumnFill {
    pub fn percent(&self) -> f64 {
        self.filled as f64 / self.total.max(1) as f64 * 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinStats {
    pub rows: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub added_columns: Vec<String>,
    /// Non-missing share of each key column present in the output.
    pub fill: Vec<ColumnFill>,
}

impl JoinStats {
    pub fn print(&self) {
        println!(
            "Joined {} rows ({} matched, {} without decode data).",
            self.rows, self.matched, self.unmatched
        );
        for f in &self.fill {
            println!("  {}: {}/{} ({:.1}%)", f.column, f.filled, f.total, f.percent());
        }
    }
}

fn fill_rates(table: &Table) -> Vec<ColumnFill> {
    KEY_COLUMNS
        .iter()
        .filter_map(|&column| {
            let values = table.column_values(column)?;
            Some(ColumnFill {
                column: column.to_string(),
                filled: values.iter().filter(|v| !v.is_missing()).count(),
                total: values.len(),
            })
        })
        .collect()
}

/// Left join decoded attributes onto `merged` by normalized VIN. Every merged
/// row comes out exactly once. Where both sides carry a column of the same
/// name, the merged side's value stays and the decoded one is dropped.
pub fn join(merged: &Table, decoded: &DecodedSet) -> Result<(Table, JoinStats)> {
    let vin_idx = merged.require_column(VIN, "merged table")?;

    let added: Vec<&'static str> = decoded
        .columns()
        .into_iter()
        .filter(|c| merged.column_index(c).is_none())
        .collect();

    let mut out = Table::new(
        merged
            .columns()
            .iter()
            .map(String::as_str)
            .chain(added.iter().copied()),
    );
    let mut stats = JoinStats {
        added_columns: added.iter().map(|c| c.to_string()).collect(),
        ..Default::default()
    };

    for row in merged.rows() {
        let record = row[vin_idx]
            .render()
            .and_then(|raw| normalize(&raw).ok())
            .and_then(|vin| decoded.get(&vin));
        let mut joined = row.clone();
        match record {
            Some(rec) => {
                stats.matched += 1;
                joined.extend(
                    added
                        .iter()
                        .map(|c| rec.column(c).map_or(Value::Missing, Value::from)),
                );
            }
            None => {
                stats.unmatched += 1;
                joined.extend(added.iter().map(|_| Value::Missing));
            }
        }
        out.push_row(joined);
    }

    stats.rows = out.len();
    stats.fill = fill_rates(&out);
    info!(
        "joined {} rows: {} matched, {} without decode data",
        stats.rows, stats.matched, stats.unmatched
    );
    Ok((out, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedField, DecodedRecord};
    use crate::error::Error;
    use std::collections::BTreeMap;

    fn merged() -> Table {
        Table::from_reader(
            "ID,VIN,Prix,Source\n\
             A1,1hgcm82633a004352,100,A\n\
             A2,1M8GDM9AXKP042788,200,B\n\
             A3,junk,300,B\n"
                .as_bytes(),
        )
        .unwrap()
    }

    fn decoded() -> DecodedSet {
        let mut set = DecodedSet::default();
        let vin = normalize("1HGCM82633A004352").unwrap();
        set.insert(DecodedRecord {
            wmi: vin.wmi().to_string(),
            vin,
            fields: BTreeMap::from([
                (DecodedField::Make, "HONDA".to_string()),
                (DecodedField::ModelYear, "2003".to_string()),
            ]),
        });
        set
    }

    #[test]
    fn left_join_keeps_every_row() {
        let (t, stats) = join(&merged(), &decoded()).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.columns(), ["ID", "VIN", "Prix", "Source", "Marque", "Année", "WMI"]);
        assert_eq!(t.get(0, "Marque"), Some(&Value::Text("HONDA".into())));
        assert_eq!(t.get(0, "Année"), Some(&Value::Text("2003".into())));
        assert_eq!(t.get(0, "VIN"), Some(&Value::Text("1hgcm82633a004352".into())));
        assert!(t.get(1, "Marque").unwrap().is_missing());
        assert!(t.get(2, "WMI").unwrap().is_missing());
        assert_eq!((stats.matched, stats.unmatched), (1, 2));
    }

    #[test]
    fn fill_rates_of_key_columns() {
        let (_, stats) = join(&merged(), &decoded()).unwrap();
        let marque = &stats.fill[0];
        assert_eq!(stats.fill.len(), 2);
        assert_eq!((marque.column.as_str(), marque.filled, marque.total), ("Marque", 1, 3));
        assert!((marque.percent() - 33.333).abs() < 0.01);
        assert_eq!(stats.fill[1].column, "Année");

        let (_, none) = join(&merged(), &DecodedSet::default()).unwrap();
        assert!(none.fill.is_empty());
    }

    #[test]
    fn empty_decoded_set_adds_nothing() {
        let m = merged();
        let (t, stats) = join(&m, &DecodedSet::default()).unwrap();
        assert_eq!(t, m);
        assert!(stats.added_columns.is_empty());
    }

    #[test]
    fn merged_side_wins_on_conflict() {
        let m = Table::from_reader("VIN,Marque\n1HGCM82633A004352,Acura\n".as_bytes()).unwrap();
        let (t, _) = join(&m, &decoded()).unwrap();
        assert_eq!(t.columns(), ["VIN", "Marque", "Année", "WMI"]);
        assert_eq!(t.get(0, "Marque"), Some(&Value::Text("Acura".into())));
    }

    #[test]
    fn decoded_values_stay_verbatim() {
        let vin = normalize("1HGCM82633A004352").unwrap();
        let mut set = DecodedSet::default();
        set.insert(DecodedRecord {
            wmi: vin.wmi().to_string(),
            vin,
            fields: BTreeMap::from([
                (DecodedField::DisplacementL, "2.0".to_string()),
                (DecodedField::Series, "0123".to_string()),
            ]),
        });
        let m = Table::from_reader("VIN\n1HGCM82633A004352\n".as_bytes()).unwrap();
        let (t, _) = join(&m, &set).unwrap();

        let mut csv = Vec::new();
        t.to_writer(&mut csv).unwrap();
        assert_eq!(
            String::from_utf8(csv).unwrap(),
            "VIN,Cylindrée,Série,WMI\n1HGCM82633A004352,2.0,0123,1HG\n"
        );
    }

    #[test]
    fn requires_vin_column() {
        let m = Table::from_reader("ID\n1\n".as_bytes()).unwrap();
        assert!(matches!(join(&m, &decoded()), Err(Error::MissingColumn { .. })));
    }
}
