use tracing::{debug, info};

use crate::table::{Table, Value};

/// Label written into missing categorical cells.
pub const UNKNOWN: &str = "Inconnu";

/// Which columns get which treatment.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanPolicy {
    pub price: Vec<String>,
    pub integer: Vec<String>,
    pub categorical: Vec<String>,
    pub sentinel: String,
}

impl Default for CleanPolicy {
    fn default() -> Self {
        let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        CleanPolicy {
            price: owned(&["Prix"]),
            integer: owned(&["Année", "Kilometrage"]),
            categorical: owned(&["Marque", "Modèle", "Type", "Carburant", "Transmission"]),
            sentinel: UNKNOWN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Price,
    Integer,
    Categorical,
    Numeric,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanStats {
    pub filled: usize,
    pub coerced: usize,
}

fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

/// "$12,500" -> 12500; anything unparseable -> missing.
fn parse_price(v: &Value) -> Value {
    match v {
        Value::Text(s) => {
            let stripped: String = s
                .chars()
                .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
                .collect();
            match Value::infer(&stripped) {
                n @ (Value::Int(_) | Value::Float(_)) => n,
                _ => Value::Missing,
            }
        }
        other => other.clone(),
    }
}

impl CleanPolicy {
    fn kind(&self, column: &str, values: &[&Value]) -> ColumnKind {
        let named = |set: &[String]| set.iter().any(|c| c == column);
        if named(&self.price) {
            ColumnKind::Price
        } else if named(&self.integer) {
            ColumnKind::Integer
        } else if named(&self.categorical) {
            ColumnKind::Categorical
        } else if values.iter().all(|v| v.is_missing() || v.is_numeric()) {
            // a column with no values at all reads as numeric, like a dataframe would
            ColumnKind::Numeric
        } else {
            ColumnKind::Text
        }
    }

    /// Apply the per-column policy. The result has no missing cells.
    pub fn clean(&self, table: &Table) -> (Table, CleanStats) {
        let mut out = table.clone();
        let mut stats = CleanStats::default();

        for (idx, column) in table.columns().iter().enumerate() {
            let values: Vec<&Value> = table.rows().iter().map(|r| &r[idx]).collect();
            let kind = self.kind(column, &values);
            debug!("cleaning '{}' as {:?}", column, kind);

            let cleaned: Vec<Value> = match kind {
                ColumnKind::Price => {
                    let parsed: Vec<Value> = values.iter().map(|v| parse_price(v)).collect();
                    let all_integral = parsed.iter().all(|v| match v {
                        Value::Float(f) => integral(*f).is_some(),
                        _ => true,
                    });
                    parsed
                        .into_iter()
                        .map(|v| match v {
                            Value::Missing => Value::Int(0),
                            Value::Float(f) if all_integral => {
                                integral(f).map_or(Value::Float(f), Value::Int)
                            }
                            Value::Int(i) if !all_integral => Value::Float(i as f64),
                            other => other,
                        })
                        .collect()
                }
                ColumnKind::Integer | ColumnKind::Numeric => values
                    .iter()
                    .map(|v| match v {
                        Value::Missing => Value::Int(0),
                        Value::Float(f) => integral(*f).map_or(Value::Float(*f), Value::Int),
                        // decoded attributes arrive as text ("2003")
                        Value::Text(s) => match Value::infer(s) {
                            Value::Int(i) => Value::Int(i),
                            Value::Float(f) => integral(f).map_or(Value::Float(f), Value::Int),
                            _ => Value::Text(s.clone()),
                        },
                        other => (*other).clone(),
                    })
                    .collect(),
                ColumnKind::Categorical | ColumnKind::Text => values
                    .iter()
                    .map(|v| match v {
                        Value::Missing => Value::Text(self.sentinel.clone()),
                        other => (*other).clone(),
                    })
                    .collect(),
            };

            let pairs = values.iter().zip(cleaned);
            for (row, (before, after)) in out.rows_mut().iter_mut().zip(pairs) {
                if before.is_missing() {
                    stats.filled += 1;
                } else if **before != after {
                    stats.coerced += 1;
                }
                row[idx] = after;
            }
        }

        info!(
            "cleaned {} rows: {} missing cells filled, {} values coerced",
            out.len(),
            stats.filled,
            stats.coerced
        );
        (out, stats)
    }
}

/// Clean with the default policy.
pub fn clean(table: &Table) -> (Table, CleanStats) {
    CleanPolicy::default().clean(table)
}
