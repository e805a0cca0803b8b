use std::fmt;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Infer a cell type from raw CSV text: empty -> Missing, then integer,
    /// then decimal, else text.
    pub fn infer(raw: &str) -> Value {
        let s = raw.trim();
        if s.is_empty() {
            return Value::Missing;
        }
        if let Ok(i) = s.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() {
                return Value::Float(f);
            }
        }
        Value::Text(raw.to_string())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// String form used for keys and CSV output; `None` for missing cells.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Missing => None,
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Self {
        v.map_or(Value::Missing, Value::Int)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render().unwrap_or_default())
    }
}

/// Header plus rows. Every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str, source_name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| Error::MissingColumn {
            column: name.to_string(),
            source_name: source_name.to_string(),
        })
    }

    /// Append a row, padding with `Missing` or truncating to the header width.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Missing);
        self.rows.push(row);
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<Vec<Value>> {
        &mut self.rows
    }

    pub fn read_csv(path: &Path) -> Result<Table> {
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        Table::from_reader(file)
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Table> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let mut table = Table::new(headers.iter().map(|h| h.trim().trim_start_matches('\u{feff}')));
        for record in rdr.records() {
            let record = record?;
            table.push_row(record.iter().map(Value::infer).collect());
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        self.to_writer(file)
    }

    pub fn to_writer<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|v| v.render().unwrap_or_default()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_cells() {
        assert_eq!(Value::infer(""), Value::Missing);
        assert_eq!(Value::infer(" 42 "), Value::Int(42));
        assert_eq!(Value::infer("1.5"), Value::Float(1.5));
        assert_eq!(Value::infer("$12,500"), Value::Text("$12,500".into()));
    }

    #[test]
    fn read_pads_short_rows() {
        let csv = "ID,VIN,Prix,Kilometrage\nCG_0001,1HGCM82633A004352,12500\n";
        let t = Table::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(0, "Prix"), Some(&Value::Int(12500)));
        assert_eq!(t.get(0, "Kilometrage"), Some(&Value::Missing));
    }

    #[test]
    fn write_renders_missing_as_empty() {
        let mut t = Table::new(["VIN", "Prix"]);
        t.push_row(vec!["1HGCM82633A004352".into(), Value::Missing]);
        let mut out = Vec::new();
        t.to_writer(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "VIN,Prix\n1HGCM82633A004352,\n");
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = Table::read_csv(Path::new("/nonexistent/cars_com.csv")).unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
    }

    #[test]
    fn require_column_reports_source() {
        let t = Table::new(["ID", "Price"]);
        let err = t.require_column("VIN", "cars_com.csv").unwrap_err();
        assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "VIN"));
    }
}
