use std::path::Path;

use rusqlite::Connection;
use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};
use crate::merge::{MILEAGE, PRICE, SOURCE, VIN};
use crate::table::{Table, Value};
use crate::vin::normalize;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS vehicles (
            vin          TEXT PRIMARY KEY,
            source       TEXT,
            price        REAL,
            mileage      INTEGER,
            make         TEXT,
            model        TEXT,
            year         INTEGER,
            vehicle_type TEXT,
            fuel         TEXT,
            transmission TEXT,
            attributes   TEXT,
            updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_vehicles_make ON vehicles(make);
        CREATE INDEX IF NOT EXISTS idx_vehicles_year ON vehicles(year);

        -- One row per pipeline stage per run
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id         INTEGER PRIMARY KEY,
            run_id     TEXT NOT NULL,
            stage      TEXT NOT NULL,
            rows_in    INTEGER NOT NULL,
            rows_out   INTEGER NOT NULL,
            skipped    INTEGER NOT NULL DEFAULT 0,
            failed     INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_runs_run_id ON pipeline_runs(run_id);
        ",
    )?;
    Ok(())
}

// ── Vehicles ──

const MAKE: &str = "Marque";
const MODEL: &str = "Modèle";
const YEAR: &str = "Année";
const TYPE: &str = "Type";
const FUEL: &str = "Carburant";
const TRANSMISSION: &str = "Transmission";

/// Columns with their own field in `vehicles`; everything else goes into
/// `attributes`.
const PROMOTED: [&str; 10] = [
    VIN,
    SOURCE,
    PRICE,
    MILEAGE,
    MAKE,
    MODEL,
    YEAR,
    TYPE,
    FUEL,
    TRANSMISSION,
];

fn to_json(v: &Value) -> Json {
    match v {
        Value::Missing => Json::Null,
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Json::from(*f),
        Value::Text(s) => Json::from(s.as_str()),
    }
}

fn text(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::render)
}

fn number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Upsert every row with a valid VIN. Returns the number of rows written.
pub fn save_vehicles(conn: &Connection, table: &Table) -> Result<usize> {
    let vin_idx = table.require_column(VIN, "vehicle table")?;
    let idx = |name: &str| table.column_index(name);
    let (source, price, mileage) = (idx(SOURCE), idx(PRICE), idx(MILEAGE));
    let (make, model, year) = (idx(MAKE), idx(MODEL), idx(YEAR));
    let (vtype, fuel, transmission) = (idx(TYPE), idx(FUEL), idx(TRANSMISSION));
    let extra: Vec<(usize, &String)> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !PROMOTED.contains(&c.as_str()))
        .collect();

    let tx = conn.unchecked_transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO vehicles
             (vin, source, price, mileage, make, model, year,
              vehicle_type, fuel, transmission, attributes)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(vin) DO UPDATE SET
               source=excluded.source, price=excluded.price, mileage=excluded.mileage,
               make=excluded.make, model=excluded.model, year=excluded.year,
               vehicle_type=excluded.vehicle_type, fuel=excluded.fuel,
               transmission=excluded.transmission, attributes=excluded.attributes,
               updated_at=datetime('now')",
        )?;
        for row in table.rows() {
            let Some(vin) = row[vin_idx].render().and_then(|raw| normalize(&raw).ok()) else {
                continue;
            };
            let cell = |i: Option<usize>| i.map(|i| &row[i]);
            let attributes: Map<String, Json> = extra
                .iter()
                .map(|(i, name)| (name.to_string(), to_json(&row[*i])))
                .collect();
            stmt.execute(rusqlite::params![
                vin.as_str(),
                text(cell(source)),
                number(cell(price)),
                cell(mileage).and_then(Value::as_i64),
                text(cell(make)),
                text(cell(model)),
                cell(year).and_then(Value::as_i64),
                text(cell(vtype)),
                text(cell(fuel)),
                text(cell(transmission)),
                Json::Object(attributes).to_string(),
            ])?;
            written += 1;
        }
    }
    tx.commit()?;
    Ok(written)
}

pub fn count_vehicles(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM vehicles", [], |r| r.get(0))?;
    Ok(n as usize)
}

// ── Queries ──

/// Columns the dashboard filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Facet {
    Make,
    Model,
    Year,
    Fuel,
    Source,
}

impl Facet {
    fn column(self) -> &'static str {
        match self {
            Facet::Make => "make",
            Facet::Model => "model",
            Facet::Year => "year",
            Facet::Fuel => "fuel",
            Facet::Source => "source",
        }
    }
}

pub fn distinct_values(conn: &Connection, facet: Facet) -> Result<Vec<String>> {
    let col = facet.column();
    let sql = format!(
        "SELECT DISTINCT CAST({col} AS TEXT) FROM vehicles WHERE {col} IS NOT NULL ORDER BY {col}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(values)
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub make: Option<String>,
    pub year: Option<i64>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRow {
    pub vin: String,
    pub source: String,
    pub price: Option<f64>,
    pub mileage: Option<i64>,
    pub make: String,
    pub model: String,
    pub year: Option<i64>,
}

pub fn search(conn: &Connection, filter: &SearchFilter) -> Result<Vec<VehicleRow>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(m) = &filter.make {
        conditions.push(format!("make = ?{} COLLATE NOCASE", params.len() + 1));
        params.push(Box::new(m.clone()));
    }
    if let Some(y) = filter.year {
        conditions.push(format!("year = ?{}", params.len() + 1));
        params.push(Box::new(y));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT vin, COALESCE(source,''), price, mileage,
                COALESCE(make,''), COALESCE(model,''), year
         FROM vehicles{}
         ORDER BY price IS NULL, price, vin
         LIMIT {}",
        where_clause, filter.limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(VehicleRow {
                vin: row.get(0)?,
                source: row.get(1)?,
                price: row.get(2)?,
                mileage: row.get(3)?,
                make: row.get(4)?,
                model: row.get(5)?,
                year: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ── Run metrics ──

#[derive(Debug, Clone, PartialEq)]
pub struct StageMetric {
    pub stage: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn record_run(conn: &Connection, run_id: &str, metrics: &[StageMetric]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO pipeline_runs (run_id, stage, rows_in, rows_out, skipped, failed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for m in metrics {
            stmt.execute(rusqlite::params![
                run_id,
                m.stage,
                m.rows_in as i64,
                m.rows_out as i64,
                m.skipped as i64,
                m.failed as i64,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn fetch_run(conn: &Connection, run_id: &str) -> Result<Vec<StageMetric>> {
    let mut stmt = conn.prepare(
        "SELECT stage, rows_in, rows_out, skipped, failed FROM pipeline_runs
         WHERE run_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([run_id], |row| {
            Ok(StageMetric {
                stage: row.get(0)?,
                rows_in: row.get::<_, i64>(1)? as usize,
                rows_out: row.get::<_, i64>(2)? as usize,
                skipped: row.get::<_, i64>(3)? as usize,
                failed: row.get::<_, i64>(4)? as usize,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if rows.is_empty() {
        return Err(Error::Database(rusqlite::Error::QueryReturnedNoRows));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn cleaned() -> Table {
        Table::from_reader(
            "ID,VIN,Prix,Kilometrage,Source,Marque,Modèle,Année,Carrosserie\n\
             AT_0001,1HGCM82633A004352,9900,88000,AutoTempest,HONDA,Accord,2003,Sedan\n\
             CG_0001,1M8GDM9AXKP042788,25000,1200,CarGurus,Inconnu,Inconnu,0,Inconnu\n\
             X,bad,1,1,Autre,FORD,F-150,2015,Pickup\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn save_and_search() {
        let conn = memory();
        assert_eq!(save_vehicles(&conn, &cleaned()).unwrap(), 2);
        assert_eq!(count_vehicles(&conn).unwrap(), 2);

        let all = search(&conn, &SearchFilter { limit: 10, ..Default::default() }).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].vin, "1HGCM82633A004352");
        assert_eq!(all[0].price, Some(9900.0));

        let honda = search(
            &conn,
            &SearchFilter {
                make: Some("honda".into()),
                year: Some(2003),
                limit: 10,
            },
        )
        .unwrap();
        assert_eq!(honda.len(), 1);
        assert_eq!(honda[0].model, "Accord");
    }

    #[test]
    fn upsert_replaces_existing_vin() {
        let conn = memory();
        save_vehicles(&conn, &cleaned()).unwrap();
        let newer = Table::from_reader("VIN,Prix\n1HGCM82633A004352,8500\n".as_bytes()).unwrap();
        save_vehicles(&conn, &newer).unwrap();
        assert_eq!(count_vehicles(&conn).unwrap(), 2);
        let price: f64 = conn
            .query_row(
                "SELECT price FROM vehicles WHERE vin = '1HGCM82633A004352'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(price, 8500.0);
    }

    #[test]
    fn extra_columns_land_in_attributes() {
        let conn = memory();
        save_vehicles(&conn, &cleaned()).unwrap();
        let attrs: String = conn
            .query_row(
                "SELECT attributes FROM vehicles WHERE vin = '1HGCM82633A004352'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let parsed: Json = serde_json::from_str(&attrs).unwrap();
        assert_eq!(parsed["Carrosserie"], "Sedan");
        assert_eq!(parsed["ID"], "AT_0001");
    }

    #[test]
    fn facets() {
        let conn = memory();
        save_vehicles(&conn, &cleaned()).unwrap();
        assert_eq!(distinct_values(&conn, Facet::Make).unwrap(), vec!["HONDA", "Inconnu"]);
        assert_eq!(distinct_values(&conn, Facet::Year).unwrap(), vec!["0", "2003"]);
    }

    #[test]
    fn run_metrics_round_trip() {
        let conn = memory();
        let m = vec![StageMetric {
            stage: "merge".into(),
            rows_in: 10,
            rows_out: 8,
            skipped: 2,
            failed: 0,
        }];
        record_run(&conn, "run-1", &m).unwrap();
        assert_eq!(fetch_run(&conn, "run-1").unwrap(), m);
        assert!(fetch_run(&conn, "run-2").is_err());
    }

    #[test]
    fn table_without_vin_is_rejected() {
        let conn = memory();
        let t = Table::from_reader("ID\n1\n".as_bytes()).unwrap();
        assert!(matches!(save_vehicles(&conn, &t), Err(Error::MissingColumn { .. })));
    }
}
