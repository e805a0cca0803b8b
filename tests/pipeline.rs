use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use vin_harvest::collect::{Collector, Fetcher, FixedPacer, SourceProfile};
use vin_harvest::config::{CollectSettings, DecodeSettings, RetrySettings};
use vin_harvest::db::{self, SearchFilter};
use vin_harvest::decode::client::{ApiRecord, DecodeService};
use vin_harvest::decode::DecodePipeline;
use vin_harvest::error::{Error, Result};
use vin_harvest::merge::SchemaMapping;
use vin_harvest::parser::extract::Bounds;
use vin_harvest::parser::listing::Strategy;
use vin_harvest::pipeline::{Outputs, Pipeline};
use vin_harvest::table::{Table, Value};
use vin_harvest::vin::Vin;

struct Site(HashMap<String, String>);

impl Fetcher for Site {
    fn fetch(&mut self, url: &str) -> Result<String> {
        self.0.get(url).cloned().ok_or_else(|| Error::Status {
            status: 404,
            url: url.to_string(),
        })
    }
}

struct Decoder;

impl DecodeService for Decoder {
    fn decode_batch(&mut self, vins: &[Vin], _year: Option<u16>) -> Result<Vec<ApiRecord>> {
        Ok(vins
            .iter()
            .filter(|v| v.as_str() != "1FTFW1ET5DFC10312")
            .filter_map(|v| {
                let record = json!({
                    "VIN": v.as_str(),
                    "Make": "HONDA",
                    "Model": "Accord",
                    "ModelYear": "2003",
                });
                match record {
                    serde_json::Value::Object(m) => Some(m),
                    _ => None,
                }
            })
            .collect())
    }

    fn decode_single(&mut self, _vin: &Vin, _year: Option<u16>) -> Result<Option<ApiRecord>> {
        Ok(None)
    }

    fn lookup_wmi(&mut self, _wmi: &str) -> Result<Option<ApiRecord>> {
        Ok(None)
    }
}

fn profile(name: &str, label: &str) -> SourceProfile {
    SourceProfile {
        name: name.into(),
        label: label.into(),
        id_prefix: name.to_uppercase(),
        search_urls: vec![format!("https://{}.test/r?page={{page}}", name)],
        price_bounds: Bounds::open(),
        mileage_bounds: Bounds::open(),
        strategy: Strategy::VinAttribute {
            attribute: "data-vin".into(),
            containers: vec!["li".into()],
            context_chars: 40,
            scan_text: false,
            min_digits: 0,
        },
    }
}

fn card(vin: &str, price: &str) -> String {
    format!(r#"<li><span data-vin="{vin}"></span>{price}</li>"#)
}

fn site() -> Site {
    let mut pages = HashMap::new();
    pages.insert(
        "https://alpha.test/r?page=1".to_string(),
        format!(
            "<ul>{}{}</ul>",
            card("1HGCM82633A004352", "$9,900"),
            card("1M8GDM9AXKP042788", "$25,000")
        ),
    );
    pages.insert(
        "https://beta.test/r?page=1".to_string(),
        format!(
            "<ul>{}{}</ul>",
            card("1HGCM82633A004352", "$1"),
            card("1FTFW1ET5DFC10312", "$5,000")
        ),
    );
    Site(pages)
}

fn pipeline(dir: &std::path::Path) -> Pipeline<Site, FixedPacer, Decoder, FixedPacer> {
    let retry = RetrySettings {
        max_retries: 0,
        base_backoff_ms: 0,
        breaker_threshold: 5,
    };
    let limits = CollectSettings {
        max_pages: 5,
        max_vins: 100,
        min_delay_ms: 0,
        max_delay_ms: 0,
    };
    let collector = Collector::new(site(), FixedPacer(Duration::ZERO), limits, retry.clone());
    let decoder = DecodePipeline::with_pacers(
        Decoder,
        FixedPacer(Duration::ZERO),
        FixedPacer(Duration::ZERO),
        &DecodeSettings::default(),
        &retry,
    );
    Pipeline::new(
        collector,
        decoder,
        SchemaMapping::default(),
        Outputs::new(dir, "20260101_000000"),
    )
}

#[test]
fn end_to_end_run_writes_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let sources = [profile("alpha", "Alpha"), profile("beta", "Beta")];
    let (cleaned, report) = pipeline(dir.path()).run(&sources).unwrap();

    for name in [
        "alpha.csv",
        "beta.csv",
        "fusion.csv",
        "nhtsa_vehicle_data_20260101_000000.csv",
        "vehicules_complets_20260101_000000.csv",
        "vehicules_complets_nettoye_20260101_000000.csv",
    ] {
        assert!(dir.path().join(name).exists(), "{} missing", name);
    }
    assert_eq!(report.files.len(), 6);

    let alpha = Table::read_csv(&dir.path().join("alpha.csv")).unwrap();
    assert_eq!(alpha.columns(), ["ID", "VIN", "Prix", "Kilometrage"]);
    assert_eq!(alpha.get(0, "ID"), Some(&Value::Text("ALPHA_0001".into())));

    // the duplicate VIN keeps Alpha's row
    assert_eq!(report.merge.rows_out, 3);
    assert_eq!(report.merge.duplicates, 1);
    assert_eq!(cleaned.len(), 3);
    assert_eq!(cleaned.get(0, "Prix"), Some(&Value::Int(9900)));
    assert_eq!(cleaned.get(0, "Source"), Some(&Value::Text("Alpha".into())));
    assert_eq!(cleaned.get(0, "Marque"), Some(&Value::Text("HONDA".into())));
    assert_eq!(cleaned.get(0, "Kilometrage"), Some(&Value::Int(0)));

    // the Ford was never decoded
    assert_eq!(cleaned.get(2, "VIN"), Some(&Value::Text("1FTFW1ET5DFC10312".into())));
    assert_eq!(cleaned.get(2, "Marque"), Some(&Value::Text("Inconnu".into())));
    assert_eq!(cleaned.get(2, "Année"), Some(&Value::Int(0)));
    assert_eq!(report.decode.decoded, 2);
    assert_eq!(report.join.unmatched, 1);
    let marque = report.join.fill.iter().find(|f| f.column == "Marque").unwrap();
    assert_eq!((marque.filled, marque.total), (2, 3));
    assert!(cleaned.rows().iter().flatten().all(|v| !v.is_missing()));

    let cleaned_path = dir.path().join("vehicules_complets_nettoye_20260101_000000.csv");
    let on_disk = Table::read_csv(&cleaned_path).unwrap();
    assert_eq!(on_disk.columns(), cleaned.columns());
    assert_eq!(on_disk.len(), 3);
}

#[test]
fn run_can_be_stored_and_searched() {
    let dir = tempfile::tempdir().unwrap();
    let (cleaned, report) = pipeline(dir.path()).run(&[profile("alpha", "Alpha")]).unwrap();

    let conn = db::connect(&dir.path().join("db/vehicles.sqlite")).unwrap();
    let saved = vin_harvest::pipeline::store(&conn, &cleaned, &report).unwrap();
    assert_eq!(saved, 2);

    let hondas = db::search(
        &conn,
        &SearchFilter {
            make: Some("Honda".into()),
            year: None,
            limit: 10,
        },
    )
    .unwrap();
    assert_eq!(hondas.len(), 2);
    assert_eq!(hondas[0].price, Some(9900.0));

    let stages = db::fetch_run(&conn, &report.run_id).unwrap();
    assert_eq!(stages.first().map(|s| s.stage.as_str()), Some("collect:alpha"));
    assert_eq!(stages.last().map(|s| s.stage.as_str()), Some("clean"));
}
