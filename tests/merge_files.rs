use std::fs;

use vin_harvest::collect::SourceProfile;
use vin_harvest::error::Error;
use vin_harvest::merge::{merge, read_inputs, SchemaMapping};
use vin_harvest::table::{Table, Value};

#[test]
fn merges_files_named_after_sources() {
    let dir = tempfile::tempdir().unwrap();
    let cars = dir.path().join("cars_com.csv");
    let gurus = dir.path().join("cargurus_com.csv");
    let misc = dir.path().join("dealer_dump.csv");
    fs::write(&cars, "ID,VIN,Prix,Kilometrage\nCARS_0001,1hgcm82633a004352,9900,88000\n").unwrap();
    fs::write(
        &gurus,
        "ID,vin,price,mileage\nCG_0001,1HGCM82633A004352,1,1\nCG_0002,1M8GDM9AXKP042788,n/a,1200\n",
    )
    .unwrap();
    fs::write(&misc, "VIN,Couleur\nSHORT,rouge\n1FTFW1ET5DFC10312,bleu\n").unwrap();

    let inputs = read_inputs(&[cars, gurus, misc], &SourceProfile::builtin()).unwrap();
    let labels: Vec<&str> = inputs.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, ["Cars.com", "CarGurus", "Autre"]);

    let (merged, stats) = merge(&inputs, &SchemaMapping::default()).unwrap();
    assert_eq!(merged.columns(), ["ID", "VIN", "Prix", "Kilometrage", "Source", "Couleur"]);
    assert_eq!(merged.len(), 3);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.rejected_vins, 1);
    assert_eq!(merged.get(0, "VIN"), Some(&Value::Text("1HGCM82633A004352".into())));
    assert!(merged.get(1, "Prix").unwrap().is_missing());
    assert_eq!(merged.get(2, "Couleur"), Some(&Value::Text("bleu".into())));

    let out = dir.path().join("fusion.csv");
    merged.write_csv(&out).unwrap();
    assert_eq!(Table::read_csv(&out).unwrap(), merged);
}

#[test]
fn one_missing_file_aborts_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("cars_com.csv");
    fs::write(&present, "VIN\n1HGCM82633A004352\n").unwrap();
    let absent = dir.path().join("autotempest_com.csv");

    let err = read_inputs(&[present, absent.clone()], &SourceProfile::builtin()).unwrap_err();
    assert!(matches!(err, Error::MissingInput(p) if p == absent));
}
