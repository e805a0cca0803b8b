use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::vin::{normalize, Vin};

/// Placeholders the decoder returns for "no data".
const SENTINELS: [&str; 3] = ["", "Not Applicable", "None"];

pub const VIN_COLUMN: &str = "VIN";
pub const WMI_COLUMN: &str = "WMI";

/// Decoded attributes kept in the dataset, in output column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DecodedField {
    Make,
    Model,
    ModelYear,
    VehicleType,
    BodyClass,
    EngineModel,
    DisplacementL,
    FuelTypePrimary,
    TransmissionStyle,
    DriveType,
    Trim,
    PlantCountry,
    PlantCity,
    PlantState,
    Series,
    Doors,
    Windows,
    Seats,
}

impl DecodedField {
    pub const ALL: [DecodedField; 18] = [
        DecodedField::Make,
        DecodedField::Model,
        DecodedField::ModelYear,
        DecodedField::VehicleType,
        DecodedField::BodyClass,
        DecodedField::EngineModel,
        DecodedField::DisplacementL,
        DecodedField::FuelTypePrimary,
        DecodedField::TransmissionStyle,
        DecodedField::DriveType,
        DecodedField::Trim,
        DecodedField::PlantCountry,
        DecodedField::PlantCity,
        DecodedField::PlantState,
        DecodedField::Series,
        DecodedField::Doors,
        DecodedField::Windows,
        DecodedField::Seats,
    ];

    /// Key in the decoder's response.
    pub fn api_key(self) -> &'static str {
        match self {
            DecodedField::Make => "Make",
            DecodedField::Model => "Model",
            DecodedField::ModelYear => "ModelYear",
            DecodedField::VehicleType => "VehicleType",
            DecodedField::BodyClass => "BodyClass",
            DecodedField::EngineModel => "EngineModel",
            DecodedField::DisplacementL => "DisplacementL",
            DecodedField::FuelTypePrimary => "FuelTypePrimary",
            DecodedField::TransmissionStyle => "TransmissionStyle",
            DecodedField::DriveType => "DriveType",
            DecodedField::Trim => "Trim",
            DecodedField::PlantCountry => "PlantCountry",
            DecodedField::PlantCity => "PlantCity",
            DecodedField::PlantState => "PlantState",
            DecodedField::Series => "Series",
            DecodedField::Doors => "Doors",
            DecodedField::Windows => "Windows",
            DecodedField::Seats => "Seats",
        }
    }

    /// Column name in the dataset.
    pub fn label(self) -> &'static str {
        match self {
            DecodedField::Make => "Marque",
            DecodedField::Model => "Modèle",
            DecodedField::ModelYear => "Année",
            DecodedField::VehicleType => "Type",
            DecodedField::BodyClass => "Carrosserie",
            DecodedField::EngineModel => "Moteur",
            DecodedField::DisplacementL => "Cylindrée",
            DecodedField::FuelTypePrimary => "Carburant",
            DecodedField::TransmissionStyle => "Transmission",
            DecodedField::DriveType => "Traction",
            DecodedField::Trim => "Finition",
            DecodedField::PlantCountry => "Pays_assemblage",
            DecodedField::PlantCity => "Ville_assemblage",
            DecodedField::PlantState => "Etat_assemblage",
            DecodedField::Series => "Série",
            DecodedField::Doors => "Portes",
            DecodedField::Windows => "Vitres",
            DecodedField::Seats => "Sièges",
        }
    }
}

/// Trimmed string form of a response value, or `None` for placeholders.
fn meaningful(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!SENTINELS.contains(&s.as_str())).then_some(s)
}

/// Attributes decoded for one VIN. Placeholder values are never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub vin: Vin,
    pub wmi: String,
    pub fields: BTreeMap<DecodedField, String>,
}

impl DecodedRecord {
    /// Build a record from one response object. `None` when it carries no
    /// usable VIN.
    pub fn from_api(result: &Map<String, Value>) -> Option<DecodedRecord> {
        let vin = result
            .get(VIN_COLUMN)
            .and_then(Value::as_str)
            .and_then(|v| normalize(v).ok())?;
        let fields: BTreeMap<DecodedField, String> = DecodedField::ALL
            .iter()
            .filter_map(|f| result.get(f.api_key()).and_then(meaningful).map(|v| (*f, v)))
            .collect();
        let wmi = result
            .get(WMI_COLUMN)
            .and_then(meaningful)
            .unwrap_or_else(|| vin.wmi().to_string());
        Some(DecodedRecord { vin, wmi, fields })
    }

    pub fn get(&self, field: DecodedField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// Value for a dataset column name (`Marque`, `WMI`, ...).
    pub fn column(&self, label: &str) -> Option<&str> {
        if label == WMI_COLUMN {
            return Some(&self.wmi);
        }
        DecodedField::ALL
            .iter()
            .find(|f| f.label() == label)
            .and_then(|f| self.get(*f))
    }
}
