use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::DecodeSettings;
use crate::error::Result;
use crate::net::{build_client, check_status};
use crate::vin::Vin;

/// One result object as returned by the decoder.
pub type ApiRecord = Map<String, Value>;

/// The external VIN decoding service.
pub trait DecodeService {
    /// Decode up to 50 VINs in one call.
    fn decode_batch(&mut self, vins: &[Vin], model_year: Option<u16>) -> Result<Vec<ApiRecord>>;

    fn decode_single(&mut self, vin: &Vin, model_year: Option<u16>) -> Result<Option<ApiRecord>>;

    /// Manufacturer details for a World Manufacturer Identifier.
    fn lookup_wmi(&mut self, wmi: &str) -> Result<Option<ApiRecord>>;
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Results", default)]
    results: Vec<ApiRecord>,
}

/// vPIC client (`https://vpic.nhtsa.dot.gov/api/vehicles`).
pub struct NhtsaClient {
    client: Client,
    base_url: String,
}

impl NhtsaClient {
    pub fn new(settings: &DecodeSettings) -> Result<Self> {
        Ok(NhtsaClient {
            client: build_client(Duration::from_secs(settings.timeout_secs))?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_results(&self, path: &str, model_year: Option<u16>) -> Result<Vec<ApiRecord>> {
        let url = format!("{}/{}", self.base_url, path);
        let mut query = vec![("format", "json".to_string())];
        if let Some(year) = model_year {
            query.push(("modelyear", year.to_string()));
        }
        debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .query(&query)
            .send()?;
        let envelope: Envelope = check_status(resp)?.json()?;
        Ok(envelope.results)
    }
}

impl DecodeService for NhtsaClient {
    fn decode_batch(&mut self, vins: &[Vin], model_year: Option<u16>) -> Result<Vec<ApiRecord>> {
        let url = format!("{}/DecodeVINValuesBatch/", self.base_url);
        let data = vins.iter().map(Vin::as_str).collect::<Vec<_>>().join(";");
        let mut form = vec![("format", "json".to_string()), ("data", data)];
        if let Some(year) = model_year {
            form.push(("modelyear", year.to_string()));
        }
        debug!("POST {} ({} VINs)", url, vins.len());
        let resp = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()?;
        let envelope: Envelope = check_status(resp)?.json()?;
        Ok(envelope.results)
    }

    fn decode_single(&mut self, vin: &Vin, model_year: Option<u16>) -> Result<Option<ApiRecord>> {
        let results = self.get_results(&format!("DecodeVinValues/{}", vin), model_year)?;
        Ok(results.into_iter().next())
    }

    fn lookup_wmi(&mut self, wmi: &str) -> Result<Option<ApiRecord>> {
        let results = self.get_results(&format!("DecodeWMI/{}", wmi), None)?;
        Ok(results.into_iter().next())
    }
}
