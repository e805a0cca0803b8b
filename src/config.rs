use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::collect::SourceProfile;
use crate::error::{Error, Result};
use crate::merge::SchemaMapping;

const DEFAULT_FILE: &str = "vin_harvest.toml";
const ENV_PREFIX: &str = "VINH";

pub const NHTSA_BASE_URL: &str = "https://vpic.nhtsa.dot.gov/api/vehicles";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectSettings {
    pub max_pages: usize,
    pub max_vins: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for CollectSettings {
    fn default() -> Self {
        CollectSettings {
            max_pages: 150,
            max_vins: 500,
            min_delay_ms: 3000,
            max_delay_ms: 4000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    /// Consecutive failures before the breaker opens. 0 disables it.
    pub breaker_threshold: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: 3,
            base_backoff_ms: 2000,
            breaker_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodeSettings {
    pub base_url: String,
    /// Pause between single lookups; batches wait twice this.
    pub rate_limit_ms: u64,
    pub model_year: Option<u16>,
    pub single_fallback: bool,
    pub timeout_secs: u64,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        DecodeSettings {
            base_url: NHTSA_BASE_URL.to_string(),
            rate_limit_ms: 200,
            model_year: None,
            single_fallback: false,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: String,
    pub database: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            dir: ".".to_string(),
            database: "data/vehicles.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub collect: CollectSettings,
    pub retry: RetrySettings,
    pub decode: DecodeSettings,
    pub sources: Vec<SourceProfile>,
    /// Header rename rules applied when merging sources.
    pub columns: SchemaMapping,
    pub output: OutputSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            collect: CollectSettings::default(),
            retry: RetrySettings::default(),
            decode: DecodeSettings::default(),
            sources: SourceProfile::builtin(),
            columns: SchemaMapping::default(),
            output: OutputSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, then `vin_harvest.toml` (or `path`, which must exist), then
    /// `VINH_*` environment variables (`__` separates nesting levels).
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(Error::MissingInput(p.to_path_buf()));
                }
                builder = builder.add_source(File::from(p));
            }
            None => {
                builder = builder.add_source(File::with_name(DEFAULT_FILE).required(false));
            }
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Look a source up by name, ignoring case.
    pub fn source(&self, name: &str) -> Result<&SourceProfile> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let s = Settings::default();
        assert_eq!(s.collect.max_pages, 150);
        assert_eq!(s.retry.max_retries, 3);
        assert_eq!(s.decode.rate_limit_ms, 200);
        assert!(!s.decode.single_fallback);
        assert_eq!(s.sources.len(), 3);
        assert!(s.source("CARGURUS").is_ok());
        assert!(matches!(s.source("ebay"), Err(Error::UnknownSource(_))));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "[collect]\nmax_vins = 20\n\n[decode]\nmodel_year = 2012").unwrap();
        let s = Settings::load(Some(f.path())).unwrap();
        assert_eq!(s.collect.max_vins, 20);
        assert_eq!(s.collect.max_pages, 150);
        assert_eq!(s.decode.model_year, Some(2012));
        assert_eq!(s.sources.len(), 3);
    }

    #[test]
    fn missing_explicit_file_is_fatal() {
        let err = Settings::load(Some(Path::new("/nonexistent/vin_harvest.toml"))).unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
    }
}
