//! Used-vehicle listing harvester: collects VINs with price and mileage from
//! listing sites, decodes them against NHTSA vPIC, and writes one cleaned
//! table per vehicle.

pub mod clean;
pub mod collect;
pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod join;
pub mod merge;
pub mod net;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod table;
pub mod vin;

pub use error::{Error, Result};
