pub mod client;
pub mod fields;

pub use client::{ApiRecord, DecodeService, NhtsaClient};
pub use fields::{DecodedField, DecodedRecord, VIN_COLUMN, WMI_COLUMN};

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::collect::{FixedPacer, Pacer};
use crate::config::{DecodeSettings, RetrySettings};
use crate::retry::{Backoff, CircuitBreaker};
use crate::table::{Table, Value};
use crate::vin::{normalize, Vin};

/// Most VINs the decoder accepts per call.
pub const BATCH_SIZE: usize = 50;

/// Raw input VINs after normalization and first-seen deduplication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedVins {
    pub vins: Vec<Vin>,
    pub rejected: usize,
    pub duplicates: usize,
}

pub fn prepare_vins<'a>(raw: impl IntoIterator<Item = &'a str>) -> PreparedVins {
    let mut rejected = 0;
    let normalized: Vec<Vin> = raw
        .into_iter()
        .filter_map(|s| match normalize(s) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("rejected VIN {:?}: {}", s, e);
                rejected += 1;
                None
            }
        })
        .collect();
    let total = normalized.len();
    let vins: Vec<Vin> = normalized.into_iter().unique().collect();
    PreparedVins {
        duplicates: total - vins.len(),
        vins,
        rejected,
    }
}

/// Decoded records keyed by VIN, in the order they were decoded.
#[derive(Debug, Clone, Default)]
pub struct DecodedSet {
    records: Vec<DecodedRecord>,
    index: HashMap<Vin, usize>,
}

impl DecodedSet {
    /// Add a record; an already-present VIN keeps its first record.
    pub fn insert(&mut self, record: DecodedRecord) -> bool {
        if self.index.contains_key(&record.vin) {
            return false;
        }
        self.index.insert(record.vin.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn get(&self, vin: &Vin) -> Option<&DecodedRecord> {
        self.index.get(vin).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[DecodedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decoded column names present in at least one record, vocabulary order,
    /// then `WMI`.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut cols: Vec<&'static str> = DecodedField::ALL
            .iter()
            .filter(|f| self.records.iter().any(|r| r.fields.contains_key(*f)))
            .map(|f| f.label())
            .collect();
        if !self.records.is_empty() {
            cols.push(WMI_COLUMN);
        }
        cols
    }

    pub fn to_table(&self) -> Table {
        let columns = self.columns();
        let mut table = Table::new(std::iter::once(VIN_COLUMN).chain(columns.iter().copied()));
        for rec in &self.records {
            let mut row = vec![Value::from(rec.vin.as_str())];
            row.extend(columns.iter().map(|c| rec.column(c).map_or(Value::Missing, Value::from)));
            table.push_row(row);
        }
        table
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeReport {
    pub attempted: usize,
    pub decoded: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub single_lookups: usize,
    pub check_digit_mismatches: usize,
}

impl DecodeReport {
    pub fn success_rate(&self) -> f64 {
        self.decoded as f64 / self.attempted.max(1) as f64 * 100.0
    }

    pub fn print(&self) {
        println!(
            "Decoded {}/{} VINs ({:.1}%), {} rejected at input, {} duplicates, \
             {}/{} batches failed, {} check-digit mismatches.",
            self.decoded,
            self.attempted,
            self.success_rate(),
            self.rejected,
            self.duplicates,
            self.failed_batches,
            self.batches,
            self.check_digit_mismatches,
        );
    }
}

/// Batches VINs through a `DecodeService`, pausing between calls. A failed
/// batch costs its VINs, never the run.
pub struct DecodePipeline<S, P> {
    service: S,
    batch_pacer: P,
    single_pacer: P,
    model_year: Option<u16>,
    single_fallback: bool,
    retry: RetrySettings,
    progress: bool,
}

impl<S: DecodeService> DecodePipeline<S, FixedPacer> {
    /// Batches wait twice the per-item rate limit.
    pub fn new(service: S, settings: &DecodeSettings, retry: &RetrySettings) -> Self {
        let single = Duration::from_millis(settings.rate_limit_ms);
        DecodePipeline::with_pacers(
            service,
            FixedPacer(single * 2),
            FixedPacer(single),
            settings,
            retry,
        )
    }
}

impl<S: DecodeService, P: Pacer> DecodePipeline<S, P> {
    pub fn with_pacers(
        service: S,
        batch_pacer: P,
        single_pacer: P,
        settings: &DecodeSettings,
        retry: &RetrySettings,
    ) -> Self {
        DecodePipeline {
            service,
            batch_pacer,
            single_pacer,
            model_year: settings.model_year,
            single_fallback: settings.single_fallback,
            retry: retry.clone(),
            progress: false,
        }
    }

    pub fn with_progress(mut self, on: bool) -> Self {
        self.progress = on;
        self
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    /// Normalize raw strings, then decode.
    pub fn decode_raw<'a>(
        &mut self,
        raw: impl IntoIterator<Item = &'a str>,
    ) -> (DecodedSet, DecodeReport) {
        let prepared = prepare_vins(raw);
        let (set, mut report) = self.decode(&prepared.vins);
        report.rejected = prepared.rejected;
        report.duplicates = prepared.duplicates;
        (set, report)
    }

    pub fn decode(&mut self, vins: &[Vin]) -> (DecodedSet, DecodeReport) {
        let mut set = DecodedSet::default();
        let mut report = DecodeReport {
            attempted: vins.len(),
            ..Default::default()
        };
        for vin in vins.iter().filter(|v| !v.check_digit_matches()) {
            warn!("{}: check digit does not match (kept)", vin);
            report.check_digit_mismatches += 1;
        }

        let backoff = Backoff::from_settings(&self.retry);
        let mut breaker = CircuitBreaker::from_settings(&self.retry);
        let n_batches = vins.len().div_ceil(BATCH_SIZE);
        let pb = if self.progress {
            let pb = ProgressBar::new(n_batches as u64);
            let template = "[{elapsed_precise}] {bar:40} {pos}/{len} batches";
            if let Ok(style) = ProgressStyle::default_bar().template(template) {
                pb.set_style(style.progress_chars("=> "));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        for (i, chunk) in vins.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                self.batch_pacer.pause();
            }
            report.batches += 1;
            pb.inc(1);
            if breaker.check().is_err() {
                warn!("batch {}/{} skipped, circuit open", i + 1, n_batches);
                report.failed_batches += 1;
                continue;
            }

            let service = &mut self.service;
            let year = self.model_year;
            match backoff.run("decode batch", || service.decode_batch(chunk, year)) {
                Ok(results) => {
                    breaker.record_success();
                    let added = absorb(&mut set, chunk, results);
                    info!(
                        "batch {}/{}: {} of {} VINs decoded",
                        i + 1,
                        n_batches,
                        added,
                        chunk.len()
                    );
                }
                Err(e) => {
                    warn!("batch {}/{} failed: {}", i + 1, n_batches, e);
                    breaker.record_failure();
                    report.failed_batches += 1;
                    if self.single_fallback {
                        self.decode_singly(chunk, &mut set, &mut report, &backoff);
                    }
                }
            }
        }
        pb.finish_and_clear();

        report.decoded = set.len();
        info!(
            "decoded {}/{} VINs ({:.1}%)",
            report.decoded,
            report.attempted,
            report.success_rate()
        );
        (set, report)
    }

    fn decode_singly(
        &mut self,
        chunk: &[Vin],
        set: &mut DecodedSet,
        report: &mut DecodeReport,
        backoff: &Backoff,
    ) {
        for vin in chunk {
            self.single_pacer.pause();
            report.single_lookups += 1;
            let service = &mut self.service;
            let year = self.model_year;
            match backoff.run(vin.as_str(), || service.decode_single(vin, year)) {
                Ok(Some(result)) => {
                    absorb(set, std::slice::from_ref(vin), vec![result]);
                }
                Ok(None) => debug!("{}: no result", vin),
                Err(e) => warn!("{}: single decode failed: {}", vin, e),
            }
        }
    }
}

/// Fold one response into the set. Only VINs that were asked for and came
/// back with at least one attribute count.
fn absorb(set: &mut DecodedSet, asked: &[Vin], results: Vec<ApiRecord>) -> usize {
    let asked: HashSet<&Vin> = asked.iter().collect();
    let mut added = 0;
    for result in &results {
        let Some(rec) = DecodedRecord::from_api(result) else {
            debug!("result without a usable VIN skipped");
            continue;
        };
        if !asked.contains(&rec.vin) {
            debug!("{}: not in request, ignored", rec.vin);
            continue;
        }
        if rec.fields.is_empty() {
            debug!("{}: decoder returned no attributes", rec.vin);
            continue;
        }
        if set.insert(rec) {
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Decodes every VIN to a HONDA unless it is in `broken`, in which case
    /// the whole batch fails.
    #[derive(Default)]
    struct FakeDecoder {
        broken: Vec<String>,
        batch_calls: usize,
        single_calls: usize,
    }

    fn answer(vin: &Vin) -> ApiRecord {
        match json!({
            "VIN": vin.as_str(),
            "Make": "HONDA",
            "Model": "Accord",
            "ModelYear": "2003",
            "BodyClass": "Not Applicable",
        }) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    impl DecodeService for FakeDecoder {
        fn decode_batch(&mut self, vins: &[Vin], _year: Option<u16>) -> Result<Vec<ApiRecord>> {
            self.batch_calls += 1;
            if vins.iter().any(|v| self.broken.contains(&v.to_string())) {
                return Err(Error::Status {
                    status: 400,
                    url: "batch".into(),
                });
            }
            Ok(vins.iter().map(answer).collect())
        }

        fn decode_single(&mut self, vin: &Vin, _year: Option<u16>) -> Result<Option<ApiRecord>> {
            self.single_calls += 1;
            Ok(Some(answer(vin)))
        }

        fn lookup_wmi(&mut self, _wmi: &str) -> Result<Option<ApiRecord>> {
            Ok(None)
        }
    }

    struct CountPacer(Rc<Cell<usize>>);

    impl Pacer for CountPacer {
        fn pause(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn vins(n: usize) -> Vec<Vin> {
        (0..n).map(|i| normalize(&format!("1HGCM8263{:08}", i)).unwrap()).collect()
    }

    fn pipeline(
        service: FakeDecoder,
        single_fallback: bool,
    ) -> (DecodePipeline<FakeDecoder, CountPacer>, Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let batch = Rc::new(Cell::new(0));
        let single = Rc::new(Cell::new(0));
        let settings = DecodeSettings {
            single_fallback,
            ..Default::default()
        };
        let retry = RetrySettings {
            max_retries: 0,
            base_backoff_ms: 0,
            breaker_threshold: 0,
        };
        let p = DecodePipeline::with_pacers(
            service,
            CountPacer(Rc::clone(&batch)),
            CountPacer(Rc::clone(&single)),
            &settings,
            &retry,
        );
        (p, batch, single)
    }

    #[test]
    fn batches_of_fifty_with_pauses_between() {
        let (mut p, batch_pauses, _) = pipeline(FakeDecoder::default(), false);
        let input = vins(120);
        let (set, report) = p.decode(&input);
        assert_eq!(p.service_mut().batch_calls, 3);
        assert_eq!(batch_pauses.get(), 2);
        assert_eq!(report.batches, 3);
        assert_eq!(report.decoded, 120);
        assert_eq!(set.len(), 120);
        assert!((report.success_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failed_batch_yields_nothing_and_run_continues() {
        let input = vins(60);
        let decoder = FakeDecoder {
            broken: vec![input[3].to_string()],
            ..Default::default()
        };
        let (mut p, _, _) = pipeline(decoder, false);
        let (set, report) = p.decode(&input);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.decoded, 10);
        assert!(set.get(&input[3]).is_none());
        assert!(set.get(&input[55]).is_some());
    }

    #[test]
    fn single_fallback_recovers_failed_batch() {
        let input = vins(3);
        let decoder = FakeDecoder {
            broken: vec![input[0].to_string()],
            ..Default::default()
        };
        let (mut p, _, single_pauses) = pipeline(decoder, true);
        let (set, report) = p.decode(&input);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.single_lookups, 3);
        assert_eq!(single_pauses.get(), 3);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn placeholders_omitted_and_deterministic() {
        let input = vins(1);
        let (mut a, _, _) = pipeline(FakeDecoder::default(), false);
        let (mut b, _, _) = pipeline(FakeDecoder::default(), false);
        let (sa, _) = a.decode(&input);
        let (sb, _) = b.decode(&input);
        let rec = sa.get(&input[0]).unwrap();
        assert_eq!(Some(rec), sb.get(&input[0]));
        assert!(rec.get(DecodedField::BodyClass).is_none());
        assert_eq!(sa.columns(), vec!["Marque", "Modèle", "Année", "WMI"]);
    }

    #[test]
    fn raw_input_is_cleaned_first() {
        let (mut p, _, _) = pipeline(FakeDecoder::default(), false);
        let raw = ["1hg c m82633a004352", "1HGCM82633A004352", "1HGCM82633A00435", ""];
        let (set, report) = p.decode_raw(raw);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.attempted, 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn decoded_table_layout() {
        let (mut p, _, _) = pipeline(FakeDecoder::default(), false);
        let (set, _) = p.decode(&vins(2));
        let t = set.to_table();
        assert_eq!(t.columns(), ["VIN", "Marque", "Modèle", "Année", "WMI"]);
        assert_eq!(t.get(0, "Année"), Some(&Value::Text("2003".into())));
        assert_eq!(t.get(1, "WMI"), Some(&Value::Text("1HG".into())));
    }

    #[test]
    fn empty_input() {
        let (mut p, pauses, _) = pipeline(FakeDecoder::default(), false);
        let (set, report) = p.decode(&[]);
        assert!(set.is_empty());
        assert_eq!(report.batches, 0);
        assert_eq!(pauses.get(), 0);
        assert!(set.columns().is_empty());
    }
}
