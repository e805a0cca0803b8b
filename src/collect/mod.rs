pub mod source;

pub use source::SourceProfile;

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{CollectSettings, RetrySettings};
use crate::error::Result;
use crate::parser::listing::{detail_fields, listing_candidates, Candidate};
use crate::retry::{Backoff, CircuitBreaker};
use crate::table::{Table, Value};
use crate::vin::Vin;

/// Column header of every per-source output file.
pub const LISTING_COLUMNS: [&str; 4] = ["ID", "VIN", "Prix", "Kilometrage"];

/// Fetches one URL and returns its body.
pub trait Fetcher {
    fn fetch(&mut self, url: &str) -> Result<String>;
}

/// Blocks between two fetches to the same source.
pub trait Pacer {
    fn pause(&mut self);
}

/// Sleeps a uniformly random duration in `[min, max]` milliseconds.
pub struct RandomPacer {
    min_ms: u64,
    max_ms: u64,
}

impl RandomPacer {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        RandomPacer {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
        }
    }

    pub fn from_settings(settings: &CollectSettings) -> Self {
        RandomPacer::new(settings.min_delay_ms, settings.max_delay_ms)
    }
}

impl Pacer for RandomPacer {
    fn pause(&mut self) {
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Sleeps a fixed duration.
pub struct FixedPacer(pub Duration);

impl Pacer for FixedPacer {
    fn pause(&mut self) {
        if !self.0.is_zero() {
            thread::sleep(self.0);
        }
    }
}

/// One listing with a resolved VIN.
#[derive(Debug, Clone, PartialEq)]
pub struct RawListing {
    pub vin: Vin,
    pub price: Option<i64>,
    pub mileage: Option<i64>,
    pub source_id: String,
    pub detail_url: Option<String>,
}

/// Listings of one source, one per distinct VIN, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ListingTable {
    rows: Vec<RawListing>,
}

impl ListingTable {
    pub fn rows(&self) -> &[RawListing] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `ID,VIN,Prix,Kilometrage`, the per-source file layout.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(LISTING_COLUMNS);
        for row in &self.rows {
            table.push_row(vec![
                Value::from(row.source_id.as_str()),
                Value::from(row.vin.as_str()),
                Value::from(row.price),
                Value::from(row.mileage),
            ]);
        }
        table
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectStats {
    pub pages: usize,
    pub candidates: usize,
    pub collected: usize,
    pub skipped_no_vin: usize,
    pub duplicates: usize,
    pub failures: usize,
    pub circuit_opened: bool,
}

/// Output of one collector run. The table holds whatever succeeded.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub table: ListingTable,
    pub stats: CollectStats,
}

/// Per-run state. Owned by a single `collect` call.
struct Run {
    seen: HashSet<Vin>,
    seen_details: HashSet<String>,
    fetched_any: bool,
    breaker: CircuitBreaker,
    out: Collected,
}

/// Drives a fetcher over one source's result pages.
pub struct Collector<F, P> {
    fetcher: F,
    pacer: P,
    limits: CollectSettings,
    retry: RetrySettings,
    progress: bool,
}

impl<F: Fetcher, P: Pacer> Collector<F, P> {
    pub fn new(fetcher: F, pacer: P, limits: CollectSettings, retry: RetrySettings) -> Self {
        Collector {
            fetcher,
            pacer,
            limits,
            retry,
            progress: false,
        }
    }

    /// Show a spinner while collecting.
    pub fn with_progress(mut self, on: bool) -> Self {
        self.progress = on;
        self
    }

    /// Walk the source's searches page by page until the page cap, the VIN
    /// cap, or an empty page. Fetch failures are logged and skipped.
    pub fn collect(&mut self, profile: &SourceProfile) -> Collected {
        let mut run = Run {
            seen: HashSet::new(),
            seen_details: HashSet::new(),
            fetched_any: false,
            breaker: CircuitBreaker::from_settings(&self.retry),
            out: Collected::default(),
        };
        let backoff = Backoff::from_settings(&self.retry);

        let pb = if self.progress {
            let pb = ProgressBar::new_spinner();
            let template = "{spinner:.green} [{elapsed_precise}] {msg}";
            if let Ok(style) = ProgressStyle::default_spinner().template(template) {
                pb.set_style(style);
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut pages_visited = 0usize;
        'searches: for template in &profile.search_urls {
            for page in 1.. {
                if pages_visited >= self.limits.max_pages
                    || run.out.table.len() >= self.limits.max_vins
                {
                    break 'searches;
                }
                if run.breaker.is_open() {
                    run.out.stats.circuit_opened = true;
                    warn!("{}: circuit open, stopping collection", profile.name);
                    break 'searches;
                }
                pages_visited += 1;

                let url = SourceProfile::page_url(template, page);
                let Some(html) = self.fetch(&mut run, &backoff, &url) else {
                    continue;
                };
                run.out.stats.pages += 1;

                let candidates = listing_candidates(
                    &profile.strategy,
                    &html,
                    &profile.price_bounds,
                    &profile.mileage_bounds,
                );
                if candidates.is_empty() {
                    info!("{}: no listings on page {}, end of results", profile.name, page);
                    break;
                }
                run.out.stats.candidates += candidates.len();

                for candidate in candidates {
                    if run.out.table.len() >= self.limits.max_vins {
                        break;
                    }
                    self.admit(&mut run, &backoff, profile, candidate);
                }
                pb.set_message(format!(
                    "{}: page {} | {} VINs",
                    profile.label,
                    pages_visited,
                    run.out.table.len()
                ));
                pb.tick();
            }
        }
        pb.finish_and_clear();

        run.out.stats.collected = run.out.table.len();
        let s = &run.out.stats;
        info!(
            "{}: {} VINs from {} pages ({} without VIN, {} duplicates, {} failures)",
            profile.name, s.collected, s.pages, s.skipped_no_vin, s.duplicates, s.failures
        );
        run.out
    }

    /// Resolve a candidate's VIN (fetching its detail page if needed) and
    /// append it unless already seen.
    fn admit(
        &mut self,
        run: &mut Run,
        backoff: &Backoff,
        profile: &SourceProfile,
        candidate: Candidate,
    ) {
        let Candidate {
            vin,
            detail_url,
            price,
            mut mileage,
        } = candidate;

        let vin = match (vin, detail_url.as_deref()) {
            (Some(vin), _) => Some(vin),
            (None, Some(url)) if profile.strategy.needs_detail_pages() => {
                if !run.seen_details.insert(url.to_string()) {
                    run.out.stats.duplicates += 1;
                    return;
                }
                self.fetch(run, backoff, url)
                    .and_then(|html| detail_fields(&profile.strategy, &html))
                    .and_then(|d| {
                        mileage = d
                            .mileage
                            .filter(|m| profile.mileage_bounds.contains(*m))
                            .or(mileage);
                        d.vin
                    })
            }
            _ => None,
        };

        let Some(vin) = vin else {
            debug!("{}: listing without VIN skipped", profile.name);
            run.out.stats.skipped_no_vin += 1;
            return;
        };
        if !run.seen.insert(vin.clone()) {
            run.out.stats.duplicates += 1;
            return;
        }
        if !vin.check_digit_matches() {
            debug!("{}: {} has a non-matching check digit", profile.name, vin);
        }

        let source_id = profile.row_id(run.out.table.len() + 1);
        run.out.table.rows.push(RawListing {
            vin,
            price,
            mileage,
            source_id,
            detail_url,
        });
    }

    /// Paced, retried fetch. `None` when the fetch failed or the breaker is
    /// open; either way it counts as a failure.
    fn fetch(&mut self, run: &mut Run, backoff: &Backoff, url: &str) -> Option<String> {
        if run.breaker.check().is_err() {
            run.out.stats.failures += 1;
            return None;
        }
        if run.fetched_any {
            self.pacer.pause();
        }
        run.fetched_any = true;

        let fetcher = &mut self.fetcher;
        match backoff.run(url, || fetcher.fetch(url)) {
            Ok(body) => {
                run.breaker.record_success();
                Some(body)
            }
            Err(e) => {
                warn!("fetch failed for {}: {}", url, e);
                run.breaker.record_failure();
                run.out.stats.failures += 1;
                None
            }
        }
    }
}
