use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rusqlite::Connection;
use tracing::info;

use crate::clean::{self, CleanStats};
use crate::collect::{CollectStats, Collector, Fetcher, Pacer, SourceProfile};
use crate::db::{self, StageMetric};
use crate::decode::client::DecodeService;
use crate::decode::{DecodePipeline, DecodeReport, DecodedSet};
use crate::error::Result;
use crate::join::{join, JoinStats};
use crate::merge::{merge, MergeStats, SchemaMapping, SourceInput, VIN};
use crate::table::Table;

/// `20261018_142501`, used in run ids and dated file names.
pub fn timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

pub fn run_id(stamp: &str) -> String {
    format!("run-{}", stamp)
}

/// Where each stage writes its table.
#[derive(Debug, Clone)]
pub struct Outputs {
    dir: PathBuf,
    stamp: String,
}

impl Outputs {
    pub fn new(dir: impl Into<PathBuf>, stamp: impl Into<String>) -> Self {
        Outputs {
            dir: dir.into(),
            stamp: stamp.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    pub fn source(&self, profile: &SourceProfile) -> PathBuf {
        self.dir.join(format!("{}.csv", profile.name))
    }

    pub fn merged(&self) -> PathBuf {
        self.dir.join("fusion.csv")
    }

    pub fn decoded(&self) -> PathBuf {
        self.dir.join(format!("nhtsa_vehicle_data_{}.csv", self.stamp))
    }

    pub fn joined(&self) -> PathBuf {
        self.dir.join(format!("vehicules_complets_{}.csv", self.stamp))
    }

    pub fn cleaned(&self) -> PathBuf {
        self.dir.join(format!("vehicules_complets_nettoye_{}.csv", self.stamp))
    }
}

/// Rendered values of one column, missing cells skipped.
pub fn column_strings(table: &Table, column: &str) -> Result<Vec<String>> {
    let idx = table.require_column(column, "input table")?;
    Ok(table.rows().iter().filter_map(|r| r[idx].render()).collect())
}

/// Decoder output joined back onto a merged table.
#[derive(Debug, Clone)]
pub struct Enriched {
    pub decoded: DecodedSet,
    pub decode: DecodeReport,
    pub joined: Table,
    pub join: JoinStats,
}

/// Decode every VIN of `merged`, then left-join the results onto it.
pub fn enrich<S: DecodeService, Q: Pacer>(
    merged: &Table,
    decoder: &mut DecodePipeline<S, Q>,
) -> Result<Enriched> {
    let raw = column_strings(merged, VIN)?;
    let (decoded, decode) = decoder.decode_raw(raw.iter().map(String::as_str));
    let (joined, join) = join(merged, &decoded)?;
    Ok(Enriched {
        decoded,
        decode,
        joined,
        join,
    })
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub run_id: String,
    pub sources: Vec<(String, CollectStats)>,
    pub merge: MergeStats,
    pub decode: DecodeReport,
    pub join: JoinStats,
    pub clean: CleanStats,
    pub files: Vec<PathBuf>,
}

impl RunReport {
    /// One row per stage, in execution order.
    pub fn metrics(&self) -> Vec<StageMetric> {
        let mut out: Vec<StageMetric> = self
            .sources
            .iter()
            .map(|(name, s)| StageMetric {
                stage: format!("collect:{}", name),
                rows_in: s.candidates,
                rows_out: s.collected,
                skipped: s.skipped_no_vin + s.duplicates,
                failed: s.failures,
            })
            .collect();
        out.push(StageMetric {
            stage: "merge".into(),
            rows_in: self.merge.rows_in,
            rows_out: self.merge.rows_out,
            skipped: self.merge.rejected_vins + self.merge.duplicates,
            failed: 0,
        });
        out.push(StageMetric {
            stage: "decode".into(),
            rows_in: self.decode.attempted + self.decode.rejected + self.decode.duplicates,
            rows_out: self.decode.decoded,
            skipped: self.decode.rejected + self.decode.duplicates,
            failed: self.decode.failed_batches,
        });
        out.push(StageMetric {
            stage: "join".into(),
            rows_in: self.join.rows,
            rows_out: self.join.rows,
            skipped: self.join.unmatched,
            failed: 0,
        });
        out.push(StageMetric {
            stage: "clean".into(),
            rows_in: self.join.rows,
            rows_out: self.join.rows,
            skipped: 0,
            failed: 0,
        });
        out
    }

    pub fn print(&self) {
        println!("\n=== {} ===", self.run_id);
        for m in self.metrics() {
            println!(
                "  {:<22} in {:>5}  out {:>5}  skipped {:>4}  failed {:>3}",
                m.stage, m.rows_in, m.rows_out, m.skipped, m.failed
            );
        }
        println!(
            "  decode success rate {:.1}%, {} cells filled by cleaning",
            self.decode.success_rate(),
            self.clean.filled
        );
        self.join.print();
        for f in &self.files {
            println!("  wrote {}", f.display());
        }
    }
}

/// Collect → merge → decode → join → clean, writing each stage's table as
/// soon as that stage completes.
pub struct Pipeline<F, P, S, Q> {
    collector: Collector<F, P>,
    decoder: DecodePipeline<S, Q>,
    mapping: SchemaMapping,
    outputs: Outputs,
}

impl<F: Fetcher, P: Pacer, S: DecodeService, Q: Pacer> Pipeline<F, P, S, Q> {
    pub fn new(
        collector: Collector<F, P>,
        decoder: DecodePipeline<S, Q>,
        mapping: SchemaMapping,
        outputs: Outputs,
    ) -> Self {
        Pipeline {
            collector,
            decoder,
            mapping,
            outputs,
        }
    }

    pub fn run(&mut self, sources: &[SourceProfile]) -> Result<(Table, RunReport)> {
        std::fs::create_dir_all(self.outputs.dir())?;
        let mut report = RunReport {
            run_id: run_id(self.outputs.stamp()),
            ..Default::default()
        };

        let mut inputs = Vec::with_capacity(sources.len());
        for profile in sources {
            info!("collecting {}", profile.label);
            let collected = self.collector.collect(profile);
            let path = self.outputs.source(profile);
            collected.table.to_table().write_csv(&path)?;
            report.files.push(path);
            inputs.push(SourceInput::from_listings(profile, &collected.table));
            report.sources.push((profile.name.clone(), collected.stats));
        }

        let (merged, merge_stats) = merge(&inputs, &self.mapping)?;
        report.merge = merge_stats;
        self.write(&merged, self.outputs.merged(), &mut report)?;

        let enriched = enrich(&merged, &mut self.decoder)?;
        self.write(&enriched.decoded.to_table(), self.outputs.decoded(), &mut report)?;
        self.write(&enriched.joined, self.outputs.joined(), &mut report)?;
        report.decode = enriched.decode;
        report.join = enriched.join;

        let (cleaned, clean_stats) = clean::clean(&enriched.joined);
        report.clean = clean_stats;
        self.write(&cleaned, self.outputs.cleaned(), &mut report)?;

        Ok((cleaned, report))
    }

    fn write(&self, table: &Table, path: PathBuf, report: &mut RunReport) -> Result<()> {
        table.write_csv(&path)?;
        info!("wrote {} rows to {}", table.len(), path.display());
        report.files.push(path);
        Ok(())
    }
}

/// Upsert the cleaned table and log the run's stage metrics.
pub fn store(conn: &Connection, cleaned: &Table, report: &RunReport) -> Result<usize> {
    db::init_schema(conn)?;
    let saved = db::save_vehicles(conn, cleaned)?;
    db::record_run(conn, &report.run_id, &report.metrics())?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dated_names() {
        let now = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let stamp = timestamp(now);
        assert_eq!(stamp, "20260304_050607");
        assert_eq!(run_id(&stamp), "run-20260304_050607");

        let out = Outputs::new("/tmp/x", stamp);
        assert_eq!(out.merged(), PathBuf::from("/tmp/x/fusion.csv"));
        assert_eq!(
            out.decoded(),
            PathBuf::from("/tmp/x/nhtsa_vehicle_data_20260304_050607.csv")
        );
        let cargurus = &SourceProfile::builtin()[1];
        assert_eq!(out.source(cargurus), PathBuf::from("/tmp/x/cargurus.csv"));
    }

    #[test]
    fn metrics_follow_stage_order() {
        let report = RunReport {
            run_id: "run-1".into(),
            sources: vec![(
                "cargurus".into(),
                CollectStats {
                    candidates: 12,
                    collected: 9,
                    skipped_no_vin: 2,
                    duplicates: 1,
                    failures: 1,
                    ..Default::default()
                },
            )],
            merge: MergeStats {
                rows_in: 9,
                rows_out: 8,
                duplicates: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let m = report.metrics();
        let stages: Vec<&str> = m.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(stages, ["collect:cargurus", "merge", "decode", "join", "clean"]);
        assert_eq!((m[0].rows_in, m[0].rows_out, m[0].skipped, m[0].failed), (12, 9, 3, 1));
        assert_eq!(m[1].skipped, 1);
    }

    #[test]
    fn column_strings_skips_missing() {
        let t = Table::from_reader("ID,VIN\n1,A\n2,\n3,B\n".as_bytes()).unwrap();
        assert_eq!(column_strings(&t, "VIN").unwrap(), ["A", "B"]);
        assert!(column_strings(&t, "Prix").is_err());
    }
}
