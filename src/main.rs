use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};

use vin_harvest::clean;
use vin_harvest::collect::{Collector, FixedPacer, RandomPacer};
use vin_harvest::config::Settings;
use vin_harvest::db::{self, Facet, SearchFilter};
use vin_harvest::decode::client::{DecodeService, NhtsaClient};
use vin_harvest::decode::DecodePipeline;
use vin_harvest::merge;
use vin_harvest::net::HttpFetcher;
use vin_harvest::pipeline::{self, Outputs, Pipeline};
use vin_harvest::table::Table;
use vin_harvest::vin::normalize;

#[derive(Parser)]
#[command(name = "vin_harvest", about = "Used-vehicle VIN harvester and NHTSA decoder")]
struct Cli {
    /// Settings file (default: ./vin_harvest.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured listing sources
    Sources,
    /// Scrape one source into <name>.csv
    Collect {
        /// Source name (see `sources`)
        source: String,
        /// Stop after this many result pages
        #[arg(long)]
        max_pages: Option<usize>,
        /// Stop after this many distinct VINs
        #[arg(long)]
        max_vins: Option<usize>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Merge per-source CSVs into one deduplicated table
    Merge {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Decode VINs from a CSV column or the command line
    Decode {
        /// CSV file holding the VINs
        #[arg(short, long, conflicts_with = "vin")]
        input: Option<PathBuf>,
        /// Column to read VINs from
        #[arg(long, default_value = "VIN")]
        column: String,
        /// VIN to decode (repeatable)
        #[arg(long)]
        vin: Vec<String>,
        #[arg(long)]
        model_year: Option<u16>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Manufacturer details for a VIN's WMI
    Wmi { vin: String },
    /// Decode a merged table's VINs and join the results onto it
    Enrich {
        input: PathBuf,
        #[arg(long)]
        model_year: Option<u16>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Fill missing values of an enriched table
    Clean {
        input: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also upsert the cleaned rows into the database
        #[arg(long)]
        store: bool,
    },
    /// Collect every source, then merge, decode, join and clean
    Run {
        /// Only these sources (default: all)
        #[arg(short, long)]
        source: Vec<String>,
        /// Upsert the result and the run metrics into the database
        #[arg(long)]
        store: bool,
    },
    /// Query stored vehicles
    Search {
        #[arg(short, long)]
        make: Option<String>,
        #[arg(short, long)]
        year: Option<i64>,
        /// List the distinct values of one column instead
        #[arg(long, value_enum)]
        facet: Option<Facet>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let stamp = pipeline::timestamp(Local::now());
    let outputs = Outputs::new(&settings.output.dir, stamp.as_str());

    let result = match cli.command {
        Commands::Sources => {
            for s in &settings.sources {
                println!(
                    "{:<12} {:<12} {:<5} {} search(es)",
                    s.name,
                    s.label,
                    s.id_prefix,
                    s.search_urls.len()
                );
            }
            Ok(())
        }
        Commands::Collect {
            source,
            max_pages,
            max_vins,
            out,
        } => {
            let profile = settings.source(&source)?;
            let mut limits = settings.collect.clone();
            limits.max_pages = max_pages.unwrap_or(limits.max_pages);
            limits.max_vins = max_vins.unwrap_or(limits.max_vins);

            let mut collector = Collector::new(
                HttpFetcher::new()?,
                RandomPacer::from_settings(&limits),
                limits,
                settings.retry.clone(),
            )
            .with_progress(true);
            println!("Collecting {} ...", profile.label);
            let collected = collector.collect(profile);

            let path = out.unwrap_or_else(|| outputs.source(profile));
            write_table(&collected.table.to_table(), &path)?;
            let s = &collected.stats;
            println!(
                "{} VINs from {} pages ({} cards without VIN, {} duplicates, {} failed fetches){}",
                s.collected,
                s.pages,
                s.skipped_no_vin,
                s.duplicates,
                s.failures,
                if s.circuit_opened { ", stopped early" } else { "" }
            );
            println!("Saved to {}", path.display());
            Ok(())
        }
        Commands::Merge { files, out } => {
            let inputs =
                merge::read_inputs(&files, &settings.sources).context("reading merge inputs")?;
            let (merged, stats) = merge::merge(&inputs, &settings.columns)?;
            stats.print();
            let path = out.unwrap_or_else(|| outputs.merged());
            write_table(&merged, &path)?;
            println!("Saved to {}", path.display());
            Ok(())
        }
        Commands::Decode {
            input,
            column,
            vin,
            model_year,
            out,
        } => {
            let raw = match &input {
                Some(p) => pipeline::column_strings(&read_table(p)?, &column)?,
                None => vin,
            };
            if raw.is_empty() {
                println!("No VINs to decode. Pass --input <csv> or --vin <VIN>.");
                return Ok(());
            }
            let mut decoder = decoder(&settings, model_year)?;
            let (decoded, report) = decoder.decode_raw(raw.iter().map(String::as_str));
            report.print();
            let path = out.unwrap_or_else(|| outputs.decoded());
            write_table(&decoded.to_table(), &path)?;
            println!("Saved to {}", path.display());
            Ok(())
        }
        Commands::Wmi { vin } => {
            let vin = normalize(&vin).with_context(|| format!("invalid VIN '{}'", vin))?;
            let mut client = NhtsaClient::new(&settings.decode)?;
            match client.lookup_wmi(vin.wmi())? {
                Some(record) => {
                    for (key, value) in record.iter().filter(|(_, v)| !v.is_null()) {
                        let shown = value
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| value.to_string());
                        if !shown.is_empty() {
                            println!("{:<28} {}", key, truncate(&shown, 60));
                        }
                    }
                }
                None => println!("No manufacturer found for WMI {}", vin.wmi()),
            }
            Ok(())
        }
        Commands::Enrich {
            input,
            model_year,
            out,
        } => {
            let merged = read_table(&input)?;
            let mut decoder = decoder(&settings, model_year)?;
            let enriched = pipeline::enrich(&merged, &mut decoder)?;
            enriched.decode.print();
            enriched.join.print();
            write_table(&enriched.decoded.to_table(), &outputs.decoded())?;
            let path = out.unwrap_or_else(|| outputs.joined());
            write_table(&enriched.joined, &path)?;
            println!("Saved to {}", path.display());
            Ok(())
        }
        Commands::Clean { input, out, store } => {
            let table = read_table(&input)?;
            let (cleaned, stats) = clean::clean(&table);
            println!(
                "Cleaned {} rows: {} cells filled, {} values coerced.",
                cleaned.len(),
                stats.filled,
                stats.coerced
            );
            let path = out.unwrap_or_else(|| outputs.cleaned());
            write_table(&cleaned, &path)?;
            println!("Saved to {}", path.display());
            if store {
                let conn = open_db(&settings)?;
                let saved = db::save_vehicles(&conn, &cleaned)?;
                println!("Stored {} vehicles ({} total)", saved, db::count_vehicles(&conn)?);
            }
            Ok(())
        }
        Commands::Run { source, store } => {
            let profiles = if source.is_empty() {
                settings.sources.clone()
            } else {
                source
                    .iter()
                    .map(|name| settings.source(name).cloned())
                    .collect::<Result<Vec<_>, _>>()?
            };
            let collector = Collector::new(
                HttpFetcher::new()?,
                RandomPacer::from_settings(&settings.collect),
                settings.collect.clone(),
                settings.retry.clone(),
            )
            .with_progress(true);
            let mut run = Pipeline::new(
                collector,
                decoder(&settings, None)?,
                settings.columns.clone(),
                outputs.clone(),
            );
            println!("Pipeline: {} source(s) -> {}", profiles.len(), outputs.dir().display());
            let (cleaned, report) = run.run(&profiles)?;
            report.print();
            if store {
                let conn = open_db(&settings)?;
                let saved = pipeline::store(&conn, &cleaned, &report)?;
                println!("Stored {} vehicles under {}", saved, report.run_id);
            }
            Ok(())
        }
        Commands::Search {
            make,
            year,
            facet,
            limit,
        } => {
            let conn = open_db(&settings)?;
            if let Some(facet) = facet {
                for v in db::distinct_values(&conn, facet)? {
                    println!("{}", v);
                }
                return Ok(());
            }
            let rows = db::search(&conn, &SearchFilter { make, year, limit })?;
            if rows.is_empty() {
                println!("No vehicles found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<17} | {:<14} | {:<18} | {:>4} | {:>9} | {:>8}",
                "#", "VIN", "Make", "Model", "Year", "Price", "Mileage"
            );
            println!("{}", "-".repeat(90));
            for (i, r) in rows.iter().enumerate() {
                let year = r.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into());
                let price = r.price.map(|p| format!("{:.0}", p)).unwrap_or_else(|| "-".into());
                let mileage = r.mileage.map(|m| m.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "{:>3} | {:<17} | {:<14} | {:<18} | {:>4} | {:>9} | {:>8}",
                    i + 1,
                    r.vin,
                    truncate(&r.make, 14),
                    truncate(&r.model, 18),
                    year,
                    price,
                    mileage
                );
            }
            println!("\n{} of {} vehicles", rows.len(), db::count_vehicles(&conn)?);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn decoder(
    settings: &Settings,
    model_year: Option<u16>,
) -> anyhow::Result<DecodePipeline<NhtsaClient, FixedPacer>> {
    let mut decode = settings.decode.clone();
    decode.model_year = model_year.or(decode.model_year);
    let client = NhtsaClient::new(&decode).context("building NHTSA client")?;
    Ok(DecodePipeline::new(client, &decode, &settings.retry).with_progress(true))
}

fn open_db(settings: &Settings) -> anyhow::Result<rusqlite::Connection> {
    let path = Path::new(&settings.output.database);
    let conn = db::connect(path).with_context(|| format!("opening {}", path.display()))?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn read_table(path: &Path) -> anyhow::Result<Table> {
    Table::read_csv(path).with_context(|| format!("reading {}", path.display()))
}

fn write_table(table: &Table, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    table
        .write_csv(path)
        .with_context(|| format!("writing {}", path.display()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
