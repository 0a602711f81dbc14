//! SeriesVault CLI: refresh, write, and inspect cached series archives.
//!
//! Commands:
//! - `refresh`: serve a series' archive path, fetching from CSV files when stale
//! - `write`: push a sorted CSV file straight through the partition writer
//! - `entries`: list the entries held by an archive
//! - `show`: print an entry's rows with decoded values
//! - `check`: report whether a cached path needs a refresh

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use seriesvault_core::archive::{line, ArchiveKey, ArchiveStore, DiskArchiveStore};
use seriesvault_core::data::csv_source::read_points;
use seriesvault_core::data::{CsvFileFetcher, SeriesDownloader};
use seriesvault_core::domain::{Category, ResourceKey, Resolution, SeriesId, WritePolicy};
use seriesvault_core::freshness;
use seriesvault_core::sync::KeySynchronizer;
use seriesvault_core::writer::PartitionWriter;
use seriesvault_core::CacheConfig;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "seriesvault",
    about = "SeriesVault CLI: on-disk cache for downloaded time series"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Archive root. Overrides the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Return the archive path for a series, refreshing it from CSV files if stale.
    Refresh {
        /// Series symbol (e.g., GDP).
        #[arg(long)]
        symbol: String,

        #[arg(long, default_value = "usa")]
        market: String,

        #[arg(long, default_value = "custom")]
        category: String,

        /// tick, second, minute, hour or daily.
        #[arg(long, default_value = "daily")]
        resolution: String,

        /// Days before a consolidated archive goes stale. Overrides the config file.
        #[arg(long)]
        refresh_days: Option<u32>,

        /// Directory holding `{symbol}.csv` source files.
        #[arg(long)]
        source_dir: PathBuf,
    },
    /// Write a sorted `symbol,time,value` CSV file through the partition writer.
    Write {
        #[arg(long)]
        input: PathBuf,

        #[arg(long, default_value = "usa")]
        market: String,

        #[arg(long, default_value = "daily")]
        resolution: String,

        /// overwrite, append or merge. Defaults to the config file, then the resolution.
        #[arg(long)]
        policy: Option<String>,
    },
    /// List the entries held by an archive.
    Entries { archive: PathBuf },
    /// Print an entry's rows, addressed as `ARCHIVE#ENTRY`.
    Show { key: String },
    /// Report whether a cached path needs a refresh.
    Check {
        path: PathBuf,

        #[arg(long)]
        refresh_days: Option<u32>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::Refresh {
            symbol,
            market,
            category,
            resolution,
            refresh_days,
            source_dir,
        } => run_refresh(
            config,
            symbol,
            market,
            &category,
            &resolution,
            refresh_days,
            source_dir,
        ),
        Commands::Write {
            input,
            market,
            resolution,
            policy,
        } => run_write(&config, &input, &market, &resolution, policy.as_deref()),
        Commands::Entries { archive } => run_entries(&archive),
        Commands::Show { key } => run_show(&key),
        Commands::Check { path, refresh_days } => {
            run_check(&path, refresh_days.unwrap_or(config.refresh_period_days))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_resolution(s: &str) -> Result<Resolution> {
    s.parse::<Resolution>().map_err(anyhow::Error::msg)
}

fn run_refresh(
    config: CacheConfig,
    symbol: String,
    market: String,
    category: &str,
    resolution: &str,
    refresh_days: Option<u32>,
    source_dir: PathBuf,
) -> Result<()> {
    let category: Category = category.parse().map_err(anyhow::Error::msg)?;
    let resolution = parse_resolution(resolution)?;
    if !source_dir.is_dir() {
        bail!("source directory does not exist: {}", source_dir.display());
    }

    let days = refresh_days.unwrap_or(config.refresh_period_days);
    let downloader = SeriesDownloader::new(
        config,
        Arc::new(CsvFileFetcher::new(source_dir)),
        Arc::new(DiskArchiveStore::new()),
    )?;

    let key = ResourceKey::new(SeriesId::new(symbol, market, category), resolution);
    let path = downloader.get_or_refresh(&key, days);
    println!("{}", path.display());
    Ok(())
}

fn run_write(
    config: &CacheConfig,
    input: &Path,
    market: &str,
    resolution: &str,
    policy: Option<&str>,
) -> Result<()> {
    let resolution = parse_resolution(resolution)?;
    let policy = match policy {
        Some(p) => p.parse::<WritePolicy>().map_err(anyhow::Error::msg)?,
        None => config.write_policy_for(resolution),
    };

    let points = read_points(input, market, Category::Custom)
        .with_context(|| format!("reading {}", input.display()))?;

    let writer = PartitionWriter::new(
        resolution,
        policy,
        config.layout(),
        Arc::new(DiskArchiveStore::new()),
        Arc::new(KeySynchronizer::new()),
        Arc::new(config.flush_pool()?),
    );
    let summary = writer.write(points)?;

    for report in &summary.partitions {
        println!("{}  {} rows  {}", report.key, report.rows, &report.digest[..12]);
    }
    println!(
        "{} rows in {} partition(s), policy {policy}",
        summary.rows,
        summary.partitions.len()
    );
    Ok(())
}

fn run_entries(archive: &Path) -> Result<()> {
    let entries = DiskArchiveStore::new().list_entries(archive)?;
    if entries.is_empty() {
        println!("No entries: {}", archive.display());
        return Ok(());
    }
    for name in entries {
        println!("{name}");
    }
    Ok(())
}

fn run_show(key: &str) -> Result<()> {
    let key: ArchiveKey = key.parse()?;
    let Some(reader) = DiskArchiveStore::new().fetch(&key)? else {
        bail!("no such entry: {key}");
    };

    for text in reader.lines() {
        let text = text.with_context(|| format!("reading {key}"))?;
        if text.trim().is_empty() {
            continue;
        }
        let time = text.split(',').next().unwrap_or_default();
        let value = line::parse_value(&text)?;
        println!("{time:<16} {value}");
    }
    Ok(())
}

fn run_check(path: &Path, refresh_days: u32) -> Result<()> {
    let stale = freshness::needs_refresh(path, refresh_days);
    let kind = if freshness::is_date_partitioned(path) {
        "date-partitioned"
    } else {
        "consolidated"
    };
    println!(
        "{}: {} ({kind})",
        path.display(),
        if stale { "needs refresh" } else { "fresh" }
    );
    Ok(())
}
