//! Scientific dataset downloader.
//!
//! Fetches archive data day by day (ERA5) or year by year (MODIS) for a fixed
//! area of interest:
//! - ERA5 hourly reanalysis from the Copernicus Climate Data Store
//! - MODIS granules from NASA Earthdata (CMR search)
//! - Per-request failure isolation with a run summary and exit status
//! - Optional bounded concurrency and retry of transient failures

mod client;
mod config;
mod credentials;
mod products;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use fetch_common::time::parse_date;
use fetch_common::{AreaOfInterest, DownloadRequest, OutputFormat};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use client::cds::CdsClient;
use client::earthdata::EarthdataClient;
use config::{DownloaderConfig, YearBounds};
use credentials::{CdsCredentials, EarthdataCredentials};
use products::era5::Era5Product;
use runner::{RunOptions, RunSummary, Runner};

#[derive(Parser, Debug)]
#[command(name = "geodata-downloader")]
#[command(about = "Download ERA5 reanalysis and MODIS granules over a date range")]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "DOWNLOADER_CONFIG", default_value = "config/downloader.yaml", global = true)]
    config: PathBuf,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Maximum concurrent requests (1 = sequential)
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// Retry attempts for network errors and timeouts
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Re-download outputs that already exist
    #[arg(long, global = true)]
    overwrite: bool,

    /// Log planned requests without downloading
    #[arg(long, global = true)]
    dry_run: bool,

    /// Write the run summary as JSON to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// ERA5 pressure-level and single-level hourly data, one file per day
    Era5(Era5Args),
    /// MODIS granules, one directory per year
    Modis(ModisArgs),
}

#[derive(ClapArgs, Debug)]
struct Era5Args {
    /// First day (YYYY-MM-DD or YYYYMMDD)
    #[arg(long, value_parser = parse_date)]
    start: Option<NaiveDate>,

    /// Last day, inclusive
    #[arg(long, value_parser = parse_date)]
    end: Option<NaiveDate>,

    /// Area as "north,west,south,east"
    #[arg(long)]
    area: Option<AreaOfInterest>,

    /// Output root directory
    #[arg(long)]
    output_dir: Option<String>,

    /// Level types to fetch: pl, sl
    #[arg(long, value_delimiter = ',')]
    products: Vec<Era5Product>,

    /// Request NetCDF instead of GRIB
    #[arg(long)]
    netcdf: bool,
}

#[derive(ClapArgs, Debug)]
struct ModisArgs {
    /// CMR short name, e.g. MOD21A2
    #[arg(long)]
    short_name: Option<String>,

    /// Overall first day (YYYY-MM-DD or YYYYMMDD)
    #[arg(long, value_parser = parse_date)]
    start: Option<NaiveDate>,

    /// Overall last day, inclusive
    #[arg(long, value_parser = parse_date)]
    end: Option<NaiveDate>,

    /// First year of the yearly loop
    #[arg(long, requires = "last_year")]
    first_year: Option<i32>,

    /// Last year of the yearly loop
    #[arg(long, requires = "first_year")]
    last_year: Option<i32>,

    /// Area as "north,west,south,east"
    #[arg(long)]
    area: Option<AreaOfInterest>,

    /// Output root directory
    #[arg(long)]
    output_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_tracing(&args.log_level, args.json_logs)?;

    let mut config = DownloaderConfig::load_or_default(&args.config)?;
    apply_run_overrides(&mut config, &args);

    let summary = match &args.command {
        Command::Era5(era5_args) => {
            apply_era5_overrides(&mut config, era5_args);
            run_era5(&config, args.dry_run).await?
        }
        Command::Modis(modis_args) => {
            apply_modis_overrides(&mut config, modis_args);
            run_modis(&config, args.dry_run).await?
        }
    };

    let Some(summary) = summary else {
        return Ok(ExitCode::SUCCESS);
    };

    if let Some(report) = &args.report {
        summary.write_json(report)?;
        info!(path = %report.display(), "Wrote run report");
    }

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        for failure in &summary.failures {
            warn!(path = %failure.destination.display(), kind = %failure.kind, "Failed download");
        }
        Ok(ExitCode::FAILURE)
    }
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn apply_run_overrides(config: &mut DownloaderConfig, args: &Args) {
    if let Some(n) = args.max_concurrent {
        config.download.max_concurrent = n;
    }
    if let Some(n) = args.max_retries {
        config.download.max_retries = n;
    }
    if args.overwrite {
        config.download.overwrite = true;
    }
}

fn apply_era5_overrides(config: &mut DownloaderConfig, args: &Era5Args) {
    let era5 = &mut config.era5;
    if let Some(start) = args.start {
        era5.start_date = start;
    }
    if let Some(end) = args.end {
        era5.end_date = end;
    }
    if let Some(area) = args.area {
        era5.area = area;
    }
    if let Some(dir) = &args.output_dir {
        era5.output_dir = dir.clone();
    }
    if !args.products.is_empty() {
        era5.products = args.products.clone();
    }
    if args.netcdf {
        era5.format = OutputFormat::Netcdf;
    }
}

fn apply_modis_overrides(config: &mut DownloaderConfig, args: &ModisArgs) {
    let modis = &mut config.modis;
    if let Some(name) = &args.short_name {
        modis.short_name = name.clone();
    }
    if let Some(start) = args.start {
        modis.start_date = start;
    }
    if let Some(end) = args.end {
        modis.end_date = end;
    }
    if let (Some(first), Some(last)) = (args.first_year, args.last_year) {
        modis.years = Some(YearBounds { first, last });
    }
    if let Some(area) = args.area {
        modis.area = area;
    }
    if let Some(dir) = &args.output_dir {
        modis.output_dir = dir.clone();
    }
}

fn log_plan(requests: impl Iterator<Item = DownloadRequest>) {
    let mut count = 0usize;
    for request in requests {
        count += 1;
        info!(path = %request.destination.display(), request = %request.label(), "Planned request");
    }
    info!(count = count, "Dry run, nothing downloaded");
}

async fn run_era5(config: &DownloaderConfig, dry_run: bool) -> Result<Option<RunSummary>> {
    let era5 = &config.era5;
    let range = era5.date_range()?;
    era5.area.validate().context("Invalid ERA5 area")?;
    let layout = era5.layout()?;

    info!(
        range = %range,
        area = %era5.area,
        root = %layout.root().display(),
        "Starting ERA5 download"
    );

    let requests = products::era5::requests(range, &era5.products, era5.area, era5.format, &layout);

    if dry_run {
        log_plan(requests);
        return Ok(None);
    }

    let credentials = CdsCredentials::resolve(&config.cds).context("Failed to load CDS credentials")?;
    let http = client::http_client(&config.download)?;
    let cds = Arc::new(CdsClient::new(
        http,
        credentials,
        config.download.poll_interval(),
        config.download.job_timeout(),
    ));

    let runner = Runner::new(cds, RunOptions::from(&config.download));
    Ok(Some(runner.run("era5", requests).await))
}

async fn run_modis(config: &DownloaderConfig, dry_run: bool) -> Result<Option<RunSummary>> {
    let modis = &config.modis;
    let bounds = modis.date_range()?;
    modis.area.validate().context("Invalid MODIS area")?;
    let layout = modis.layout()?;
    let (first_year, last_year) = modis.year_bounds();

    info!(
        short_name = %modis.short_name,
        range = %bounds,
        first_year = first_year,
        last_year = last_year,
        area = %modis.area,
        root = %layout.root().display(),
        "Starting MODIS download"
    );

    let requests = products::modis::requests(
        &modis.short_name,
        bounds,
        first_year,
        last_year,
        modis.area,
        &layout,
    );

    if dry_run {
        log_plan(requests);
        return Ok(None);
    }

    let credentials =
        EarthdataCredentials::resolve(&config.earthdata).context("Failed to load Earthdata credentials")?;
    let http = client::http_client(&config.download)?;
    let earthdata = EarthdataClient::login(http, credentials, &config.earthdata, config.download.overwrite)
        .await
        .context("Earthdata login failed")?;

    let runner = Runner::new(Arc::new(earthdata), RunOptions::from(&config.download));
    Ok(Some(runner.run("modis", requests).await))
}
