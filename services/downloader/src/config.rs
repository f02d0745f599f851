//! Configuration loading for download jobs.
//!
//! Loads job settings from a YAML file (default `config/downloader.yaml`).
//! Every section has defaults so a partial or missing file still yields a
//! runnable configuration. Path and credential values support `~` and
//! `${VAR}` / `${VAR:-default}` expansion.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use fetch_common::{AreaOfInterest, DateRange, OutputFormat, OutputLayout};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::products::era5::Era5Product;

/// Root configuration loaded from YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub era5: Era5Config,
    pub modis: ModisConfig,
    pub download: DownloadSettings,
    pub cds: CdsSettings,
    pub earthdata: EarthdataSettings,
}

/// ERA5 reanalysis job.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Era5Config {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub area: AreaOfInterest,
    pub output_dir: String,
    /// Level types fetched for each day, in order.
    pub products: Vec<Era5Product>,
    pub format: OutputFormat,
}

impl Default for Era5Config {
    fn default() -> Self {
        let day = NaiveDate::from_ymd_opt(2025, 5, 31).unwrap_or_default();
        Self {
            start_date: day,
            end_date: day,
            // What CDS extracts for `[120, 60, 20, 160]`: north clipped to the pole.
            area: AreaOfInterest::new(90.0, 60.0, 20.0, 160.0),
            output_dir: "./ERA5".to_string(),
            products: vec![Era5Product::PressureLevels, Era5Product::SingleLevels],
            format: OutputFormat::Grib,
        }
    }
}

impl Era5Config {
    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::new(self.start_date, self.end_date).context("Invalid ERA5 date range")
    }

    pub fn layout(&self) -> Result<OutputLayout> {
        Ok(OutputLayout::new(expand_path(&self.output_dir)?))
    }
}

/// MODIS granule job.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModisConfig {
    /// CMR short name, e.g. "MOD21A2".
    pub short_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Years visited by the yearly loop; defaults to the years of the date range.
    pub years: Option<YearBounds>,
    pub area: AreaOfInterest,
    pub output_dir: String,
}

impl Default for ModisConfig {
    fn default() -> Self {
        Self {
            short_name: "MYD21A1D".to_string(),
            start_date: NaiveDate::from_ymd_opt(2000, 2, 25).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 5, 31).unwrap_or_default(),
            years: Some(YearBounds {
                first: 2011,
                last: 2025,
            }),
            area: AreaOfInterest::new(10.0, 78.0, 5.0, 85.0),
            output_dir: "./MODIS".to_string(),
        }
    }
}

impl ModisConfig {
    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::new(self.start_date, self.end_date).context("Invalid MODIS date range")
    }

    /// First and last year of the yearly loop.
    pub fn year_bounds(&self) -> (i32, i32) {
        match self.years {
            Some(years) => (years.first, years.last),
            None => (self.start_date.year(), self.end_date.year()),
        }
    }

    pub fn layout(&self) -> Result<OutputLayout> {
        Ok(OutputLayout::new(expand_path(&self.output_dir)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct YearBounds {
    pub first: i32,
    pub last: i32,
}

/// Transfer and run behaviour shared by both jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Requests in flight at once; 1 keeps the run sequential.
    pub max_concurrent: usize,
    /// Extra attempts for transient (network/timeout) failures.
    pub max_retries: u32,
    pub initial_retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Delay between CDS job status polls.
    pub poll_interval_secs: u64,
    /// Give up on a queued CDS job after this long.
    pub job_timeout_secs: u64,
    /// Re-download outputs that already exist.
    pub overwrite: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            max_retries: 0,
            initial_retry_delay_secs: 2,
            max_retry_delay_secs: 120,
            connect_timeout_secs: 30,
            request_timeout_secs: 3600,
            poll_interval_secs: 5,
            job_timeout_secs: 6 * 3600,
            overwrite: false,
        }
    }
}

impl DownloadSettings {
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_secs(self.initial_retry_delay_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Climate Data Store endpoint and key. Unset values fall back to the
/// environment and then to `~/.cdsapirc`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CdsSettings {
    pub url: Option<String>,
    pub key: Option<String>,
}

/// NASA Earthdata endpoints and optional token.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EarthdataSettings {
    pub token: Option<String>,
    pub cmr_url: String,
    pub urs_url: String,
    pub page_size: u32,
}

impl Default for EarthdataSettings {
    fn default() -> Self {
        Self {
            token: None,
            cmr_url: "https://cmr.earthdata.nasa.gov/search".to_string(),
            urs_url: "https://urs.earthdata.nasa.gov".to_string(),
            page_size: 2000,
        }
    }
}

impl DownloaderConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DownloaderConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(path = %path.display(), "Loaded downloader config");
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

/// Expand `~` and environment variables in a configured value.
pub fn expand_value(value: &str) -> Result<String> {
    shellexpand::full(value)
        .map(|v| v.into_owned())
        .with_context(|| format!("Failed to expand '{}'", value))
}

/// Expand a configured path.
pub fn expand_path(value: &str) -> Result<PathBuf> {
    expand_value(value).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_jobs() {
        let config = DownloaderConfig::default();
        assert_eq!(config.era5.start_date, NaiveDate::from_ymd_opt(2025, 5, 31).unwrap());
        assert_eq!(config.era5.area.to_cds_area(), [90.0, 60.0, 20.0, 160.0]);
        assert!(config.era5.area.validate().is_ok());
        assert_eq!(config.era5.products.len(), 2);
        assert_eq!(config.modis.short_name, "MYD21A1D");
        assert_eq!(config.modis.date_range().unwrap().start(), NaiveDate::from_ymd_opt(2000, 2, 25).unwrap());
        assert_eq!(config.modis.year_bounds(), (2011, 2025));
        assert_eq!(config.download.max_concurrent, 1);
        assert_eq!(config.download.max_retries, 0);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
era5:
  start_date: 1991-01-01
  end_date: 1991-01-31
  area: { north: 60, west: 120, south: 20, east: 160 }
  output_dir: /data/ERA5
  products: [single_levels]
  format: netcdf

modis:
  short_name: MOD21A2
  start_date: 2000-02-25
  end_date: 2025-05-31
  years: { first: 2011, last: 2025 }
  area: { north: 29, west: 92, south: -12, east: 142 }
  output_dir: /data/MODIS

download:
  max_concurrent: 4
  max_retries: 3
  overwrite: true
"#;

        let config: DownloaderConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.era5.date_range().unwrap().num_days(), 31);
        assert_eq!(config.era5.products, vec![Era5Product::SingleLevels]);
        assert_eq!(config.era5.format, OutputFormat::Netcdf);
        assert_eq!(config.modis.year_bounds(), (2011, 2025));
        assert_eq!(config.modis.area.south, -12.0);
        assert_eq!(config.download.max_concurrent, 4);
        assert!(config.download.overwrite);
        // Unset fields keep their defaults
        assert_eq!(config.download.poll_interval_secs, 5);
        assert_eq!(config.earthdata.page_size, 2000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DownloaderConfig = serde_yaml::from_str("modis:\n  short_name: MOD09A1\n").unwrap();
        assert_eq!(config.modis.short_name, "MOD09A1");
        assert_eq!(config.modis.output_dir, "./MODIS");
        assert_eq!(config.era5.output_dir, "./ERA5");
    }

    #[test]
    fn test_unset_years_follow_date_range() {
        let yaml = "modis:\n  start_date: 2003-07-04\n  end_date: 2005-01-31\n  years: ~\n";
        let config: DownloaderConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.modis.years, None);
        assert_eq!(config.modis.year_bounds(), (2003, 2005));
    }

    #[test]
    fn test_inverted_dates_rejected() {
        let mut config = Era5Config::default();
        config.start_date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(config.date_range().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = DownloaderConfig::load_or_default(Path::new("/nonexistent/downloader.yaml")).unwrap();
        assert_eq!(config.era5.output_dir, "./ERA5");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloader.yaml");
        std::fs::write(&path, "era5:\n  output_dir: /tmp/era5\n").unwrap();

        let config = DownloaderConfig::load(&path).unwrap();
        assert_eq!(config.era5.layout().unwrap().root(), Path::new("/tmp/era5"));
    }

    #[test]
    fn test_expand_value_default() {
        let value = expand_value("${GEODATA_TEST_UNSET_VAR:-./fallback}").unwrap();
        assert_eq!(value, "./fallback");
    }
}
