//! Declarative download requests.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::bbox::AreaOfInterest;
use crate::time::DateRange;

/// Temporal selection of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalSelector {
    /// One calendar day.
    Day(NaiveDate),
    /// An inclusive span of days.
    Range(DateRange),
}

impl TemporalSelector {
    /// The selection as a date range.
    pub fn as_range(&self) -> DateRange {
        match self {
            TemporalSelector::Day(day) => DateRange::single(*day),
            TemporalSelector::Range(range) => *range,
        }
    }
}

impl fmt::Display for TemporalSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalSelector::Day(day) => write!(f, "{}", day),
            TemporalSelector::Range(range) => write!(f, "{}", range),
        }
    }
}

/// Format of the data written to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Grib,
    Netcdf,
    /// Archive-native granule files written into a directory.
    Granules,
}

impl OutputFormat {
    /// File extension for single-file formats.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Grib => Some("grb"),
            OutputFormat::Netcdf => Some("nc"),
            OutputFormat::Granules => None,
        }
    }

    /// Value of the CDS `data_format` keyword.
    pub fn cds_name(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Grib => Some("grib"),
            OutputFormat::Netcdf => Some("netcdf"),
            OutputFormat::Granules => None,
        }
    }

    /// Whether the destination is a directory rather than a file.
    pub fn is_directory(&self) -> bool {
        matches!(self, OutputFormat::Granules)
    }
}

/// Everything needed to fetch one product for one temporal selection.
///
/// Built fresh for each iteration of a run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRequest {
    /// Dataset identifier (CDS dataset name or CMR short name).
    pub product: String,
    pub variables: Vec<String>,
    /// Pressure levels in hPa, empty when the product has none.
    pub levels: Vec<String>,
    /// Hours of day as "HH:MM", empty when the archive does not take them.
    pub times: Vec<String>,
    pub temporal: TemporalSelector,
    pub area: AreaOfInterest,
    pub format: OutputFormat,
    /// File (single-file formats) or directory (granules) to write.
    pub destination: PathBuf,
}

impl DownloadRequest {
    /// Short label for log lines.
    pub fn label(&self) -> String {
        format!("{} {}", self.product, self.temporal)
    }
}
