//! ERA5 hourly reanalysis requests.
//!
//! One request per (day, level type). The variable, pressure-level and hour
//! lists are the fixed sets fetched by the reference ERA5 job.

use chrono::NaiveDate;
use fetch_common::{AreaOfInterest, DateRange, DownloadRequest, OutputFormat, OutputLayout, TemporalSelector};
use serde::{Deserialize, Serialize};

/// File name prefix of every ERA5 output.
pub const FILE_PREFIX: &str = "e5";

pub const PRESSURE_LEVEL_VARIABLES: [&str; 6] = [
    "geopotential",
    "relative_humidity",
    "specific_humidity",
    "temperature",
    "u_component_of_wind",
    "v_component_of_wind",
];

pub const SINGLE_LEVEL_VARIABLES: [&str; 19] = [
    "10m_u_component_of_wind",
    "10m_v_component_of_wind",
    "2m_dewpoint_temperature",
    "2m_temperature",
    "land_sea_mask",
    "mean_sea_level_pressure",
    "sea_ice_cover",
    "sea_surface_temperature",
    "skin_temperature",
    "snow_depth",
    "soil_temperature_level_1",
    "soil_temperature_level_2",
    "soil_temperature_level_3",
    "soil_temperature_level_4",
    "surface_pressure",
    "volumetric_soil_water_layer_1",
    "volumetric_soil_water_layer_2",
    "volumetric_soil_water_layer_3",
    "volumetric_soil_water_layer_4",
];

/// Pressure levels in hPa, top of atmosphere first.
pub const PRESSURE_LEVELS: [&str; 37] = [
    "1", "2", "3", "5", "7", //
    "10", "20", "30", "50", "70", //
    "100", "125", "150", "175", "200", //
    "225", "250", "300", "350", "400", //
    "450", "500", "550", "600", "650", //
    "700", "750", "775", "800", "825", //
    "850", "875", "900", "925", "950", //
    "975", "1000",
];

pub const HOURS: [&str; 24] = [
    "00:00", "01:00", "02:00", "03:00", "04:00", "05:00", //
    "06:00", "07:00", "08:00", "09:00", "10:00", "11:00", //
    "12:00", "13:00", "14:00", "15:00", "16:00", "17:00", //
    "18:00", "19:00", "20:00", "21:00", "22:00", "23:00",
];

/// ERA5 level type, one CDS dataset each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Era5Product {
    PressureLevels,
    SingleLevels,
}

impl Era5Product {
    /// CDS dataset identifier.
    pub fn dataset(&self) -> &'static str {
        match self {
            Era5Product::PressureLevels => "reanalysis-era5-pressure-levels",
            Era5Product::SingleLevels => "reanalysis-era5-single-levels",
        }
    }

    /// Category code used in output file names.
    pub fn code(&self) -> &'static str {
        match self {
            Era5Product::PressureLevels => "pl",
            Era5Product::SingleLevels => "sl",
        }
    }

    pub fn variables(&self) -> &'static [&'static str] {
        match self {
            Era5Product::PressureLevels => &PRESSURE_LEVEL_VARIABLES,
            Era5Product::SingleLevels => &SINGLE_LEVEL_VARIABLES,
        }
    }

    pub fn levels(&self) -> &'static [&'static str] {
        match self {
            Era5Product::PressureLevels => &PRESSURE_LEVELS,
            Era5Product::SingleLevels => &[],
        }
    }
}

impl std::str::FromStr for Era5Product {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pl" | "pressure_levels" => Ok(Era5Product::PressureLevels),
            "sl" | "single_levels" => Ok(Era5Product::SingleLevels),
            other => Err(format!("unknown ERA5 product '{}', expected pl or sl", other)),
        }
    }
}

/// Output file for one product and day.
pub fn output_path(
    layout: &OutputLayout,
    product: Era5Product,
    date: NaiveDate,
    format: OutputFormat,
) -> std::path::PathBuf {
    let ext = format.extension().unwrap_or("grb");
    layout.daily_file(FILE_PREFIX, product.code(), date, ext)
}

/// Build the request for one product and day.
pub fn build_request(
    product: Era5Product,
    date: NaiveDate,
    area: AreaOfInterest,
    format: OutputFormat,
    layout: &OutputLayout,
) -> DownloadRequest {
    DownloadRequest {
        product: product.dataset().to_string(),
        variables: product.variables().iter().map(|v| v.to_string()).collect(),
        levels: product.levels().iter().map(|l| l.to_string()).collect(),
        times: HOURS.iter().map(|h| h.to_string()).collect(),
        temporal: TemporalSelector::Day(date),
        area,
        format,
        destination: output_path(layout, product, date, format),
    }
}

/// Every request of a run: each day in order, each product within the day.
pub fn requests<'a>(
    range: DateRange,
    products: &'a [Era5Product],
    area: AreaOfInterest,
    format: OutputFormat,
    layout: &'a OutputLayout,
) -> impl Iterator<Item = DownloadRequest> + 'a {
    range.days().flat_map(move |date| {
        products
            .iter()
            .map(move |product| build_request(*product, date, area, format, layout))
    })
}
