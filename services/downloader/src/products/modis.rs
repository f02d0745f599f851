//! MODIS granule requests, one per calendar year of the run.

use std::path::PathBuf;

use chrono::Datelike;
use fetch_common::{AreaOfInterest, DateRange, DownloadRequest, OutputFormat, OutputLayout, TemporalSelector};

/// Directory receiving the granules of one year window.
pub fn output_dir(layout: &OutputLayout, short_name: &str, window: &DateRange) -> PathBuf {
    layout.yearly_dir(short_name, window.start().year())
}

/// Build the granule search/download request for one year window.
pub fn build_request(
    short_name: &str,
    window: DateRange,
    area: AreaOfInterest,
    layout: &OutputLayout,
) -> DownloadRequest {
    DownloadRequest {
        product: short_name.to_string(),
        variables: Vec::new(),
        levels: Vec::new(),
        times: Vec::new(),
        temporal: TemporalSelector::Range(window),
        area,
        format: OutputFormat::Granules,
        destination: output_dir(layout, short_name, &window),
    }
}

/// One request per year in `first_year..=last_year` overlapping `bounds`.
pub fn requests<'a>(
    short_name: &'a str,
    bounds: DateRange,
    first_year: i32,
    last_year: i32,
    area: AreaOfInterest,
    layout: &'a OutputLayout,
) -> impl Iterator<Item = DownloadRequest> + 'a {
    bounds
        .years(first_year, last_year)
        .map(move |window| build_request(short_name, window, area, layout))
}
