//! Area-of-interest bounding box.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A fixed geographic rectangle used to clip requested data.
///
/// Coordinates are decimal degrees in EPSG:4326. Longitudes may use either the
/// -180..180 or the 0..360 convention, the archives accept both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaOfInterest {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl AreaOfInterest {
    /// Create an area from its edges, in CDS order (north, west, south, east).
    pub fn new(north: f64, west: f64, south: f64, east: f64) -> Self {
        Self {
            north,
            west,
            south,
            east,
        }
    }

    /// Parse "north,west,south,east".
    pub fn from_nwse_string(s: &str) -> Result<Self, AreaParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(AreaParseError::InvalidFormat(s.to_string()));
        }

        let parse = |p: &str| -> Result<f64, AreaParseError> {
            p.parse()
                .map_err(|_| AreaParseError::InvalidNumber(p.to_string()))
        };

        let area = Self::new(
            parse(parts[0])?,
            parse(parts[1])?,
            parse(parts[2])?,
            parse(parts[3])?,
        );
        area.validate()?;
        Ok(area)
    }

    /// Check coordinate ranges and that south is not above north.
    ///
    /// `west > east` is allowed: both archives read it as a box crossing the
    /// antimeridian.
    pub fn validate(&self) -> Result<(), AreaParseError> {
        for lat in [self.north, self.south] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(AreaParseError::LatitudeOutOfRange(lat));
            }
        }
        for lon in [self.west, self.east] {
            if !(-180.0..=360.0).contains(&lon) {
                return Err(AreaParseError::LongitudeOutOfRange(lon));
            }
        }
        if self.south > self.north {
            return Err(AreaParseError::Inverted {
                south: self.south,
                north: self.north,
            });
        }
        Ok(())
    }

    /// The `area` keyword of a CDS request: `[N, W, S, E]`.
    pub fn to_cds_area(&self) -> [f64; 4] {
        [self.north, self.west, self.south, self.east]
    }

    /// The `bounding_box` parameter of a CMR search: "W,S,E,N".
    pub fn to_cmr_bounding_box(&self) -> String {
        format!("{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl FromStr for AreaOfInterest {
    type Err = AreaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_nwse_string(s)
    }
}

impl fmt::Display for AreaOfInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N{} W{} S{} E{}",
            self.north, self.west, self.south, self.east
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AreaParseError {
    #[error("Invalid area format: {0}. Expected 'north,west,south,east'")]
    InvalidFormat(String),

    #[error("Invalid number in area: {0}")]
    InvalidNumber(String),

    #[error("Latitude out of range: {0}")]
    LatitudeOutOfRange(f64),

    #[error("Longitude out of range: {0}")]
    LongitudeOutOfRange(f64),

    #[error("South edge {south} is above north edge {north}")]
    Inverted { south: f64, north: f64 },
}
