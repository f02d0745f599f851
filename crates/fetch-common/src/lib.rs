//! Common types shared by the geodata-fetch download jobs.

pub mod bbox;
pub mod error;
pub mod paths;
pub mod request;
pub mod time;

pub use bbox::{AreaOfInterest, AreaParseError};
pub use error::{RetrievalError, RetrievalResult};
pub use paths::OutputLayout;
pub use request::{DownloadRequest, OutputFormat, TemporalSelector};
pub use time::{DailySteps, DateRange, Step, TimeParseError, Windows, YearlyWindows};
