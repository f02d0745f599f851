//! Request builders for the supported products.

pub mod era5;
pub mod modis;
