//! Elevation data and configuration input

pub mod config;
pub mod dem;

pub use config::ConfigReader;
#[cfg(feature = "gdal")]
pub use dem::DemReader;
pub use dem::{ConstantElevationModel, ElevationModel, GridElevationModel};
