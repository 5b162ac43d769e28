//! Geocoding core: rasters, coding strategies, checks and orthorectification

pub mod factory;
pub mod forward;
pub mod geo_checks;
pub mod geo_index;
pub mod geo_raster;
pub mod geo_utils;
pub mod geocoding;
pub mod inverse;
pub mod orthorectifier;
pub mod quad_tree;
pub(crate) mod sample_grid;

// Re-export main types
pub use factory::ComponentFactory;
pub use forward::{
    ForwardCoding, Interpolation, PixelForward, PixelInterpolatingForward,
    TiePointBilinearForward, TiePointSplineForward,
};
pub use geo_checks::{contains_antimeridian, find_pole_locations, run_geo_checks, GeoCheckResult};
pub use geo_index::PixelGeoIndexInverse;
pub use geo_raster::{GeoRaster, SubsetDef};
pub use geocoding::{ComponentGeoCoding, GeoCoding, GeoCodingConfig};
pub use inverse::{InverseCoding, TiePointInverse};
pub use orthorectifier::{
    ConstantPointing, CorrectionPolicy, Orthorectifier, OrthorectifierConfig, Pointing,
    PolarOrthorectifier, ViewDirection,
};
pub use quad_tree::PixelQuadTreeInverse;
