use serde::{Deserialize, Serialize};

/// Geographic position in decimal degrees (WGS-84 unless stated otherwise)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Sentinel returned when no geographic position could be derived
    pub fn invalid() -> Self {
        Self {
            lat: f64::NAN,
            lon: f64::NAN,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.lat.is_nan() && !self.lon.is_nan()
    }
}

impl std::fmt::Display for GeoPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "(lat={:.6}, lon={:.6})", self.lat, self.lon)
        } else {
            write!(f, "(invalid geo position)")
        }
    }
}

/// Image position in scene pixel coordinates; (0.5, 0.5) is the center of the first pixel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPos {
    pub x: f64,
    pub y: f64,
}

impl PixelPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Sentinel returned when an inverse search finds no match
    pub fn invalid() -> Self {
        Self {
            x: f64::NAN,
            y: f64::NAN,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.x.is_nan() && !self.y.is_nan()
    }

    pub fn distance_sq(&self, other: &PixelPos) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

impl std::fmt::Display for PixelPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "(x={:.4}, y={:.4})", self.x, self.y)
        } else {
            write!(f, "(invalid pixel position)")
        }
    }
}

/// Geospatial bounding box
///
/// When the area crosses the anti-meridian `min_lon > max_lon`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon > self.max_lon
    }
}

/// Affine geo-transform of a regular grid (GDAL coefficient order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        Self {
            top_left_x: coefficients[0],
            pixel_width: coefficients[1],
            rotation_x: coefficients[2],
            top_left_y: coefficients[3],
            rotation_y: coefficients[4],
            pixel_height: coefficients[5],
        }
    }

    /// Fractional (column, row) of a map coordinate, rotation terms included
    pub fn to_grid(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((col, row))
    }
}

/// Boundary conditions checked when a geocoding is initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeoChecks {
    /// Skip all checks; the caller guarantees a well-behaved raster
    None,
    /// Detect crossings of the 180° meridian
    #[default]
    Antimeridian,
    /// Detect anti-meridian crossings and included poles
    Poles,
}

impl std::fmt::Display for GeoChecks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoChecks::None => write!(f, "NONE"),
            GeoChecks::Antimeridian => write!(f, "ANTIMERIDIAN"),
            GeoChecks::Poles => write!(f, "POLES"),
        }
    }
}

impl std::str::FromStr for GeoChecks {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NONE" => Ok(GeoChecks::None),
            "ANTIMERIDIAN" => Ok(GeoChecks::Antimeridian),
            "POLES" => Ok(GeoChecks::Poles),
            other => Err(GeoError::Configuration(format!(
                "Invalid geo checks '{}', expected NONE, ANTIMERIDIAN or POLES",
                other
            ))),
        }
    }
}

/// Geographic coordinate reference system (ellipsoid + identifier)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographicCrs {
    pub name: String,
    pub epsg: u32,
    /// Semi-major axis in meters
    pub semi_major: f64,
    pub inverse_flattening: f64,
}

impl GeographicCrs {
    pub fn wgs84() -> Self {
        Self {
            name: "WGS84".to_string(),
            epsg: 4326,
            semi_major: 6_378_137.0,
            inverse_flattening: 298.257_223_563,
        }
    }
}

impl Default for GeographicCrs {
    fn default() -> Self {
        Self::wgs84()
    }
}

/// Image coordinate reference system derived from a geographic base CRS
/// through the pixel/geo transform of a geocoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCrs {
    pub name: String,
    pub base: GeographicCrs,
    pub width: usize,
    pub height: usize,
}

impl ImageCrs {
    pub fn derived_from(base: &GeographicCrs, width: usize, height: usize) -> Self {
        Self {
            name: format!("Image CS based on {}", base.name),
            base: base.clone(),
            width,
            height,
        }
    }
}

/// Error types for geocoding
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster: {0}")]
    InvalidRaster(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for geocoding operations
pub type GeoResult<T> = Result<T, GeoError>;
