use crate::types::{GeoError, GeoPos, GeoResult, GeoTransform};
use ndarray::Array2;

#[cfg(feature = "gdal")]
use gdal::Dataset;
#[cfg(feature = "gdal")]
use std::path::Path;

/// No-data value used when a DEM does not declare one
pub const DEFAULT_NO_DATA: f32 = -32768.0;

/// Source of terrain elevation by geographic position
///
/// A failure is reported as an error; callers decide whether to degrade.
/// Positions without coverage answer with [`no_data_value`](Self::no_data_value).
pub trait ElevationModel: Send + Sync {
    /// Elevation above the ellipsoid in meters
    fn elevation(&self, geo_pos: &GeoPos) -> GeoResult<f64>;

    fn no_data_value(&self) -> f64;
}

/// Regular lat/lon elevation grid sampled bilinearly
#[derive(Debug, Clone)]
pub struct GridElevationModel {
    dem: Array2<f32>,
    transform: GeoTransform,
    no_data: f32,
}

impl GridElevationModel {
    pub fn new(dem: Array2<f32>, transform: GeoTransform, no_data: f32) -> GeoResult<Self> {
        let (rows, cols) = dem.dim();
        if rows < 2 || cols < 2 {
            return Err(GeoError::InvalidRaster(format!(
                "DEM must have at least 2x2 posts, got {}x{}",
                cols, rows
            )));
        }
        if transform.to_grid(transform.top_left_x, transform.top_left_y).is_none() {
            return Err(GeoError::InvalidRaster(format!(
                "DEM geo-transform is singular: {:?}",
                transform
            )));
        }
        Ok(Self {
            dem,
            transform,
            no_data,
        })
    }

    pub fn dem(&self) -> &Array2<f32> {
        &self.dem
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }
}

impl ElevationModel for GridElevationModel {
    fn elevation(&self, geo_pos: &GeoPos) -> GeoResult<f64> {
        if !geo_pos.is_valid() {
            return Err(GeoError::Processing(format!(
                "Cannot sample elevation at {}",
                geo_pos
            )));
        }
        let no_data = self.no_data as f64;
        let (col, row) = match self.transform.to_grid(geo_pos.lon, geo_pos.lat) {
            Some(grid) => grid,
            None => return Ok(no_data),
        };

        let (rows, cols) = self.dem.dim();
        if col < 0.0 || row < 0.0 || col > (cols - 1) as f64 || row > (rows - 1) as f64 {
            return Ok(no_data);
        }

        let x1 = (col.floor() as usize).min(cols - 2);
        let y1 = (row.floor() as usize).min(rows - 2);
        let x2 = x1 + 1;
        let y2 = y1 + 1;

        let dx = col - x1 as f64;
        let dy = row - y1 as f64;

        let v11 = self.dem[[y1, x1]];
        let v12 = self.dem[[y2, x1]];
        let v21 = self.dem[[y1, x2]];
        let v22 = self.dem[[y2, x2]];

        if [v11, v12, v21, v22].iter().any(|&v| v == self.no_data || v.is_nan()) {
            return Ok(no_data);
        }

        let (v11, v12, v21, v22) = (v11 as f64, v12 as f64, v21 as f64, v22 as f64);
        Ok(v11 * (1.0 - dx) * (1.0 - dy) + v21 * dx * (1.0 - dy) + v12 * (1.0 - dx) * dy + v22 * dx * dy)
    }

    fn no_data_value(&self) -> f64 {
        self.no_data as f64
    }
}

/// Same elevation everywhere
#[derive(Debug, Clone, Copy)]
pub struct ConstantElevationModel {
    pub elevation: f64,
}

impl ConstantElevationModel {
    pub fn new(elevation: f64) -> Self {
        Self { elevation }
    }
}

impl ElevationModel for ConstantElevationModel {
    fn elevation(&self, _geo_pos: &GeoPos) -> GeoResult<f64> {
        Ok(self.elevation)
    }

    fn no_data_value(&self) -> f64 {
        DEFAULT_NO_DATA as f64
    }
}

/// Digital Elevation Model reader
#[cfg(feature = "gdal")]
pub struct DemReader;

#[cfg(feature = "gdal")]
impl DemReader {
    /// Load the first band of a GDAL raster in geographic coordinates
    pub fn read_dem<P: AsRef<Path>>(dem_path: P) -> GeoResult<GridElevationModel> {
        log::info!("Reading DEM from: {}", dem_path.as_ref().display());

        let dataset = Dataset::open(dem_path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("DEM size: {}x{}", width, height);
        log::debug!("DEM geotransform: {:?}", geo_transform);

        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband
            .no_data_value()
            .map(|v| v as f32)
            .unwrap_or(DEFAULT_NO_DATA);
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let dem_array = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| GeoError::Processing(format!("Failed to reshape DEM data: {}", e)))?;

        GridElevationModel::new(dem_array, GeoTransform::from_gdal(geo_transform), no_data)
    }
}
