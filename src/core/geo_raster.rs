use crate::types::{GeoError, GeoResult, PixelPos};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longitude/latitude sample grid describing the geolocation of a scene
///
/// The coordinate arrays are shared (`Arc`) so that codings can keep a
/// handle on them without copying. A raster is immutable once built.
#[derive(Debug, Clone)]
pub struct GeoRaster {
    longitudes: Arc<[f64]>,
    latitudes: Arc<[f64]>,
    lon_variable_name: Option<String>,
    lat_variable_name: Option<String>,
    raster_width: usize,
    raster_height: usize,
    scene_width: usize,
    scene_height: usize,
    /// `None` until a resolution is known (see [`GeoRaster::without_resolution`])
    raster_resolution_km: Option<f64>,
    offset_x: f64,
    offset_y: f64,
    subsampling_x: f64,
    subsampling_y: f64,
}

/// Spatial and resolution subset of a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetDef {
    /// Region in scene pixels as (x, y, width, height); `None` keeps the full scene
    pub region: Option<(usize, usize, usize, usize)>,
    pub sub_sampling_x: usize,
    pub sub_sampling_y: usize,
}

impl Default for SubsetDef {
    fn default() -> Self {
        Self {
            region: None,
            sub_sampling_x: 1,
            sub_sampling_y: 1,
        }
    }
}

impl SubsetDef {
    pub fn with_region(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            region: Some((x, y, width, height)),
            ..Self::default()
        }
    }

    pub fn with_sub_sampling(sub_sampling_x: usize, sub_sampling_y: usize) -> Self {
        Self {
            region: None,
            sub_sampling_x,
            sub_sampling_y,
        }
    }
}

impl GeoRaster {
    /// Create a per-pixel raster: raster and scene dimensions coincide,
    /// offsets are 0.5 (pixel centers) and subsampling is 1
    pub fn new(
        longitudes: Vec<f64>,
        latitudes: Vec<f64>,
        raster_width: usize,
        raster_height: usize,
        raster_resolution_km: f64,
    ) -> GeoResult<Self> {
        Self::with_scene(
            longitudes,
            latitudes,
            raster_width,
            raster_height,
            raster_width,
            raster_height,
            raster_resolution_km,
            (0.5, 0.5),
            (1.0, 1.0),
        )
    }

    /// Create a raster that is a (possibly coarser) tie-point grid over a denser scene
    #[allow(clippy::too_many_arguments)]
    pub fn with_scene(
        longitudes: Vec<f64>,
        latitudes: Vec<f64>,
        raster_width: usize,
        raster_height: usize,
        scene_width: usize,
        scene_height: usize,
        raster_resolution_km: f64,
        offset: (f64, f64),
        subsampling: (f64, f64),
    ) -> GeoResult<Self> {
        let raster = Self {
            longitudes: longitudes.into(),
            latitudes: latitudes.into(),
            lon_variable_name: None,
            lat_variable_name: None,
            raster_width,
            raster_height,
            scene_width,
            scene_height,
            raster_resolution_km: Some(raster_resolution_km),
            offset_x: offset.0,
            offset_y: offset.1,
            subsampling_x: subsampling.0,
            subsampling_y: subsampling.1,
        };
        raster.validate()?;
        Ok(raster)
    }

    /// Build a per-pixel raster from (height, width) shaped coordinate arrays
    pub fn from_arrays(
        longitudes: &Array2<f64>,
        latitudes: &Array2<f64>,
        raster_resolution_km: f64,
    ) -> GeoResult<Self> {
        if longitudes.dim() != latitudes.dim() {
            return Err(GeoError::InvalidRaster(format!(
                "Longitude shape {:?} does not match latitude shape {:?}",
                longitudes.dim(),
                latitudes.dim()
            )));
        }
        let (height, width) = longitudes.dim();
        Self::new(
            longitudes.iter().copied().collect(),
            latitudes.iter().copied().collect(),
            width,
            height,
            raster_resolution_km,
        )
    }

    /// Per-pixel raster whose ground resolution is not known yet
    ///
    /// Index-based inverse codings need a resolution; supply one with
    /// [`with_resolution_km`](Self::with_resolution_km) or through
    /// [`GeoCodingConfig`](crate::core::GeoCodingConfig).
    pub fn without_resolution(
        longitudes: Vec<f64>,
        latitudes: Vec<f64>,
        raster_width: usize,
        raster_height: usize,
    ) -> GeoResult<Self> {
        let mut raster = Self::new(longitudes, latitudes, raster_width, raster_height, 1.0)?;
        raster.raster_resolution_km = None;
        Ok(raster)
    }

    pub fn with_resolution_km(mut self, raster_resolution_km: f64) -> GeoResult<Self> {
        self.raster_resolution_km = Some(raster_resolution_km);
        self.validate()?;
        Ok(self)
    }

    pub fn with_variable_names(mut self, lon_name: &str, lat_name: &str) -> Self {
        self.lon_variable_name = Some(lon_name.to_string());
        self.lat_variable_name = Some(lat_name.to_string());
        self
    }

    fn validate(&self) -> GeoResult<()> {
        if self.raster_width == 0 || self.raster_height == 0 {
            return Err(GeoError::InvalidRaster(format!(
                "Raster dimensions must be positive, got {}x{}",
                self.raster_width, self.raster_height
            )));
        }
        let expected = self.raster_width * self.raster_height;
        if self.longitudes.len() != expected || self.latitudes.len() != expected {
            return Err(GeoError::InvalidRaster(format!(
                "Expected {} samples for a {}x{} raster, got {} longitudes and {} latitudes",
                expected,
                self.raster_width,
                self.raster_height,
                self.longitudes.len(),
                self.latitudes.len()
            )));
        }
        if self.scene_width < self.raster_width || self.scene_height < self.raster_height {
            return Err(GeoError::InvalidRaster(format!(
                "Scene {}x{} is smaller than raster {}x{}",
                self.scene_width, self.scene_height, self.raster_width, self.raster_height
            )));
        }
        if !(self.subsampling_x > 0.0) || !(self.subsampling_y > 0.0) {
            return Err(GeoError::InvalidRaster(format!(
                "Subsampling must be positive, got ({}, {})",
                self.subsampling_x, self.subsampling_y
            )));
        }
        if !self.offset_x.is_finite() || !self.offset_y.is_finite() {
            return Err(GeoError::InvalidRaster("Offsets must be finite".to_string()));
        }
        if let Some(km) = self.raster_resolution_km {
            if !(km > 0.0) {
                return Err(GeoError::InvalidRaster(format!(
                    "Raster resolution must be positive, got {} km",
                    km
                )));
            }
        }
        Ok(())
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub(crate) fn shared_longitudes(&self) -> Arc<[f64]> {
        Arc::clone(&self.longitudes)
    }

    pub(crate) fn shared_latitudes(&self) -> Arc<[f64]> {
        Arc::clone(&self.latitudes)
    }

    pub fn lon_variable_name(&self) -> Option<&str> {
        self.lon_variable_name.as_deref()
    }

    pub fn lat_variable_name(&self) -> Option<&str> {
        self.lat_variable_name.as_deref()
    }

    pub fn raster_width(&self) -> usize {
        self.raster_width
    }

    pub fn raster_height(&self) -> usize {
        self.raster_height
    }

    pub fn scene_width(&self) -> usize {
        self.scene_width
    }

    pub fn scene_height(&self) -> usize {
        self.scene_height
    }

    pub fn raster_resolution_km(&self) -> Option<f64> {
        self.raster_resolution_km
    }

    pub(crate) fn require_resolution_km(&self) -> GeoResult<f64> {
        self.raster_resolution_km.ok_or_else(|| {
            GeoError::InvalidRaster("Raster resolution is required by this coding but unknown".to_string())
        })
    }

    pub fn offset_x(&self) -> f64 {
        self.offset_x
    }

    pub fn offset_y(&self) -> f64 {
        self.offset_y
    }

    pub fn subsampling_x(&self) -> f64 {
        self.subsampling_x
    }

    pub fn subsampling_y(&self) -> f64 {
        self.subsampling_y
    }

    /// True when every scene pixel has its own sample
    pub fn is_pixel_raster(&self) -> bool {
        self.raster_width == self.scene_width
            && self.raster_height == self.scene_height
            && self.subsampling_x == 1.0
            && self.subsampling_y == 1.0
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.raster_width + x
    }

    /// Scene pixel position of raster sample (x, y)
    #[inline]
    pub fn sample_pixel_pos(&self, x: f64, y: f64) -> PixelPos {
        PixelPos::new(
            self.offset_x + x * self.subsampling_x,
            self.offset_y + y * self.subsampling_y,
        )
    }

    /// Fractional raster grid coordinates of a scene pixel position
    #[inline]
    pub fn grid_coords(&self, pixel_pos: &PixelPos) -> (f64, f64) {
        (
            (pixel_pos.x - self.offset_x) / self.subsampling_x,
            (pixel_pos.y - self.offset_y) / self.subsampling_y,
        )
    }

    /// True when the pixel position lies inside the scene, borders included
    pub fn contains_pixel(&self, pixel_pos: &PixelPos) -> bool {
        pixel_pos.is_valid()
            && pixel_pos.x >= 0.0
            && pixel_pos.y >= 0.0
            && pixel_pos.x <= self.scene_width as f64
            && pixel_pos.y <= self.scene_height as f64
    }

    /// Create the raster describing a spatial and/or resolution subset of the scene
    pub fn subset(&self, subset_def: &SubsetDef) -> GeoResult<GeoRaster> {
        let ss_x = subset_def.sub_sampling_x;
        let ss_y = subset_def.sub_sampling_y;
        if ss_x == 0 || ss_y == 0 {
            return Err(GeoError::InvalidRaster(format!(
                "Subset sub-sampling must be >= 1, got ({}, {})",
                ss_x, ss_y
            )));
        }

        let (rx, ry, rw, rh) = match subset_def.region {
            Some((x, y, w, h)) => {
                let w = w.min(self.scene_width.saturating_sub(x));
                let h = h.min(self.scene_height.saturating_sub(y));
                (x, y, w, h)
            }
            None => (0, 0, self.scene_width, self.scene_height),
        };
        if rw == 0 || rh == 0 {
            return Err(GeoError::InvalidRaster(format!(
                "Subset region {:?} does not intersect the {}x{} scene",
                subset_def.region, self.scene_width, self.scene_height
            )));
        }

        let scene_width = (rw - 1) / ss_x + 1;
        let scene_height = (rh - 1) / ss_y + 1;
        let resolution = self.raster_resolution_km.map(|km| km * ss_x.max(ss_y) as f64);

        log::debug!(
            "Subsetting raster: region=({}, {}, {}, {}), sub-sampling=({}, {}), new scene {}x{}",
            rx, ry, rw, rh, ss_x, ss_y, scene_width, scene_height
        );

        let subset = if self.is_pixel_raster() {
            let mut lons = Vec::with_capacity(scene_width * scene_height);
            let mut lats = Vec::with_capacity(scene_width * scene_height);
            for j in 0..scene_height {
                for i in 0..scene_width {
                    let idx = self.index(rx + i * ss_x, ry + j * ss_y);
                    lons.push(self.longitudes[idx]);
                    lats.push(self.latitudes[idx]);
                }
            }
            GeoRaster::new(lons, lats, scene_width, scene_height, 1.0)?
        } else {
            let (i0, i1) = covering_range(
                rx as f64 + 0.5,
                (rx + rw) as f64 - 0.5,
                self.offset_x,
                self.subsampling_x,
                self.raster_width,
            );
            let (j0, j1) = covering_range(
                ry as f64 + 0.5,
                (ry + rh) as f64 - 0.5,
                self.offset_y,
                self.subsampling_y,
                self.raster_height,
            );
            // a subset coarser than the tie points keeps every step-th tie point
            let (x0, step_x, width) = thinned_axis(
                i0,
                i1,
                self.raster_width,
                (ss_x as f64 / self.subsampling_x).ceil() as usize,
                scene_width,
            );
            let (y0, step_y, height) = thinned_axis(
                j0,
                j1,
                self.raster_height,
                (ss_y as f64 / self.subsampling_y).ceil() as usize,
                scene_height,
            );
            let mut lons = Vec::with_capacity(width * height);
            let mut lats = Vec::with_capacity(width * height);
            for j in 0..height {
                for i in 0..width {
                    let idx = self.index(x0 + i * step_x, y0 + j * step_y);
                    lons.push(self.longitudes[idx]);
                    lats.push(self.latitudes[idx]);
                }
            }
            let offset_x =
                (self.offset_x + x0 as f64 * self.subsampling_x - rx as f64 - 0.5) / ss_x as f64 + 0.5;
            let offset_y =
                (self.offset_y + y0 as f64 * self.subsampling_y - ry as f64 - 0.5) / ss_y as f64 + 0.5;
            GeoRaster::with_scene(
                lons,
                lats,
                width,
                height,
                scene_width,
                scene_height,
                1.0,
                (offset_x, offset_y),
                (
                    self.subsampling_x * step_x as f64 / ss_x as f64,
                    self.subsampling_y * step_y as f64 / ss_y as f64,
                ),
            )?
        };

        Ok(GeoRaster {
            lon_variable_name: self.lon_variable_name.clone(),
            lat_variable_name: self.lat_variable_name.clone(),
            raster_resolution_km: resolution,
            ..subset
        })
    }
}

/// Inclusive range of grid indices whose cells cover the pixel interval [start, end]
fn covering_range(start: f64, end: f64, offset: f64, subsampling: f64, size: usize) -> (usize, usize) {
    let last = size as isize - 1;
    let lo = (((start - offset) / subsampling).floor() as isize).clamp(0, last);
    let mut hi = (((end - offset) / subsampling).ceil() as isize).clamp(0, last);
    if hi == lo && last > 0 {
        hi = (lo + 1).min(last);
        if hi == lo {
            return ((lo - 1) as usize, lo as usize);
        }
    }
    (lo as usize, hi as usize)
}

/// Regular selection of tie points along one axis covering [i0, i1]
///
/// Returns (first index, step, count). The step starts at `min_step` and
/// grows until the selection fits into `scene_len` scene pixels. When the
/// selection would run past the grid it is shifted back to end on the
/// last tie point.
fn thinned_axis(i0: usize, i1: usize, size: usize, min_step: usize, scene_len: usize) -> (usize, usize, usize) {
    let last = size - 1;
    if last == 0 || scene_len == 1 {
        return (i0, 1, 1);
    }
    let mut step = min_step.clamp(1, last);
    loop {
        let intervals = ((i1 - i0 + step - 1) / step).max(1).min(last / step);
        let start = if i0 + intervals * step > last {
            last - intervals * step
        } else {
            i0
        };
        let count = intervals + 1;
        if count <= scene_len || step >= last {
            return (start, step, count);
        }
        step += 1;
    }
}
