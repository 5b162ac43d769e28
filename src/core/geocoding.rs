use crate::core::factory::{ComponentFactory, FWD_PIXEL_INTERPOLATING, INV_PIXEL_QUAD_TREE_INTERPOLATING};
use crate::core::forward::ForwardCoding;
use crate::core::geo_checks::{run_geo_checks, GeoCheckResult};
use crate::core::geo_raster::{GeoRaster, SubsetDef};
use crate::core::geo_utils::{normalize_lon, unwrap_lon};
use crate::core::inverse::InverseCoding;
use crate::types::{
    BoundingBox, GeoChecks, GeoError, GeoPos, GeoResult, GeographicCrs, ImageCrs, PixelPos,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Common query surface of everything that maps between pixels and geography
pub trait GeoCoding: Send + Sync {
    fn can_get_geo_pos(&self) -> bool;

    fn can_get_pixel_pos(&self) -> bool;

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoResult<GeoPos>;

    fn get_pixel_pos(&self, geo_pos: &GeoPos) -> GeoResult<PixelPos>;

    fn is_crossing_meridian_at_180(&self) -> GeoResult<bool>;
}

/// Strategy selection for a [`ComponentGeoCoding`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeoCodingConfig {
    pub forward_key: Option<String>,
    pub inverse_key: Option<String>,
    pub geo_checks: GeoChecks,
    /// Resolution used when the raster reader does not provide one
    pub raster_resolution_km: f64,
}

impl Default for GeoCodingConfig {
    fn default() -> Self {
        Self {
            forward_key: Some(FWD_PIXEL_INTERPOLATING.to_string()),
            inverse_key: Some(INV_PIXEL_QUAD_TREE_INTERPOLATING.to_string()),
            geo_checks: GeoChecks::Antimeridian,
            raster_resolution_km: 1.0,
        }
    }
}

/// Geocoding composed of an optional forward and an optional inverse coding
/// over one [`GeoRaster`]
///
/// `initialize` runs the geo checks and prepares both codings; it must
/// complete before any query. After that all queries are read-only and may
/// run concurrently.
#[derive(Debug)]
pub struct ComponentGeoCoding {
    geo_raster: GeoRaster,
    forward_coding: Option<Box<dyn ForwardCoding>>,
    inverse_coding: Option<Box<dyn InverseCoding>>,
    geo_checks: GeoChecks,
    geo_crs: GeographicCrs,
    image_crs: ImageCrs,
    check_result: Option<GeoCheckResult>,
    /// Keys the codings were looked up by, reused by `transfer`
    forward_lookup_key: Option<String>,
    inverse_lookup_key: Option<String>,
}

impl ComponentGeoCoding {
    pub fn new(
        geo_raster: GeoRaster,
        forward_coding: Option<Box<dyn ForwardCoding>>,
        inverse_coding: Option<Box<dyn InverseCoding>>,
        geo_checks: GeoChecks,
    ) -> Self {
        Self::with_geo_crs(
            geo_raster,
            forward_coding,
            inverse_coding,
            geo_checks,
            GeographicCrs::wgs84(),
        )
    }

    pub fn with_geo_crs(
        geo_raster: GeoRaster,
        forward_coding: Option<Box<dyn ForwardCoding>>,
        inverse_coding: Option<Box<dyn InverseCoding>>,
        geo_checks: GeoChecks,
        geo_crs: GeographicCrs,
    ) -> Self {
        let image_crs = ImageCrs::derived_from(
            &geo_crs,
            geo_raster.scene_width(),
            geo_raster.scene_height(),
        );
        Self {
            geo_raster,
            forward_coding,
            inverse_coding,
            geo_checks,
            geo_crs,
            image_crs,
            check_result: None,
            forward_lookup_key: None,
            inverse_lookup_key: None,
        }
    }

    /// Build a geocoding whose codings are looked up by key; `None` leaves the role empty
    pub fn from_keys(
        geo_raster: GeoRaster,
        forward_key: Option<&str>,
        inverse_key: Option<&str>,
        geo_checks: GeoChecks,
        factory: &ComponentFactory,
    ) -> GeoResult<Self> {
        let forward_coding = forward_key.map(|key| factory.get_forward(key)).transpose()?;
        let inverse_coding = inverse_key.map(|key| factory.get_inverse(key)).transpose()?;
        log::debug!(
            "Created geocoding: forward={:?}, inverse={:?}, checks={}",
            forward_key,
            inverse_key,
            geo_checks
        );
        let mut coding = Self::new(geo_raster, forward_coding, inverse_coding, geo_checks);
        coding.forward_lookup_key = forward_key.map(str::to_string);
        coding.inverse_lookup_key = inverse_key.map(str::to_string);
        Ok(coding)
    }

    /// Build from a config; a raster without a resolution takes the configured one
    pub fn from_config(
        geo_raster: GeoRaster,
        config: &GeoCodingConfig,
        factory: &ComponentFactory,
    ) -> GeoResult<Self> {
        let geo_raster = match geo_raster.raster_resolution_km() {
            Some(_) => geo_raster,
            None => geo_raster.with_resolution_km(config.raster_resolution_km)?,
        };
        Self::from_keys(
            geo_raster,
            config.forward_key.as_deref(),
            config.inverse_key.as_deref(),
            config.geo_checks,
            factory,
        )
    }

    /// Run the geo checks, then initialize the forward and the inverse coding
    ///
    /// On failure every coding is left uninitialized, so the call may be retried.
    pub fn initialize(&mut self) -> GeoResult<()> {
        if self.check_result.is_some() {
            return Err(GeoError::InvalidState(
                "Geocoding is already initialized".to_string(),
            ));
        }

        let checks = run_geo_checks(&self.geo_raster, self.geo_checks);
        if let Err(e) = self.initialize_codings(&checks) {
            log::warn!("Geocoding initialization failed, releasing codings: {}", e);
            if let Some(forward) = self.forward_coding.as_mut().filter(|f| f.is_initialized()) {
                forward.dispose();
            }
            if let Some(inverse) = self.inverse_coding.as_mut().filter(|i| i.is_initialized()) {
                inverse.dispose();
            }
            return Err(e);
        }

        log::info!(
            "Initialized geocoding on {}x{} scene (forward={}, inverse={})",
            self.geo_raster.scene_width(),
            self.geo_raster.scene_height(),
            self.forward_key().unwrap_or("none"),
            self.inverse_key().unwrap_or("none")
        );
        self.check_result = Some(checks);
        Ok(())
    }

    fn initialize_codings(&mut self, checks: &GeoCheckResult) -> GeoResult<()> {
        if let Some(forward) = self.forward_coding.as_mut() {
            forward.initialize(
                &self.geo_raster,
                checks.crosses_antimeridian,
                &checks.pole_locations,
            )?;
        }
        let interpolation = self.forward_coding.as_ref().map(|f| f.interpolation());
        if let Some(inverse) = self.inverse_coding.as_mut() {
            if let Some(interpolation) = interpolation {
                inverse.use_forward_interpolation(interpolation);
            }
            inverse.initialize(
                &self.geo_raster,
                checks.crosses_antimeridian,
                &checks.pole_locations,
            )?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.check_result.is_some()
    }

    fn ensure_initialized(&self) -> GeoResult<&GeoCheckResult> {
        self.check_result.as_ref().ok_or_else(|| {
            GeoError::InvalidState("Geocoding is not initialized".to_string())
        })
    }

    /// Release both codings; each is disposed at most once
    pub fn dispose(&mut self) {
        if let Some(mut forward) = self.forward_coding.take() {
            forward.dispose();
        }
        if let Some(mut inverse) = self.inverse_coding.take() {
            inverse.dispose();
        }
        self.check_result = None;
    }

    pub fn geo_raster(&self) -> &GeoRaster {
        &self.geo_raster
    }

    pub fn geo_checks(&self) -> GeoChecks {
        self.geo_checks
    }

    pub fn geo_crs(&self) -> &GeographicCrs {
        &self.geo_crs
    }

    pub fn image_crs(&self) -> &ImageCrs {
        &self.image_crs
    }

    pub fn forward_coding(&self) -> Option<&dyn ForwardCoding> {
        self.forward_coding.as_deref()
    }

    pub fn inverse_coding(&self) -> Option<&dyn InverseCoding> {
        self.inverse_coding.as_deref()
    }

    /// Key the forward coding was looked up by, else its own factory key
    pub fn forward_key(&self) -> Option<&str> {
        let coding = self.forward_coding.as_ref()?;
        Some(self.forward_lookup_key.as_deref().unwrap_or_else(|| coding.factory_key()))
    }

    pub fn inverse_key(&self) -> Option<&str> {
        let coding = self.inverse_coding.as_ref()?;
        Some(self.inverse_lookup_key.as_deref().unwrap_or_else(|| coding.factory_key()))
    }

    /// Pixel positions of the enclosed poles found at initialization
    pub fn pole_locations(&self) -> GeoResult<&[PixelPos]> {
        Ok(&self.ensure_initialized()?.pole_locations)
    }

    pub fn get_geo_positions(&self, pixel_positions: &[PixelPos]) -> GeoResult<Vec<GeoPos>> {
        self.ensure_initialized()?;
        let forward = match &self.forward_coding {
            Some(forward) => forward,
            None => return Ok(vec![GeoPos::invalid(); pixel_positions.len()]),
        };

        #[cfg(feature = "parallel")]
        let positions = pixel_positions.par_iter().map(|p| forward.get_geo_pos(p)).collect();

        #[cfg(not(feature = "parallel"))]
        let positions = pixel_positions.iter().map(|p| forward.get_geo_pos(p)).collect();

        Ok(positions)
    }

    pub fn get_pixel_positions(&self, geo_positions: &[GeoPos]) -> GeoResult<Vec<PixelPos>> {
        self.ensure_initialized()?;
        let inverse = match &self.inverse_coding {
            Some(inverse) => inverse,
            None => return Ok(vec![PixelPos::invalid(); geo_positions.len()]),
        };

        #[cfg(feature = "parallel")]
        let positions = geo_positions.par_iter().map(|g| inverse.get_pixel_pos(g)).collect();

        #[cfg(not(feature = "parallel"))]
        let positions = geo_positions.iter().map(|g| inverse.get_pixel_pos(g)).collect();

        Ok(positions)
    }

    /// Geographic extent of the raster samples
    pub fn bounding_box(&self) -> GeoResult<BoundingBox> {
        let crosses = self.ensure_initialized()?.crosses_antimeridian;
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        let samples = self
            .geo_raster
            .longitudes()
            .iter()
            .zip(self.geo_raster.latitudes())
            .filter(|(lon, lat)| !lon.is_nan() && !lat.is_nan());
        for (&lon, &lat) in samples {
            let lon = unwrap_lon(lon, crosses);
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
        }
        if bbox.min_lat > bbox.max_lat {
            return Err(GeoError::Processing(
                "Raster holds no valid geographic samples".to_string(),
            ));
        }
        if crosses {
            bbox.min_lon = normalize_lon(bbox.min_lon);
            bbox.max_lon = normalize_lon(bbox.max_lon);
        }
        Ok(bbox)
    }

    /// Build an independent, initialized geocoding for a subset of the scene
    /// using the same coding keys, geo checks and geographic CRS
    pub fn transfer(&self, subset_def: &SubsetDef, factory: &ComponentFactory) -> GeoResult<ComponentGeoCoding> {
        let raster = self.geo_raster.subset(subset_def)?;
        let forward_key = self.forward_key().map(str::to_string);
        let inverse_key = self.inverse_key().map(str::to_string);
        let forward_coding = forward_key.as_deref().map(|key| factory.get_forward(key)).transpose()?;
        let inverse_coding = inverse_key.as_deref().map(|key| factory.get_inverse(key)).transpose()?;
        log::debug!(
            "Transferring geocoding to {}x{} subset",
            raster.scene_width(),
            raster.scene_height()
        );
        let mut transferred = ComponentGeoCoding::with_geo_crs(
            raster,
            forward_coding,
            inverse_coding,
            self.geo_checks,
            self.geo_crs.clone(),
        );
        transferred.forward_lookup_key = forward_key;
        transferred.inverse_lookup_key = inverse_key;
        transferred.initialize()?;
        Ok(transferred)
    }
}

impl GeoCoding for ComponentGeoCoding {
    fn can_get_geo_pos(&self) -> bool {
        self.check_result.is_some()
            && self
                .forward_coding
                .as_ref()
                .map_or(false, |forward| forward.is_initialized())
    }

    fn can_get_pixel_pos(&self) -> bool {
        self.check_result.is_some()
            && self
                .inverse_coding
                .as_ref()
                .map_or(false, |inverse| inverse.is_initialized())
    }

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoResult<GeoPos> {
        self.ensure_initialized()?;
        Ok(self
            .forward_coding
            .as_ref()
            .map_or_else(GeoPos::invalid, |forward| forward.get_geo_pos(pixel_pos)))
    }

    fn get_pixel_pos(&self, geo_pos: &GeoPos) -> GeoResult<PixelPos> {
        self.ensure_initialized()?;
        Ok(self
            .inverse_coding
            .as_ref()
            .map_or_else(PixelPos::invalid, |inverse| inverse.get_pixel_pos(geo_pos)))
    }

    fn is_crossing_meridian_at_180(&self) -> GeoResult<bool> {
        Ok(self.ensure_initialized()?.crosses_antimeridian)
    }
}
