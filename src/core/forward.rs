//! Pixel -> geographic coordinate strategies

use crate::core::factory::{
    FWD_PIXEL, FWD_PIXEL_INTERPOLATING, FWD_TIE_POINT_BILINEAR, FWD_TIE_POINT_SPLINE,
};
use crate::core::geo_raster::GeoRaster;
use crate::core::sample_grid::SampleGrid;
use crate::types::{GeoError, GeoPos, GeoResult, PixelPos};

/// Interpolation kernel a forward coding applies between samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Spline,
}

/// Converts scene pixel positions into geographic positions
///
/// Implementations are initialized exactly once against a [`GeoRaster`].
/// Queries before initialization or outside the scene return
/// [`GeoPos::invalid`]. Queries take `&self` and are safe to run
/// concurrently once `initialize` has returned. Calling `get_geo_pos` after
/// `dispose` is a precondition violation; the built-in codings answer with an
/// invalid position.
pub trait ForwardCoding: Send + Sync + std::fmt::Debug {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        pole_locations: &[PixelPos],
    ) -> GeoResult<()>;

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoPos;

    fn interpolation(&self) -> Interpolation {
        Interpolation::Bilinear
    }

    fn dispose(&mut self);

    /// Key under which the coding is registered in the component factory
    fn factory_key(&self) -> &str;

    fn is_initialized(&self) -> bool;
}

fn init_grid(
    slot: &mut Option<SampleGrid>,
    key: &str,
    geo_raster: &GeoRaster,
    crosses_antimeridian: bool,
) -> GeoResult<()> {
    if slot.is_some() {
        return Err(GeoError::InvalidState(format!(
            "Forward coding '{}' is already initialized",
            key
        )));
    }
    log::debug!(
        "Initializing forward coding '{}' on {}x{} raster (scene {}x{}, antimeridian={})",
        key,
        geo_raster.raster_width(),
        geo_raster.raster_height(),
        geo_raster.scene_width(),
        geo_raster.scene_height(),
        crosses_antimeridian
    );
    *slot = Some(SampleGrid::new(geo_raster, crosses_antimeridian));
    Ok(())
}

/// Returns the grid and fractional grid coordinates when the query is answerable
fn locate<'a>(grid: &'a Option<SampleGrid>, pixel_pos: &PixelPos) -> Option<(&'a SampleGrid, f64, f64)> {
    let grid = grid.as_ref()?;
    if !grid.contains_pixel(pixel_pos) {
        return None;
    }
    let (fx, fy) = grid.grid_coords(pixel_pos);
    Some((grid, fx, fy))
}

/// Nearest-sample lookup without interpolation
#[derive(Debug, Default)]
pub struct PixelForward {
    grid: Option<SampleGrid>,
}

impl PixelForward {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForwardCoding for PixelForward {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        _pole_locations: &[PixelPos],
    ) -> GeoResult<()> {
        init_grid(&mut self.grid, FWD_PIXEL, geo_raster, crosses_antimeridian)
    }

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoPos {
        match locate(&self.grid, pixel_pos) {
            Some((grid, fx, fy)) => grid.nearest(fx, fy),
            None => GeoPos::invalid(),
        }
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Nearest
    }

    fn dispose(&mut self) {
        self.grid = None;
    }

    fn factory_key(&self) -> &str {
        FWD_PIXEL
    }

    fn is_initialized(&self) -> bool {
        self.grid.is_some()
    }
}

/// Per-pixel raster with bilinear interpolation between the four surrounding samples
#[derive(Debug, Default)]
pub struct PixelInterpolatingForward {
    grid: Option<SampleGrid>,
}

impl PixelInterpolatingForward {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForwardCoding for PixelInterpolatingForward {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        _pole_locations: &[PixelPos],
    ) -> GeoResult<()> {
        init_grid(&mut self.grid, FWD_PIXEL_INTERPOLATING, geo_raster, crosses_antimeridian)
    }

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoPos {
        match locate(&self.grid, pixel_pos) {
            Some((grid, fx, fy)) => grid.interpolate_bilinear(fx, fy),
            None => GeoPos::invalid(),
        }
    }

    fn dispose(&mut self) {
        self.grid = None;
    }

    fn factory_key(&self) -> &str {
        FWD_PIXEL_INTERPOLATING
    }

    fn is_initialized(&self) -> bool {
        self.grid.is_some()
    }
}

/// Tie-point grid, bilinear across the enclosing 2x2 tie points
#[derive(Debug, Default)]
pub struct TiePointBilinearForward {
    grid: Option<SampleGrid>,
}

impl TiePointBilinearForward {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForwardCoding for TiePointBilinearForward {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        _pole_locations: &[PixelPos],
    ) -> GeoResult<()> {
        init_grid(&mut self.grid, FWD_TIE_POINT_BILINEAR, geo_raster, crosses_antimeridian)
    }

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoPos {
        match locate(&self.grid, pixel_pos) {
            Some((grid, fx, fy)) => grid.interpolate_bilinear(fx, fy),
            None => GeoPos::invalid(),
        }
    }

    fn dispose(&mut self) {
        self.grid = None;
    }

    fn factory_key(&self) -> &str {
        FWD_TIE_POINT_BILINEAR
    }

    fn is_initialized(&self) -> bool {
        self.grid.is_some()
    }
}

/// Tie-point grid, cubic spline across the 4x4 neighbourhood
#[derive(Debug, Default)]
pub struct TiePointSplineForward {
    grid: Option<SampleGrid>,
}

impl TiePointSplineForward {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForwardCoding for TiePointSplineForward {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        _pole_locations: &[PixelPos],
    ) -> GeoResult<()> {
        init_grid(&mut self.grid, FWD_TIE_POINT_SPLINE, geo_raster, crosses_antimeridian)
    }

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoPos {
        match locate(&self.grid, pixel_pos) {
            Some((grid, fx, fy)) => grid.interpolate_spline(fx, fy),
            None => GeoPos::invalid(),
        }
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Spline
    }

    fn dispose(&mut self) {
        self.grid = None;
    }

    fn factory_key(&self) -> &str {
        FWD_TIE_POINT_SPLINE
    }

    fn is_initialized(&self) -> bool {
        self.grid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn scene_raster(lon_start: f64) -> GeoRaster {
        let (w, h) = (10, 8);
        let mut lons = Vec::new();
        let mut lats = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let lon = lon_start + x as f64 - 0.4 * y as f64;
                lons.push(if lon >= 180.0 { lon - 360.0 } else { lon });
                lats.push(50.0 - y as f64 - 0.4 * x as f64);
            }
        }
        GeoRaster::new(lons, lats, w, h, 100.0).unwrap()
    }

    #[test]
    fn test_query_before_initialize_is_invalid() {
        let coding = PixelInterpolatingForward::new();
        assert!(!coding.is_initialized());
        assert!(!coding.get_geo_pos(&PixelPos::new(1.5, 1.5)).is_valid());
    }

    #[test]
    fn test_double_initialize_fails() {
        let raster = scene_raster(10.0);
        let mut coding = PixelForward::new();
        coding.initialize(&raster, false, &[]).unwrap();
        let second = coding.initialize(&raster, false, &[]);
        assert!(matches!(second, Err(GeoError::InvalidState(_))));
    }

    #[test]
    fn test_pixel_forward_nearest_sample() {
        let raster = scene_raster(10.0);
        let mut coding = PixelForward::new();
        coding.initialize(&raster, false, &[]).unwrap();

        let g = coding.get_geo_pos(&PixelPos::new(3.9, 2.1));
        assert_abs_diff_eq!(g.lon, 10.0 + 3.0 - 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(g.lat, 50.0 - 2.0 - 1.2, epsilon = 1e-12);

        assert!(!coding.get_geo_pos(&PixelPos::new(-0.1, 2.0)).is_valid());
        assert!(!coding.get_geo_pos(&PixelPos::new(2.0, 8.5)).is_valid());
        assert!(!coding.get_geo_pos(&PixelPos::invalid()).is_valid());
    }

    #[test]
    fn test_pixel_interpolating_forward_between_samples() {
        let raster = scene_raster(10.0);
        let mut coding = PixelInterpolatingForward::new();
        coding.initialize(&raster, false, &[]).unwrap();

        let g = coding.get_geo_pos(&PixelPos::new(4.0, 3.0));
        // halfway between samples 3 and 4 in x, 2 and 3 in y
        assert_abs_diff_eq!(g.lon, 10.0 + 3.5 - 0.4 * 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(g.lat, 50.0 - 2.5 - 0.4 * 3.5, epsilon = 1e-12);
    }

    #[test]
    fn test_interpolation_across_antimeridian_wraps() {
        let raster = scene_raster(175.0);
        let mut coding = PixelInterpolatingForward::new();
        coding.initialize(&raster, true, &[]).unwrap();

        // sample x=4 is 179.0, sample x=5 is -180.0 (180.0) on row 0
        let g = coding.get_geo_pos(&PixelPos::new(5.0, 0.5));
        assert_abs_diff_eq!(g.lon, 179.5, epsilon = 1e-9);

        let g = coding.get_geo_pos(&PixelPos::new(6.0, 0.5));
        assert_abs_diff_eq!(g.lon, -179.5, epsilon = 1e-9);
        assert!(g.lon >= -180.0 && g.lon < 180.0);
    }

    #[test]
    fn test_tie_point_bilinear_mapping() {
        let lons: Vec<f64> = (0..9).map(|i| (i % 3) as f64 * 10.0).collect();
        let lats: Vec<f64> = (0..9).map(|i| (i / 3) as f64 * -10.0).collect();
        let raster =
            GeoRaster::with_scene(lons, lats, 3, 3, 21, 21, 50.0, (0.5, 0.5), (10.0, 10.0)).unwrap();
        let mut coding = TiePointBilinearForward::new();
        coding.initialize(&raster, false, &[]).unwrap();

        let g = coding.get_geo_pos(&PixelPos::new(5.5, 15.5));
        assert_abs_diff_eq!(g.lon, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.lat, -15.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dispose_releases_state() {
        let raster = scene_raster(10.0);
        let mut coding = TiePointSplineForward::new();
        coding.initialize(&raster, false, &[]).unwrap();
        assert!(coding.is_initialized());
        coding.dispose();
        assert!(!coding.is_initialized());
        assert_eq!(coding.factory_key(), FWD_TIE_POINT_SPLINE);
    }
}
