//! Terrain correction of geocoded positions from viewing geometry and elevation

use crate::core::geo_utils::{displace, EARTH_RADIUS};
use crate::core::geocoding::GeoCoding;
use crate::io::dem::ElevationModel;
use crate::types::{GeoError, GeoPos, GeoResult, PixelPos};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Damping factors tried in order by the prediction/correction loop
const DAMPING_FACTORS: [f64; 3] = [1.0, 0.5, 2.0];

/// Tolerance of the scene bounds check on the first guess, pixels
const BOUNDS_EPS: f64 = 1e-4;

/// Viewing direction at a pixel, degrees
///
/// `azimuth` points from the observed target towards the sensor,
/// clockwise from north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewDirection {
    pub zenith: f64,
    pub azimuth: f64,
}

impl ViewDirection {
    pub fn new(zenith: f64, azimuth: f64) -> Self {
        Self { zenith, azimuth }
    }
}

/// Viewing geometry of the sensor, per scene pixel
pub trait Pointing: Send + Sync {
    fn view_dir(&self, pixel_pos: &PixelPos) -> ViewDirection;

    /// Whether [`elevation`](Self::elevation) provides usable values
    fn can_get_elevation(&self) -> bool {
        false
    }

    /// Elevation of the pixel in meters, used when no elevation model is supplied
    fn elevation(&self, _pixel_pos: &PixelPos) -> f64 {
        0.0
    }
}

/// Same viewing direction for every pixel
#[derive(Debug, Clone, Copy)]
pub struct ConstantPointing {
    pub view_direction: ViewDirection,
    pub elevation: Option<f64>,
}

impl ConstantPointing {
    pub fn new(zenith: f64, azimuth: f64) -> Self {
        Self {
            view_direction: ViewDirection::new(zenith, azimuth),
            elevation: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }
}

impl Pointing for ConstantPointing {
    fn view_dir(&self, _pixel_pos: &PixelPos) -> ViewDirection {
        self.view_direction
    }

    fn can_get_elevation(&self) -> bool {
        self.elevation.is_some()
    }

    fn elevation(&self, _pixel_pos: &PixelPos) -> f64 {
        self.elevation.unwrap_or(0.0)
    }
}

/// Decides whether a first guess is refined at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum CorrectionPolicy {
    #[default]
    Always,
    /// Refine only when the expected relief displacement exceeds the distance in meters
    DistanceThreshold(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrthorectifierConfig {
    pub max_iteration_count: usize,
    pub pixel_epsilon: f64,
    /// When set, selects [`CorrectionPolicy::DistanceThreshold`]
    pub correction_threshold_meters: Option<f64>,
}

impl Default for OrthorectifierConfig {
    fn default() -> Self {
        Self {
            max_iteration_count: 30,
            pixel_epsilon: 0.1,
            correction_threshold_meters: None,
        }
    }
}

impl OrthorectifierConfig {
    pub fn correction_policy(&self) -> CorrectionPolicy {
        match self.correction_threshold_meters {
            Some(meters) => CorrectionPolicy::DistanceThreshold(meters),
            None => CorrectionPolicy::Always,
        }
    }

    pub fn validate(&self) -> GeoResult<()> {
        if self.max_iteration_count <= 1 {
            return Err(GeoError::Configuration(format!(
                "Maximum iteration count must be greater than 1, got {}",
                self.max_iteration_count
            )));
        }
        if !(self.pixel_epsilon > 0.0) {
            return Err(GeoError::Configuration(format!(
                "Pixel epsilon must be positive, got {}",
                self.pixel_epsilon
            )));
        }
        if let Some(meters) = self.correction_threshold_meters {
            if !(meters >= 0.0) {
                return Err(GeoError::Configuration(format!(
                    "Correction threshold must be non-negative, got {} m",
                    meters
                )));
            }
        }
        Ok(())
    }
}

/// Elevation lookup shared by both orthorectifiers
///
/// Elevation model first, then the pointing, then zero. Provider failures
/// and no-data values count as zero.
#[derive(Clone)]
struct ElevationSource {
    elevation_model: Option<Arc<dyn ElevationModel>>,
    pointing: Arc<dyn Pointing>,
}

impl ElevationSource {
    fn sample(&self, geo_pos: &GeoPos, pixel_pos: &PixelPos) -> f64 {
        match &self.elevation_model {
            Some(model) => match model.elevation(geo_pos) {
                Ok(h) if h.is_finite() && h != model.no_data_value() => h,
                Ok(_) => 0.0,
                Err(e) => {
                    log::warn!("Elevation lookup failed at {}: {}, using 0 m", geo_pos, e);
                    0.0
                }
            },
            None if self.pointing.can_get_elevation() => self.pointing.elevation(pixel_pos),
            None => 0.0,
        }
    }
}

#[inline]
fn within_scene(pixel_pos: &PixelPos, width: usize, height: usize) -> bool {
    pixel_pos.is_valid()
        && pixel_pos.x >= -BOUNDS_EPS
        && pixel_pos.y >= -BOUNDS_EPS
        && pixel_pos.x <= width as f64 + BOUNDS_EPS
        && pixel_pos.y <= height as f64 + BOUNDS_EPS
}

/// Prediction/correction orthorectifier over a base geocoding
///
/// All per-query state lives on the stack, so a single instance may serve
/// concurrent queries.
pub struct Orthorectifier {
    base: Arc<dyn GeoCoding>,
    elevation: ElevationSource,
    scene_width: usize,
    scene_height: usize,
    max_iteration_count: usize,
    pixel_epsilon: f64,
    policy: CorrectionPolicy,
}

impl Orthorectifier {
    pub fn new(
        base: Arc<dyn GeoCoding>,
        pointing: Arc<dyn Pointing>,
        elevation_model: Option<Arc<dyn ElevationModel>>,
        scene_width: usize,
        scene_height: usize,
        max_iteration_count: usize,
    ) -> GeoResult<Self> {
        let config = OrthorectifierConfig {
            max_iteration_count,
            ..OrthorectifierConfig::default()
        };
        Self::from_config(base, pointing, elevation_model, scene_width, scene_height, &config)
    }

    pub fn from_config(
        base: Arc<dyn GeoCoding>,
        pointing: Arc<dyn Pointing>,
        elevation_model: Option<Arc<dyn ElevationModel>>,
        scene_width: usize,
        scene_height: usize,
        config: &OrthorectifierConfig,
    ) -> GeoResult<Self> {
        config.validate()?;
        Ok(Self {
            base,
            elevation: ElevationSource {
                elevation_model,
                pointing,
            },
            scene_width,
            scene_height,
            max_iteration_count: config.max_iteration_count,
            pixel_epsilon: config.pixel_epsilon,
            policy: config.correction_policy(),
        })
    }

    pub fn with_correction_policy(mut self, policy: CorrectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn correction_policy(&self) -> CorrectionPolicy {
        self.policy
    }

    pub fn max_iteration_count(&self) -> usize {
        self.max_iteration_count
    }

    /// Direct location model: base geolocation of the pixel moved by the
    /// relief displacement, scaled by `factor`
    fn direct(&self, pixel_pos: &PixelPos, factor: f64) -> GeoResult<GeoPos> {
        let geo_pos = self.base.get_geo_pos(pixel_pos)?;
        if !geo_pos.is_valid() {
            return Ok(geo_pos);
        }
        let h = self.elevation.sample(&geo_pos, pixel_pos);
        if h == 0.0 {
            return Ok(geo_pos);
        }
        let view = self.elevation.pointing.view_dir(pixel_pos);
        let shift = h * factor * view.zenith.to_radians().tan();
        Ok(displace(geo_pos, shift, view.azimuth))
    }

    fn must_correct(&self, pixel_pos: &PixelPos, geo_pos: &GeoPos) -> bool {
        match self.policy {
            CorrectionPolicy::Always => true,
            CorrectionPolicy::DistanceThreshold(meters) => {
                let h = self.elevation.sample(geo_pos, pixel_pos);
                let view = self.elevation.pointing.view_dir(pixel_pos);
                (h * view.zenith.to_radians().tan()).abs() > meters
            }
        }
    }
}

impl GeoCoding for Orthorectifier {
    fn can_get_geo_pos(&self) -> bool {
        self.base.can_get_geo_pos()
    }

    fn can_get_pixel_pos(&self) -> bool {
        self.base.can_get_pixel_pos() && self.base.can_get_geo_pos()
    }

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoResult<GeoPos> {
        self.direct(pixel_pos, 1.0)
    }

    fn get_pixel_pos(&self, geo_pos: &GeoPos) -> GeoResult<PixelPos> {
        let first_guess = self.base.get_pixel_pos(geo_pos)?;
        if !within_scene(&first_guess, self.scene_width, self.scene_height) {
            return Ok(first_guess);
        }
        if !self.must_correct(&first_guess, geo_pos) {
            return Ok(first_guess);
        }

        let eps_sq = self.pixel_epsilon * self.pixel_epsilon;
        for factor in DAMPING_FACTORS {
            let mut pixel_pos = first_guess;
            for _ in 0..self.max_iteration_count {
                let corrected = self.direct(&pixel_pos, factor)?;
                if !corrected.is_valid() {
                    break;
                }
                let candidate = self.base.get_pixel_pos(&corrected)?;
                if !candidate.is_valid() {
                    break;
                }
                let dx = first_guess.x - candidate.x;
                let dy = first_guess.y - candidate.y;
                pixel_pos = PixelPos::new(pixel_pos.x + dx, pixel_pos.y + dy);
                if dx * dx + dy * dy < eps_sq {
                    return Ok(pixel_pos);
                }
            }
            log::debug!(
                "Orthorectification of {} did not converge with damping {}",
                geo_pos,
                factor
            );
        }
        Ok(first_guess)
    }

    fn is_crossing_meridian_at_180(&self) -> GeoResult<bool> {
        self.base.is_crossing_meridian_at_180()
    }
}

/// Orthorectifier using the exact spherical relief displacement
///
/// The displacement of a point at height `h` seen under zenith angle `θ` is
/// the earth-central angle `asin((R + h) / R * sin θ) - θ`.
pub struct PolarOrthorectifier {
    base: Arc<dyn GeoCoding>,
    elevation: ElevationSource,
    scene_width: usize,
    scene_height: usize,
    max_iteration_count: usize,
    pixel_epsilon: f64,
}

impl PolarOrthorectifier {
    pub fn new(
        base: Arc<dyn GeoCoding>,
        pointing: Arc<dyn Pointing>,
        elevation_model: Option<Arc<dyn ElevationModel>>,
        scene_width: usize,
        scene_height: usize,
        max_iteration_count: usize,
    ) -> GeoResult<Self> {
        let config = OrthorectifierConfig {
            max_iteration_count,
            ..OrthorectifierConfig::default()
        };
        Self::from_config(base, pointing, elevation_model, scene_width, scene_height, &config)
    }

    /// Iteration cap and pixel epsilon come from `config`; the correction
    /// threshold has no effect here
    pub fn from_config(
        base: Arc<dyn GeoCoding>,
        pointing: Arc<dyn Pointing>,
        elevation_model: Option<Arc<dyn ElevationModel>>,
        scene_width: usize,
        scene_height: usize,
        config: &OrthorectifierConfig,
    ) -> GeoResult<Self> {
        config.validate()?;
        if config.correction_threshold_meters.is_some() {
            log::debug!("Correction threshold ignored by the polar orthorectifier");
        }
        Ok(Self {
            base,
            elevation: ElevationSource {
                elevation_model,
                pointing,
            },
            scene_width,
            scene_height,
            max_iteration_count: config.max_iteration_count,
            pixel_epsilon: config.pixel_epsilon,
        })
    }

    pub fn max_iteration_count(&self) -> usize {
        self.max_iteration_count
    }

    pub fn pixel_epsilon(&self) -> f64 {
        self.pixel_epsilon
    }

    /// Ground distance in meters between a point at height `h` and the
    /// ellipsoid point on the same line of sight
    fn relief_displacement(h: f64, zenith_deg: f64) -> f64 {
        let theta = zenith_deg.to_radians();
        let s = ((EARTH_RADIUS + h) / EARTH_RADIUS * theta.sin()).clamp(-1.0, 1.0);
        EARTH_RADIUS * (s.asin() - theta)
    }
}

impl GeoCoding for PolarOrthorectifier {
    fn can_get_geo_pos(&self) -> bool {
        self.base.can_get_geo_pos()
    }

    fn can_get_pixel_pos(&self) -> bool {
        self.base.can_get_pixel_pos()
    }

    fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoResult<GeoPos> {
        let geo_pos = self.base.get_geo_pos(pixel_pos)?;
        if !geo_pos.is_valid() {
            return Ok(geo_pos);
        }
        let h = self.elevation.sample(&geo_pos, pixel_pos);
        if h == 0.0 {
            return Ok(geo_pos);
        }
        let view = self.elevation.pointing.view_dir(pixel_pos);
        Ok(displace(geo_pos, Self::relief_displacement(h, view.zenith), view.azimuth))
    }

    fn get_pixel_pos(&self, geo_pos: &GeoPos) -> GeoResult<PixelPos> {
        let first_guess = self.base.get_pixel_pos(geo_pos)?;
        if !within_scene(&first_guess, self.scene_width, self.scene_height) {
            return Ok(first_guess);
        }
        let h = self.elevation.sample(geo_pos, &first_guess);
        if h == 0.0 {
            return Ok(first_guess);
        }

        let eps_sq = self.pixel_epsilon * self.pixel_epsilon;
        let mut pixel_pos = first_guess;
        for _ in 0..self.max_iteration_count {
            let view = self.elevation.pointing.view_dir(&pixel_pos);
            let ellipsoid_pos = displace(
                *geo_pos,
                Self::relief_displacement(h, view.zenith),
                view.azimuth + 180.0,
            );
            let next = self.base.get_pixel_pos(&ellipsoid_pos)?;
            if !next.is_valid() {
                break;
            }
            let converged = next.distance_sq(&pixel_pos) < eps_sq;
            pixel_pos = next;
            if converged {
                return Ok(pixel_pos);
            }
        }
        log::debug!("Polar orthorectification of {} did not converge", geo_pos);
        Ok(first_guess)
    }

    fn is_crossing_meridian_at_180(&self) -> GeoResult<bool> {
        self.base.is_crossing_meridian_at_180()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Plate carrée style geocoding, one pixel per 0.001°
    struct LinearGeoCoding;

    impl GeoCoding for LinearGeoCoding {
        fn can_get_geo_pos(&self) -> bool {
            true
        }

        fn can_get_pixel_pos(&self) -> bool {
            true
        }

        fn get_geo_pos(&self, p: &PixelPos) -> GeoResult<GeoPos> {
            Ok(GeoPos::new(45.0 - 0.001 * p.y, 10.0 + 0.001 * p.x))
        }

        fn get_pixel_pos(&self, g: &GeoPos) -> GeoResult<PixelPos> {
            Ok(PixelPos::new((g.lon - 10.0) / 0.001, (45.0 - g.lat) / 0.001))
        }

        fn is_crossing_meridian_at_180(&self) -> GeoResult<bool> {
            Ok(false)
        }
    }

    struct FailingElevation;

    impl ElevationModel for FailingElevation {
        fn elevation(&self, _geo_pos: &GeoPos) -> GeoResult<f64> {
            Err(GeoError::Processing("tile missing".to_string()))
        }

        fn no_data_value(&self) -> f64 {
            -32768.0
        }
    }

    fn ortho(elevation: Option<f64>) -> Orthorectifier {
        let pointing = match elevation {
            Some(h) => ConstantPointing::new(30.0, 90.0).with_elevation(h),
            None => ConstantPointing::new(30.0, 90.0),
        };
        Orthorectifier::new(Arc::new(LinearGeoCoding), Arc::new(pointing), None, 200, 200, 30).unwrap()
    }

    #[test]
    fn test_zero_elevation_keeps_first_guess() {
        let ortho = ortho(None);
        let g = GeoPos::new(44.95, 10.05);
        let p = ortho.get_pixel_pos(&g).unwrap();
        assert_abs_diff_eq!(p.x, 50.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pointing_elevation_shifts_away_from_sensor() {
        let ortho = ortho(Some(1000.0));
        let g = GeoPos::new(44.9, 10.1);
        let p = ortho.get_pixel_pos(&g).unwrap();
        // sensor to the east: the image position moves west
        assert!(p.x < 100.0 - 5.0);
        assert_abs_diff_eq!(p.y, 100.0, epsilon = 0.1);

        let back = ortho.get_geo_pos(&p).unwrap();
        assert_abs_diff_eq!(back.lon, g.lon, epsilon = 1e-4);
        assert_abs_diff_eq!(back.lat, g.lat, epsilon = 1e-4);
    }

    #[test]
    fn test_outside_scene_returns_first_guess() {
        let ortho = ortho(Some(1000.0));
        let p = ortho.get_pixel_pos(&GeoPos::new(44.0, 10.1)).unwrap();
        assert_abs_diff_eq!(p.y, 1000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_failing_elevation_model_counts_as_zero() {
        let ortho = Orthorectifier::new(
            Arc::new(LinearGeoCoding),
            Arc::new(ConstantPointing::new(30.0, 90.0).with_elevation(5000.0)),
            Some(Arc::new(FailingElevation)),
            200,
            200,
            10,
        )
        .unwrap();
        let p = ortho.get_pixel_pos(&GeoPos::new(44.9, 10.1)).unwrap();
        assert_abs_diff_eq!(p.x, 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_iteration_count_must_exceed_one() {
        let result = Orthorectifier::new(
            Arc::new(LinearGeoCoding),
            Arc::new(ConstantPointing::new(0.0, 0.0)),
            None,
            10,
            10,
            1,
        );
        assert!(matches!(result, Err(GeoError::Configuration(_))));
    }

    #[test]
    fn test_distance_threshold_skips_small_displacements() {
        let ortho = ortho(Some(1000.0)).with_correction_policy(CorrectionPolicy::DistanceThreshold(10_000.0));
        let p = ortho.get_pixel_pos(&GeoPos::new(44.9, 10.1)).unwrap();
        assert_abs_diff_eq!(p.x, 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_polar_orthorectifier_inverts_its_direct_model() {
        let polar = PolarOrthorectifier::new(
            Arc::new(LinearGeoCoding),
            Arc::new(ConstantPointing::new(40.0, 270.0).with_elevation(2000.0)),
            None,
            200,
            200,
            30,
        )
        .unwrap();
        let g = GeoPos::new(44.9, 10.1);
        let p = polar.get_pixel_pos(&g).unwrap();
        // sensor to the west: the image position moves east
        assert!(p.x > 100.0 + 5.0);
        let back = polar.get_geo_pos(&p).unwrap();
        assert_abs_diff_eq!(back.lon, g.lon, epsilon = 1e-4);
        assert_abs_diff_eq!(back.lat, g.lat, epsilon = 1e-4);
    }

    #[test]
    fn test_polar_orthorectifier_from_config() {
        let pointing: Arc<dyn Pointing> = Arc::new(ConstantPointing::new(40.0, 270.0).with_elevation(2000.0));
        let config = OrthorectifierConfig {
            max_iteration_count: 12,
            pixel_epsilon: 1e-4,
            correction_threshold_meters: None,
        };
        let polar =
            PolarOrthorectifier::from_config(Arc::new(LinearGeoCoding), pointing.clone(), None, 200, 200, &config)
                .unwrap();
        assert_eq!(polar.max_iteration_count(), 12);
        assert_abs_diff_eq!(polar.pixel_epsilon(), 1e-4);

        let g = GeoPos::new(44.9, 10.1);
        let back = polar.get_geo_pos(&polar.get_pixel_pos(&g).unwrap()).unwrap();
        assert_abs_diff_eq!(back.lon, g.lon, epsilon = 1e-5);
        assert_abs_diff_eq!(back.lat, g.lat, epsilon = 1e-5);

        let bad = OrthorectifierConfig {
            pixel_epsilon: 0.0,
            ..config
        };
        let result = PolarOrthorectifier::from_config(Arc::new(LinearGeoCoding), pointing, None, 200, 200, &bad);
        assert!(matches!(result, Err(GeoError::Configuration(_))));
    }

    #[test]
    fn test_relief_displacement_matches_flat_approximation() {
        let exact = PolarOrthorectifier::relief_displacement(1000.0, 30.0);
        let flat = 1000.0 * 30f64.to_radians().tan();
        assert!((exact - flat).abs() / flat < 1e-3);
    }
}
