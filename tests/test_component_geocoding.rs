use approx::assert_abs_diff_eq;
use geocore::core::factory::{
    FWD_PIXEL_INTERPOLATING, FWD_TIE_POINT_BILINEAR, FWD_TIE_POINT_SPLINE,
    INV_PIXEL_GEO_INDEX_INTERPOLATING, INV_PIXEL_QUAD_TREE_INTERPOLATING, INV_TIE_POINT,
};
use geocore::core::forward::ForwardCoding;
use geocore::core::geo_utils::lon_delta;
use geocore::core::inverse::InverseCoding;
use geocore::{
    ComponentFactory, ComponentGeoCoding, GeoChecks, GeoCoding, GeoError, GeoPos, GeoRaster,
    GeoResult, PixelPos, SubsetDef,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wrap(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// 8x10 tie points, subsampling 5, over a 40x50 scene
fn tie_point_raster(lon_start: f64) -> GeoRaster {
    let (w, h) = (8, 10);
    let mut lons = Vec::with_capacity(w * h);
    let mut lats = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            lons.push(wrap(lon_start + 5.0 * x as f64 - 2.0 * y as f64));
            lats.push(50.0 - 5.0 * y as f64 - 2.0 * x as f64);
        }
    }
    GeoRaster::with_scene(lons, lats, w, h, 40, 50, 300.0, (0.5, 0.5), (5.0, 5.0)).unwrap()
}

/// Same layout as `tie_point_raster`, but curved in both directions
fn curved_tie_point_raster() -> GeoRaster {
    let (w, h) = (8, 10);
    let mut lons = Vec::with_capacity(w * h);
    let mut lats = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let (x, y) = (x as f64, y as f64);
            lons.push(-20.0 + 4.0 * x + 0.3 * x * x - 0.5 * y);
            lats.push(50.0 - 3.0 * y - 0.2 * y * y - 0.5 * x);
        }
    }
    GeoRaster::with_scene(lons, lats, w, h, 40, 50, 300.0, (0.5, 0.5), (5.0, 5.0)).unwrap()
}

/// Per-pixel 40x50 raster, roughly 1° per pixel
fn pixel_raster(lon_start: f64) -> GeoRaster {
    let (w, h) = (40, 50);
    let mut lons = Vec::with_capacity(w * h);
    let mut lats = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            lons.push(wrap(lon_start + x as f64 - 0.4 * y as f64));
            lats.push(50.0 - y as f64 - 0.4 * x as f64);
        }
    }
    GeoRaster::new(lons, lats, w, h, 111.0).unwrap()
}

fn initialized(raster: GeoRaster, forward: &str, inverse: &str) -> ComponentGeoCoding {
    let factory = ComponentFactory::with_defaults();
    let mut coding =
        ComponentGeoCoding::from_keys(raster, Some(forward), Some(inverse), GeoChecks::Antimeridian, &factory)
            .unwrap();
    coding.initialize().unwrap();
    coding
}

fn assert_round_trip(coding: &ComponentGeoCoding, pixels: &[(f64, f64)], eps: f64) {
    for &(x, y) in pixels {
        let p = PixelPos::new(x, y);
        let g = coding.get_geo_pos(&p).unwrap();
        assert!(g.is_valid(), "no geo position for {}", p);
        assert!(g.lon >= -180.0 && g.lon < 180.0, "longitude {} not normalized", g.lon);
        let back = coding.get_pixel_pos(&g).unwrap();
        assert!(back.is_valid(), "no pixel position for {} (from {})", g, p);
        assert_abs_diff_eq!(back.x, x, epsilon = eps);
        assert_abs_diff_eq!(back.y, y, epsilon = eps);
    }
}

#[test]
fn test_concrete_tie_point_scenario() {
    init_logging();
    println!("=== Testing 5x5 tie-point scenario ===");

    let mut lons = Vec::new();
    let mut lats = Vec::new();
    for y in 0..5 {
        for x in 0..5 {
            lons.push(-20.0 + 5.0 * x as f64 - 2.0 * y as f64);
            lats.push(50.0 - 2.0 * x as f64 - 2.0 * y as f64);
        }
    }
    let raster =
        GeoRaster::with_scene(lons, lats, 5, 5, 65, 65, 200.0, (0.5, 0.5), (16.0, 16.0)).unwrap();
    let coding = initialized(raster, FWD_TIE_POINT_BILINEAR, INV_TIE_POINT);

    let g = coding.get_geo_pos(&PixelPos::new(0.5, 0.5)).unwrap();
    assert_abs_diff_eq!(g.lon, -20.0, epsilon = 1e-9);
    assert_abs_diff_eq!(g.lat, 50.0, epsilon = 1e-9);

    let p = coding.get_pixel_pos(&g).unwrap();
    assert_abs_diff_eq!(p.x, 0.5, epsilon = 1e-8);
    assert_abs_diff_eq!(p.y, 0.5, epsilon = 1e-8);

    assert_round_trip(&coding, &[(10.0, 20.0), (33.3, 1.7), (64.5, 64.5)], 1e-6);
    println!("✅ Tie-point scenario round trip OK");
}

#[test]
fn test_tie_point_transfer_with_sub_sampling() {
    init_logging();
    let factory = ComponentFactory::with_defaults();
    let coding = initialized(tie_point_raster(-20.0), FWD_TIE_POINT_BILINEAR, INV_TIE_POINT);
    assert!(!coding.is_crossing_meridian_at_180().unwrap());

    for ss in [3usize, 4] {
        let subset = coding.transfer(&SubsetDef::with_sub_sampling(ss, ss), &factory).unwrap();

        assert_eq!(subset.forward_key(), coding.forward_key());
        assert_eq!(subset.inverse_key(), coding.inverse_key());
        assert_eq!(subset.geo_checks(), coding.geo_checks());
        assert_eq!(subset.geo_raster().scene_width(), (40 - 1) / ss + 1);
        assert_eq!(subset.geo_raster().scene_height(), (50 - 1) / ss + 1);

        // subset pixel centers land on every ss-th original pixel center
        for &(x, y) in &[(0.5, 0.5), (3.5, 7.5), (8.5, 10.5)] {
            let original = PixelPos::new((x - 0.5) * ss as f64 + 0.5, (y - 0.5) * ss as f64 + 0.5);
            let expected = coding.get_geo_pos(&original).unwrap();
            let actual = subset.get_geo_pos(&PixelPos::new(x, y)).unwrap();
            assert_abs_diff_eq!(actual.lat, expected.lat, epsilon = 1e-9);
            assert_abs_diff_eq!(lon_delta(actual.lon, expected.lon), 0.0, epsilon = 1e-9);
        }
        assert_round_trip(&subset, &[(1.5, 1.5), (6.25, 9.75)], 1e-6);
    }
}

#[test]
fn test_tie_point_transfer_coarser_than_tie_points() {
    init_logging();
    let factory = ComponentFactory::with_defaults();
    let coding = initialized(tie_point_raster(-20.0), FWD_TIE_POINT_BILINEAR, INV_TIE_POINT);

    for ss in [6usize, 8] {
        println!("Transferring 40x50 scene with sub-sampling {}", ss);
        let subset = coding.transfer(&SubsetDef::with_sub_sampling(ss, ss), &factory).unwrap();
        let raster = subset.geo_raster();
        assert_eq!(raster.scene_width(), (40 - 1) / ss + 1);
        assert_eq!(raster.scene_height(), (50 - 1) / ss + 1);
        assert!(raster.raster_width() <= raster.scene_width());
        assert!(raster.raster_height() <= raster.scene_height());

        for &(x, y) in &[(0.5, 0.5), (3.5, 4.5), (4.5, 6.5)] {
            let original = PixelPos::new((x - 0.5) * ss as f64 + 0.5, (y - 0.5) * ss as f64 + 0.5);
            let expected = coding.get_geo_pos(&original).unwrap();
            let actual = subset.get_geo_pos(&PixelPos::new(x, y)).unwrap();
            assert!(actual.is_valid(), "no geo position at ({}, {}) for sub-sampling {}", x, y, ss);
            assert_abs_diff_eq!(actual.lat, expected.lat, epsilon = 1e-9);
            assert_abs_diff_eq!(lon_delta(actual.lon, expected.lon), 0.0, epsilon = 1e-9);
        }
        assert_round_trip(&subset, &[(1.5, 1.5), (3.25, 5.75)], 1e-6);
    }
}

#[test]
fn test_spline_forward_with_tie_point_inverse() {
    init_logging();
    let spline = initialized(curved_tie_point_raster(), FWD_TIE_POINT_SPLINE, INV_TIE_POINT);
    let bilinear = initialized(curved_tie_point_raster(), FWD_TIE_POINT_BILINEAR, INV_TIE_POINT);

    // the two surfaces differ inside the grid
    let p = PixelPos::new(12.3, 17.7);
    let s = spline.get_geo_pos(&p).unwrap();
    let b = bilinear.get_geo_pos(&p).unwrap();
    assert!((s.lat - b.lat).abs() > 1e-4);

    let pixels = [(12.3, 17.7), (3.1, 44.2), (25.0, 8.8), (37.5, 2.5)];
    assert_round_trip(&spline, &pixels, 1e-6);
    assert_round_trip(&bilinear, &pixels, 1e-6);
}

#[test]
fn test_tie_point_transfer_across_antimeridian() {
    init_logging();
    let factory = ComponentFactory::with_defaults();
    let coding = initialized(tie_point_raster(160.0), FWD_TIE_POINT_BILINEAR, INV_TIE_POINT);
    assert!(coding.is_crossing_meridian_at_180().unwrap());

    // x = 18.0 lies between tie points 3 (175°) and 4 (180°) on the first row
    let g = coding.get_geo_pos(&PixelPos::new(18.0, 0.5)).unwrap();
    assert_abs_diff_eq!(g.lon, 177.5, epsilon = 1e-9);
    let g = coding.get_geo_pos(&PixelPos::new(20.5, 0.5)).unwrap();
    assert_abs_diff_eq!(g.lon, -180.0, epsilon = 1e-9);
    let g = coding.get_geo_pos(&PixelPos::new(30.5, 0.5)).unwrap();
    assert_abs_diff_eq!(g.lon, -170.0, epsilon = 1e-9);

    assert_round_trip(&coding, &[(20.5, 0.5), (24.0, 3.0), (28.2, 12.9)], 1e-6);

    let subset = coding
        .transfer(&SubsetDef { region: Some((10, 5, 25, 30)), sub_sampling_x: 3, sub_sampling_y: 3 }, &factory)
        .unwrap();
    assert!(subset.is_crossing_meridian_at_180().unwrap());
    let original = PixelPos::new(10.0 + 3.0 * 4.0 + 0.5, 5.0 + 3.0 * 2.0 + 0.5);
    let expected = coding.get_geo_pos(&original).unwrap();
    let actual = subset.get_geo_pos(&PixelPos::new(4.5, 2.5)).unwrap();
    assert_abs_diff_eq!(actual.lat, expected.lat, epsilon = 1e-9);
    assert_abs_diff_eq!(lon_delta(actual.lon, expected.lon), 0.0, epsilon = 1e-9);
}

#[test]
fn test_pixel_codings_round_trip() {
    init_logging();
    let pixels = [(0.5, 0.5), (7.3, 21.8), (20.0, 25.0), (39.5, 49.5), (12.75, 3.1)];
    for inverse in [INV_PIXEL_QUAD_TREE_INTERPOLATING, INV_PIXEL_GEO_INDEX_INTERPOLATING] {
        let coding = initialized(pixel_raster(-20.0), FWD_PIXEL_INTERPOLATING, inverse);
        assert!(!coding.is_crossing_meridian_at_180().unwrap());
        assert_round_trip(&coding, &pixels, 1e-6);

        let crossing = initialized(pixel_raster(160.0), FWD_PIXEL_INTERPOLATING, inverse);
        assert!(crossing.is_crossing_meridian_at_180().unwrap());
        assert_round_trip(&crossing, &pixels, 1e-3);
    }
}

#[test]
fn test_pixel_transfer_builds_independent_codings() {
    init_logging();
    let factory = ComponentFactory::with_defaults();
    let coding = initialized(pixel_raster(160.0), FWD_PIXEL_INTERPOLATING, INV_PIXEL_GEO_INDEX_INTERPOLATING);
    let subset = coding
        .transfer(&SubsetDef { region: Some((4, 6, 20, 30)), sub_sampling_x: 2, sub_sampling_y: 2 }, &factory)
        .unwrap();

    assert_eq!(subset.forward_key(), Some(FWD_PIXEL_INTERPOLATING));
    assert_eq!(subset.inverse_key(), Some(INV_PIXEL_GEO_INDEX_INTERPOLATING));
    assert_eq!(subset.geo_raster().scene_width(), 10);
    assert_eq!(subset.geo_raster().scene_height(), 15);
    assert_abs_diff_eq!(subset.geo_raster().raster_resolution_km().unwrap(), 222.0);

    let original_fwd = coding.forward_coding().unwrap() as *const _ as *const u8;
    let subset_fwd = subset.forward_coding().unwrap() as *const _ as *const u8;
    assert!(!std::ptr::eq(original_fwd, subset_fwd));

    let g = subset.get_geo_pos(&PixelPos::new(3.5, 5.5)).unwrap();
    let expected = coding.get_geo_pos(&PixelPos::new(4.0 + 6.0 + 0.5, 6.0 + 10.0 + 0.5)).unwrap();
    assert_abs_diff_eq!(g.lat, expected.lat, epsilon = 1e-9);
    assert_abs_diff_eq!(lon_delta(g.lon, expected.lon), 0.0, epsilon = 1e-9);

    assert_round_trip(&subset, &[(1.5, 1.5), (5.2, 9.9)], 1e-3);
}

#[test]
fn test_uninitialized_guard_and_missing_codings() {
    init_logging();
    let coding = ComponentGeoCoding::new(pixel_raster(-20.0), None, None, GeoChecks::Antimeridian);
    assert!(matches!(coding.is_crossing_meridian_at_180(), Err(GeoError::InvalidState(_))));
    assert!(matches!(coding.get_geo_pos(&PixelPos::new(1.5, 1.5)), Err(GeoError::InvalidState(_))));

    let mut coding = coding;
    coding.initialize().unwrap();
    assert!(!coding.can_get_geo_pos());
    assert!(!coding.can_get_pixel_pos());
    assert!(!coding.get_geo_pos(&PixelPos::new(1.5, 1.5)).unwrap().is_valid());
    assert!(!coding.get_pixel_pos(&GeoPos::new(40.0, -10.0)).unwrap().is_valid());
}

#[test]
fn test_unknown_key_fails_at_construction() {
    let factory = ComponentFactory::with_defaults();
    let result = ComponentGeoCoding::from_keys(
        pixel_raster(-20.0),
        Some(FWD_PIXEL_INTERPOLATING),
        Some("kd-tree"),
        GeoChecks::Antimeridian,
        &factory,
    );
    assert!(matches!(result, Err(GeoError::UnknownComponent(_))));
}

#[derive(Debug)]
struct CountingForward(Arc<AtomicUsize>);

impl ForwardCoding for CountingForward {
    fn initialize(&mut self, _: &GeoRaster, _: bool, _: &[PixelPos]) -> GeoResult<()> {
        Ok(())
    }

    fn get_geo_pos(&self, _: &PixelPos) -> GeoPos {
        GeoPos::invalid()
    }

    fn dispose(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn factory_key(&self) -> &str {
        "counting"
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct CountingInverse(Arc<AtomicUsize>);

impl InverseCoding for CountingInverse {
    fn initialize(&mut self, _: &GeoRaster, _: bool, _: &[PixelPos]) -> GeoResult<()> {
        Ok(())
    }

    fn get_pixel_pos(&self, _: &GeoPos) -> PixelPos {
        PixelPos::invalid()
    }

    fn dispose(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn factory_key(&self) -> &str {
        "counting"
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

#[test]
fn test_dispose_calls_each_coding_once() {
    let forward_calls = Arc::new(AtomicUsize::new(0));
    let inverse_calls = Arc::new(AtomicUsize::new(0));
    let mut coding = ComponentGeoCoding::new(
        pixel_raster(-20.0),
        Some(Box::new(CountingForward(Arc::clone(&forward_calls)))),
        Some(Box::new(CountingInverse(Arc::clone(&inverse_calls)))),
        GeoChecks::None,
    );
    coding.initialize().unwrap();
    coding.dispose();
    coding.dispose();
    assert_eq!(forward_calls.load(Ordering::SeqCst), 1);
    assert_eq!(inverse_calls.load(Ordering::SeqCst), 1);
    assert!(coding.forward_coding().is_none());

    let forward_only = Arc::new(AtomicUsize::new(0));
    let mut coding = ComponentGeoCoding::new(
        pixel_raster(-20.0),
        Some(Box::new(CountingForward(Arc::clone(&forward_only)))),
        None,
        GeoChecks::None,
    );
    coding.dispose();
    assert_eq!(forward_only.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_queries() {
    init_logging();
    let coding = initialized(pixel_raster(-20.0), FWD_PIXEL_INTERPOLATING, INV_PIXEL_QUAD_TREE_INTERPOLATING);
    let pixels: Vec<PixelPos> = (0..200)
        .map(|i| PixelPos::new(0.5 + (i % 39) as f64, 0.5 + (i % 49) as f64))
        .collect();
    let serial: Vec<GeoPos> = pixels.iter().map(|p| coding.get_geo_pos(p).unwrap()).collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| coding.get_geo_positions(&pixels).unwrap()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), serial);
        }
    });
}
