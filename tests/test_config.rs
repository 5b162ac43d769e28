use geocore::core::orthorectifier::CorrectionPolicy;
use geocore::{ComponentFactory, ComponentGeoCoding, ConfigReader, GeoChecks, GeoCoding, GeoError, GeoRaster, PixelPos};
use std::io::Write;
use tempfile::NamedTempFile;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes()).expect("Failed to write config");
    file.flush().expect("Failed to flush config");
    file
}

#[test]
fn test_geocoding_config_from_file() {
    init_logging();
    println!("=== Testing geocoding configuration file ===");

    let file = write_config(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<geoCoding>
  <forwardKey>pixel</forwardKey>
  <inverseKey>geo-index-interpolating</inverseKey>
  <geoChecks>ANTIMERIDIAN</geoChecks>
  <rasterResolutionKm>150.0</rasterResolutionKm>
</geoCoding>"#,
    );
    let config = ConfigReader::read_geocoding_config(file.path()).unwrap();
    assert_eq!(config.forward_key.as_deref(), Some("pixel"));
    assert_eq!(config.geo_checks, GeoChecks::Antimeridian);

    let mut lons = Vec::new();
    let mut lats = Vec::new();
    for y in 0..6 {
        for x in 0..8 {
            lons.push(30.0 + x as f64);
            lats.push(-5.0 - y as f64);
        }
    }
    let raster = GeoRaster::without_resolution(lons, lats, 8, 6).unwrap();
    let factory = ComponentFactory::with_defaults();
    let mut coding = ComponentGeoCoding::from_config(raster, &config, &factory).unwrap();
    assert_eq!(coding.geo_raster().raster_resolution_km(), Some(150.0));
    coding.initialize().unwrap();

    assert_eq!(coding.forward_key(), Some("pixel"));
    assert_eq!(coding.inverse_key(), Some("geo-index-interpolating"));
    let g = coding.get_geo_pos(&PixelPos::new(2.6, 1.4)).unwrap();
    assert_eq!((g.lon, g.lat), (32.0, -6.0));
    println!("✅ Geocoding built from {}", file.path().display());
}

#[test]
fn test_unknown_key_in_config_fails_fast() {
    let config = ConfigReader::parse_geocoding_config(
        "<geoCoding><forwardKey>lanczos</forwardKey></geoCoding>",
    )
    .unwrap();
    let raster = GeoRaster::new(vec![0.0; 4], vec![0.0; 4], 2, 2, 1.0).unwrap();
    let result = ComponentGeoCoding::from_config(raster, &config, &ComponentFactory::with_defaults());
    assert!(matches!(result, Err(GeoError::UnknownComponent(_))));
}

#[test]
fn test_orthorectifier_config_from_file() {
    init_logging();
    let file = write_config(
        "<orthorectifier>\n  <maxIterationCount>8</maxIterationCount>\n  <pixelEpsilon>0.2</pixelEpsilon>\n</orthorectifier>",
    );
    let config = ConfigReader::read_orthorectifier_config(file.path()).unwrap();
    assert_eq!(config.max_iteration_count, 8);
    assert_eq!(config.pixel_epsilon, 0.2);
    assert_eq!(config.correction_policy(), CorrectionPolicy::Always);
}

#[test]
fn test_missing_and_malformed_files() {
    let missing = ConfigReader::read_geocoding_config("/nonexistent/geocoding.xml");
    assert!(matches!(missing, Err(GeoError::Io(_))));

    let file = write_config("<geoCoding><rasterResolutionKm>fast</rasterResolutionKm></geoCoding>");
    let malformed = ConfigReader::read_geocoding_config(file.path());
    assert!(matches!(malformed, Err(GeoError::XmlParsing(_))));
}
